// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Operator actions: one-shot commands run against the local cluster on
//! request.

use crate::facilities::{ClusterEndpoint, Leadership};
use crate::reconciler::{ReconcileError, Reconciler, TickReport};
use rbd_utils::rbd::{
    ImageError, OutputFormat, PoolAction, PoolActionError, PoolActionFlags,
};
use slog::info;

#[derive(thiserror::Error, Debug)]
pub enum ActionError {
    #[error("Required parameter not set")]
    RequiredParameterNotSet,

    #[error("run action on the leader unit")]
    NotLeader,

    #[error("{err}: {}", .err.err.operator_message())]
    PoolAction {
        #[source]
        err: PoolActionError,
    },

    #[error("{err}: {}", .err.err.operator_message())]
    Image {
        #[source]
        err: ImageError,
    },

    #[error("invalid JSON from {action} on pool {pool}: {err}")]
    InvalidJson {
        action: PoolAction,
        pool: String,
        #[source]
        err: serde_json::Error,
    },

    #[error(transparent)]
    Reconcile(#[from] ReconcileError),
}

impl<E: ClusterEndpoint, L: Leadership> Reconciler<E, L> {
    /// `pools` if any were given, otherwise every eligible local pool.
    fn action_pools(
        &self,
        pools: &[String],
    ) -> Result<Vec<String>, ActionError> {
        let pools: Vec<String> = pools
            .iter()
            .map(|pool| pool.trim())
            .filter(|pool| !pool.is_empty())
            .map(String::from)
            .collect();
        if !pools.is_empty() {
            return Ok(pools);
        }
        Ok(self.eligible_local_pools()?.names().map(String::from).collect())
    }

    /// Run `rbd mirror pool <action>` on each pool.
    ///
    /// Plain output is one `pool: output` line per pool. JSON output is an
    /// object keyed by pool. The first failing pool fails the action.
    pub fn pool_action(
        &self,
        action: PoolAction,
        pools: &[String],
        flags: &PoolActionFlags,
    ) -> Result<String, ActionError> {
        let pools = self.action_pools(pools)?;
        info!(
            self.log,
            "running pool action";
            "action" => %action,
            "pools" => ?pools,
        );

        let mut lines = Vec::new();
        let mut json = serde_json::Map::new();
        for pool in pools {
            let output = self
                .rbd
                .mirror_pool_action(&pool, action, flags)
                .map_err(|err| ActionError::PoolAction { err })?;
            if flags.format == Some(OutputFormat::Json) {
                let value = serde_json::from_str(&output).map_err(|err| {
                    ActionError::InvalidJson { action, pool: pool.clone(), err }
                })?;
                json.insert(pool, value);
            } else {
                lines.push(format!("{pool}: {output}"));
            }
        }

        if flags.format == Some(OutputFormat::Json) {
            Ok(serde_json::Value::Object(json).to_string())
        } else {
            Ok(lines.join("\n"))
        }
    }

    /// Force a resync of every mirrored image in `pools`.
    ///
    /// Nothing is run unless `confirmed` is set. Images with mirroring
    /// disabled are skipped. The output is one `pool/image: output` line per
    /// image resynced.
    pub fn resync_pools(
        &self,
        pools: &[String],
        confirmed: bool,
    ) -> Result<String, ActionError> {
        if !confirmed {
            return Err(ActionError::RequiredParameterNotSet);
        }
        let pools = self.action_pools(pools)?;

        let mut lines = Vec::new();
        for pool in &pools {
            let images = self
                .rbd
                .list_images(pool)
                .map_err(|err| ActionError::Image { err })?;
            for image in images {
                let image_info = self
                    .rbd
                    .image_info(pool, &image)
                    .map_err(|err| ActionError::Image { err })?;
                if image_info.mirroring_disabled() {
                    continue;
                }
                let output = self
                    .rbd
                    .mirror_image_resync(pool, &image)
                    .map_err(|err| ActionError::Image { err })?;
                info!(
                    self.log,
                    "resync requested";
                    "pool" => pool,
                    "image" => &image,
                );
                lines.push(format!("{pool}/{image}: {output}"));
            }
        }
        Ok(lines.join("\n"))
    }

    /// Have both clusters republish their pool data, then run a full tick.
    ///
    /// Only the leader may do this.
    pub fn refresh_pools_action(&self) -> Result<TickReport, ActionError> {
        if !self.leadership.is_leader() {
            return Err(ActionError::NotLeader);
        }
        self.leadership
            .request_refresh()
            .map_err(|err| ReconcileError::Refresh {
                endpoint: "leadership".to_string(),
                err,
            })?;
        Ok(self.tick())
    }
}
