// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The reconciler proper.

use crate::broker::{
    collapse_and_filter_broker_requests, pool_mirroring_mode,
    pools_in_broker_request, BrokerRequestError,
};
use crate::eligible::{eligible_pools, RBD_APPLICATION};
use crate::facilities::{ClusterEndpoint, Leadership};
use crate::rules::{actions_for, Flags, RuleAction};
use crate::status::{
    assess_status, mirror_pools_summary, MirrorStatus, StatusPolicy,
    WorkloadStatus,
};
use display_error_chain::DisplayErrorChain;
use rbd_mirror_types::{
    BrokerOp, BrokerRequest, Pool, PoolDirectory, CREATE_POOL,
};
use rbd_utils::rbd::{EnableError, MirrorMode, PoolInfoError, Rbd};
use serde::Serialize;
use serde_json::Value;
use slog::{debug, info, o, warn, Logger};
use std::collections::{BTreeMap, BTreeSet};

#[derive(thiserror::Error, Debug)]
pub enum ReconcileError {
    #[error("failed to read {what} from {endpoint}")]
    Endpoint {
        endpoint: String,
        what: &'static str,
        #[source]
        err: anyhow::Error,
    },

    #[error("protocol violation in broker requests")]
    Protocol(#[from] BrokerRequestError),

    #[error("failed to send broker request to {endpoint}")]
    Send {
        endpoint: String,
        #[source]
        err: anyhow::Error,
    },

    #[error("failed to refresh pools on {endpoint}")]
    Refresh {
        endpoint: String,
        #[source]
        err: anyhow::Error,
    },
}

#[derive(thiserror::Error, Debug)]
enum EnsureMirroringError {
    #[error(transparent)]
    Query(#[from] PoolInfoError),
    #[error(transparent)]
    Enable(#[from] EnableError),
}

/// What a [`Reconciler::reconcile`] pass did.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileOutcome {
    /// Pools we tried to enable mirroring on.
    pub enable_attempted: Vec<String>,
    /// Pools whose mirroring could not be checked or enabled, with the
    /// reason. They are retried on the next pass.
    pub enable_failed: BTreeMap<String, String>,
    /// Pools a creation request was synthesized for.
    pub synthesized: Vec<String>,
    /// Number of ops sent to the remote cluster.
    pub forwarded_ops: usize,
}

/// What a [`Reconciler::tick`] did.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub flags: Flags,
    pub actions: Vec<RuleAction>,
    pub reconcile: Option<ReconcileOutcome>,
    pub status: Option<WorkloadStatus>,
    pub errors: Vec<String>,
}

/// Converges pool mirroring between the local and remote clusters.
///
/// All work is synchronous and runs to completion. Each call to
/// [`Self::tick`] recomputes everything from the current state of the
/// relations and the mirroring daemon, so calling it repeatedly is safe.
pub struct Reconciler<E, L> {
    pub(crate) local: E,
    pub(crate) remote: E,
    pub(crate) leadership: L,
    pub(crate) rbd: Rbd,
    policy: StatusPolicy,
    pub(crate) log: Logger,
}

impl<E: ClusterEndpoint, L: Leadership> Reconciler<E, L> {
    pub fn new(
        local: E,
        remote: E,
        leadership: L,
        rbd: Rbd,
        policy: StatusPolicy,
        log: &Logger,
    ) -> Self {
        let log = log.new(o!(
            "component" => "Reconciler",
            "ceph_id" => rbd.ceph_id().to_string(),
        ));
        Self { local, remote, leadership, rbd, policy, log }
    }

    pub fn local(&self) -> &E {
        &self.local
    }

    pub fn remote(&self) -> &E {
        &self.remote
    }

    pub fn leadership(&self) -> &L {
        &self.leadership
    }

    pub fn flags(&self) -> Flags {
        Flags {
            leader: self.leadership.is_leader(),
            local_available: self.local.is_available(),
            remote_available: self.remote.is_available(),
            refresh_requested: self.leadership.refresh_requested(),
        }
    }

    /// Run every action that applies to the current flags, in order.
    ///
    /// A failed action is logged and recorded in the report; later actions
    /// still run.
    pub fn tick(&self) -> TickReport {
        let flags = self.flags();
        let actions = actions_for(&flags);
        debug!(self.log, "tick"; "flags" => ?flags, "actions" => ?actions);

        let mut report = TickReport { flags, ..Default::default() };
        for action in actions {
            report.actions.push(action);
            match action {
                RuleAction::RefreshPools => {
                    if let Err(err) = self.refresh_pools() {
                        report.record_error(&self.log, &err);
                    }
                }
                RuleAction::ConfigurePools => match self.reconcile() {
                    Ok(outcome) => report.reconcile = Some(outcome),
                    Err(err) => report.record_error(&self.log, &err),
                },
                RuleAction::AssessStatus => {
                    report.status = self.assess_status();
                }
            }
        }
        report
    }

    /// Ask both clusters to republish pool data and clear the pending
    /// request.
    pub fn refresh_pools(&self) -> Result<(), ReconcileError> {
        for endpoint in [&self.local, &self.remote] {
            endpoint.refresh_pools().map_err(|err| ReconcileError::Refresh {
                endpoint: endpoint.name().to_string(),
                err,
            })?;
        }
        self.leadership.clear_refresh().map_err(|err| {
            ReconcileError::Refresh { endpoint: "leadership".to_string(), err }
        })?;
        info!(self.log, "requested pool refresh");
        Ok(())
    }

    fn read_pools(
        &self,
        endpoint: &E,
    ) -> Result<PoolDirectory, ReconcileError> {
        endpoint.pools().map_err(|err| ReconcileError::Endpoint {
            endpoint: endpoint.name().to_string(),
            what: "pools",
            err,
        })
    }

    /// Local pools that should be mirrored.
    pub fn eligible_local_pools(
        &self,
    ) -> Result<PoolDirectory, ReconcileError> {
        Ok(eligible_pools(&self.read_pools(&self.local)?))
    }

    fn collapsed_requests(
        &self,
        endpoint: &E,
    ) -> Result<Option<BrokerRequest>, ReconcileError> {
        let requests = endpoint.broker_requests().map_err(|err| {
            ReconcileError::Endpoint {
                endpoint: endpoint.name().to_string(),
                what: "broker requests",
                err,
            }
        })?;
        let allowed = BTreeSet::from([CREATE_POOL]);
        let require = BTreeMap::from([(
            "app-name".to_string(),
            Value::from(RBD_APPLICATION),
        )]);
        Ok(collapse_and_filter_broker_requests(&requests, &allowed, &require)?)
    }

    /// Enable mirroring on `pool` unless it is already mirroring in `mode`
    /// with a peer. Returns true if an enable was attempted.
    fn ensure_mirroring(
        &self,
        pool: &str,
        mode: MirrorMode,
    ) -> Result<bool, EnsureMirroringError> {
        if self.rbd.mirror_pool_enabled(pool, mode)?
            && self.rbd.mirror_pool_has_peers(pool)?
        {
            return Ok(false);
        }
        info!(
            self.log,
            "enabling mirroring";
            "pool" => pool,
            "mode" => %mode,
        );
        self.rbd.mirror_pool_enable(pool, mode)?;
        Ok(true)
    }

    /// The pool configuration pass.
    ///
    /// Enables mirroring on every eligible local pool that needs it, and
    /// forwards the pending local pool creation requests to the remote
    /// cluster, extended with a request for every eligible replicated pool
    /// that no pending request already covers.
    ///
    /// Failing to enable one pool does not stop the others. Malformed broker
    /// requests abort the pass before anything is sent.
    pub fn reconcile(&self) -> Result<ReconcileOutcome, ReconcileError> {
        let local_rq = self.collapsed_requests(&self.local)?;
        let remote_rq = self.collapsed_requests(&self.remote)?;
        let pools_in_rq: BTreeSet<String> = [&local_rq, &remote_rq]
            .into_iter()
            .flatten()
            .flat_map(pools_in_broker_request)
            .collect();
        let requests = [local_rq.as_ref(), remote_rq.as_ref()];

        let pools = self.eligible_local_pools()?;
        let mut outcome = ReconcileOutcome::default();
        // Pending local requests travel to the remote along with whatever
        // is synthesized below.
        let mut outgoing = local_rq.clone();
        for pool in &pools {
            let mode = pool_mirroring_mode(&pool.name, &requests)?;
            match self.ensure_mirroring(&pool.name, mode) {
                Ok(true) => outcome.enable_attempted.push(pool.name.clone()),
                Ok(false) => (),
                Err(err) => {
                    if matches!(err, EnsureMirroringError::Enable(_)) {
                        outcome.enable_attempted.push(pool.name.clone());
                    }
                    let err = DisplayErrorChain::new(&err).to_string();
                    warn!(
                        self.log,
                        "failed to set up mirroring";
                        "pool" => &pool.name,
                        "error" => &err,
                    );
                    outcome.enable_failed.insert(pool.name.clone(), err);
                }
            }

            if !pools_in_rq.contains(&pool.name)
                && !pool.parameters.is_erasure_coded()
            {
                outgoing
                    .get_or_insert_with(BrokerRequest::new)
                    .add_op(replicated_pool_op(pool));
                outcome.synthesized.push(pool.name.clone());
            }
        }

        // Remote pool creation is best effort: nothing here waits for or
        // checks the monitors' reply.
        if let Some(request) = outgoing {
            outcome.forwarded_ops = request.ops.len();
            self.remote.send_request(request).map_err(|err| {
                ReconcileError::Send {
                    endpoint: self.remote.name().to_string(),
                    err,
                }
            })?;
        }

        info!(
            self.log,
            "reconciled pools";
            "eligible" => pools.len(),
            "enable_attempted" => outcome.enable_attempted.len(),
            "enable_failed" => outcome.enable_failed.len(),
            "forwarded_ops" => outcome.forwarded_ops,
        );
        Ok(outcome)
    }

    /// Summarize mirroring health across the eligible local pools.
    ///
    /// Any failure is logged and reported as [`MirrorStatus::Unknown`].
    pub fn status_summary(&self) -> MirrorStatus {
        let pools = match self.eligible_local_pools() {
            Ok(pools) => pools,
            Err(err) => {
                warn!(
                    self.log,
                    "mirror status unknown";
                    "error" => %DisplayErrorChain::new(&err),
                );
                return MirrorStatus::Unknown;
            }
        };
        match mirror_pools_summary(&self.rbd, pools.names()) {
            Ok(summary) => MirrorStatus::Known(summary),
            Err(err) => {
                warn!(
                    self.log,
                    "mirror status unknown";
                    "error" => %DisplayErrorChain::new(&err),
                );
                MirrorStatus::Unknown
            }
        }
    }

    /// The status to report to the operator, if one can be determined.
    pub fn assess_status(&self) -> Option<WorkloadStatus> {
        let status = assess_status(&self.status_summary(), &self.policy);
        if let Some(status) = &status {
            info!(
                self.log,
                "workload status";
                "state" => %status.state,
                "message" => &status.message,
            );
        }
        status
    }
}

fn replicated_pool_op(pool: &Pool) -> BrokerOp {
    BrokerOp::create_replicated_pool(
        &pool.name,
        pool.parameters.size,
        pool.parameters.pg_num,
        RBD_APPLICATION,
        pool.quota.max_bytes,
        pool.quota.max_objects,
    )
}

impl TickReport {
    fn record_error(&mut self, log: &Logger, err: &ReconcileError) {
        let err = DisplayErrorChain::new(err).to_string();
        warn!(log, "tick action failed"; "error" => &err);
        self.errors.push(err);
    }
}
