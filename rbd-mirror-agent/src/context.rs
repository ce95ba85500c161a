// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Process-wide state, built once at startup.

use crate::config::Config;
use crate::relation::{
    FileEndpoint, FileLeadership, LOCAL_ENDPOINT, REMOTE_ENDPOINT,
};
use rbd_mirror_reconciler::Reconciler;
use rbd_utils::host::{BoxedExecutor, HostExecutor};
use rbd_utils::rbd::Rbd;
use slog::{info, Logger};

pub type AgentReconciler = Reconciler<FileEndpoint, FileLeadership>;

/// The Ceph client identity this host's mirroring daemon runs as.
pub fn local_ceph_id() -> String {
    let hostname = gethostname::gethostname();
    format!("rbd-mirror.{}", hostname.to_string_lossy())
}

pub struct ServerContext {
    pub config: Config,
    pub log: Logger,
    rbd: Rbd,
}

impl ServerContext {
    /// Context for the real host: commands run through a [`HostExecutor`]
    /// as [`local_ceph_id`].
    pub fn new(config: Config, log: Logger) -> Self {
        let executor = match config.command_timeout() {
            Some(timeout) => HostExecutor::with_timeout(log.clone(), timeout),
            None => HostExecutor::new(log.clone()),
        };
        Self::with_executor(
            config,
            log,
            executor.as_executor(),
            local_ceph_id(),
        )
    }

    pub fn with_executor(
        config: Config,
        log: Logger,
        executor: BoxedExecutor,
        ceph_id: String,
    ) -> Self {
        info!(
            log,
            "agent context";
            "state_dir" => %config.state_dir,
            "ceph_id" => &ceph_id,
        );
        let rbd = Rbd::new(executor, ceph_id);
        Self { config, log, rbd }
    }

    pub fn reconciler(&self) -> AgentReconciler {
        let state_dir = &self.config.state_dir;
        Reconciler::new(
            FileEndpoint::new(state_dir, LOCAL_ENDPOINT, &self.log),
            FileEndpoint::new(state_dir, REMOTE_ENDPOINT, &self.log),
            FileLeadership::new(state_dir),
            self.rbd.clone(),
            self.config.status.clone(),
            &self.log,
        )
    }
}
