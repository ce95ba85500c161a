// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Host agent that keeps RBD pools mirrored to a remote Ceph cluster.

pub mod agent;
pub mod cmd;
mod config;
mod context;
pub mod relation;

pub use config::{Config, ConfigError};
pub use context::{local_ceph_id, AgentReconciler, ServerContext};
