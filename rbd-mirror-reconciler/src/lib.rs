// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Reconciliation of RBD pool mirroring between a local and a remote Ceph
//! cluster.
//!
//! On every tick, the [`Reconciler`]:
//!
//! 1. works out which local pools should be mirrored ([`eligible_pools`]),
//! 2. decides each pool's mirroring mode from pending broker requests,
//! 3. enables mirroring and peering through the `rbd` CLI where needed,
//! 4. forwards pool creation requests to the remote cluster so both sides
//!    end up with the same pools, and
//! 5. summarizes mirroring health for the operator.
//!
//! Which of these run is decided by a fixed rule table (see [`rules`]) over a
//! snapshot of leadership and relation availability. The relations and the
//! leadership predicate are supplied by the caller through the traits in
//! [`facilities`].

mod actions;
pub mod broker;
mod eligible;
pub mod facilities;
mod reconciler;
pub mod rules;
pub mod status;

pub use actions::ActionError;
pub use eligible::{eligible_pools, RBD_APPLICATION};
pub use reconciler::{ReconcileError, ReconcileOutcome, Reconciler, TickReport};
pub use status::{MirrorStatus, StatusPolicy, WorkloadState, WorkloadStatus};
