// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Traits that allow the reconciler to be driven by whatever delivers relation
//! data and leadership, without knowing how either is implemented.

use rbd_mirror_types::{BrokerRequest, PoolDirectory};

/// One side of the mirroring relationship: a Ceph cluster as seen through its
/// monitors.
pub trait ClusterEndpoint: Send + 'static {
    /// Name of the relation, for logs and errors.
    fn name(&self) -> &str;

    /// True once the monitors have published pool data for us.
    fn is_available(&self) -> bool;

    /// The pools the monitors have published.
    fn pools(&self) -> anyhow::Result<PoolDirectory>;

    /// Broker requests pending on this relation, in order. Entries for
    /// units that have not published a request are `None`.
    fn broker_requests(&self) -> anyhow::Result<Vec<Option<BrokerRequest>>>;

    /// Hand a broker request to the monitors.
    ///
    /// An implementation may skip sending a request whose ops are identical
    /// to the previous one. No reply is awaited.
    fn send_request(&self, request: BrokerRequest) -> anyhow::Result<()>;

    /// Ask the monitors to republish their pool data.
    fn refresh_pools(&self) -> anyhow::Result<()>;
}

/// Whether this unit leads its peers, and the operator's pending pool refresh.
pub trait Leadership: Send + 'static {
    fn is_leader(&self) -> bool;

    fn refresh_requested(&self) -> bool;

    fn request_refresh(&self) -> anyhow::Result<()>;

    fn clear_refresh(&self) -> anyhow::Result<()>;
}

#[cfg(test)]
pub use fakes::{FakeEndpoint, FakeLeadership};
