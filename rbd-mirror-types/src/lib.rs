// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Records exchanged with the Ceph monitors over the local and remote
//! relations.
//!
//! Both the pool directory and broker requests arrive as loosely-typed JSON.
//! They are parsed here into explicit types, and anything that does not fit
//! is rejected at that boundary.

pub mod broker;
pub mod pool;

pub use broker::{BrokerOp, BrokerRequest, BROKER_API_VERSION, CREATE_POOL};
pub use pool::{Pool, PoolDirectory, PoolParameters, PoolQuota};
