// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Wrappers around the Ceph `rbd` command.
//!
//! Every invocation goes through a [`host::Executor`], so callers can swap the
//! real host for a [`host::FakeExecutor`] under test.

pub mod host;
pub mod rbd;

pub use host::ExecutionError;
