// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Running commands on the host, or pretending to.

mod error;
mod executor;
mod input;
mod output;

pub use error::{ExecutionError, FailureInfo};
pub use executor::{
    BoxedExecutor, CommandSequence, Executor, FakeExecutor,
    FakeExecutorBuilder, HostExecutor,
};
pub use input::Input;
pub use output::{Output, OutputExt};

/// The `rbd` binary, resolved through `PATH`.
pub const RBD: &str = "rbd";
