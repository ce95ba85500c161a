// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Facilities for the command-line entry point.

use display_error_chain::DisplayErrorChain;

/// Represents a fatal error from a command.
#[derive(Debug)]
pub enum CmdError {
    /// A failure while starting up or running the agent
    Failure(anyhow::Error),
    /// An operator action failed; the message is shown as-is
    Action(String),
}

impl CmdError {
    fn message(&self) -> String {
        match self {
            CmdError::Action(msg) => msg.clone(),
            CmdError::Failure(err) => {
                DisplayErrorChain::new(AsRef::<dyn std::error::Error>::as_ref(&err)).to_string()
            }
        }
    }
}

/// Exits the current process on a fatal error.
pub fn fatal(cmd_error: CmdError) -> ! {
    let arg0 = std::env::args().next().unwrap_or_else(|| "command".into());
    let arg0 = arg0.rsplit('/').next().unwrap_or(&arg0).to_string();
    eprintln!("{}: {}", arg0, cmd_error.message());
    std::process::exit(1);
}
