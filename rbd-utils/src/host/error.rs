// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::host::input::Input;
use crate::host::output::Output;
use std::process::Command;
use std::time::Duration;

#[derive(Debug)]
pub struct FailureInfo {
    pub command: String,
    pub status: std::process::ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl FailureInfo {
    /// Everything the command printed, stdout first.
    ///
    /// `rbd` reports most failures on stderr, but operators expect to see
    /// both streams when an action fails.
    pub fn combined_output(&self) -> String {
        let stdout = self.stdout.trim_end();
        let stderr = self.stderr.trim_end();
        match (stdout.is_empty(), stderr.is_empty()) {
            (true, true) => String::new(),
            (false, true) => stdout.to_string(),
            (true, false) => stderr.to_string(),
            (false, false) => format!("{stdout}\n{stderr}"),
        }
    }
}

impl std::fmt::Display for FailureInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "Command [{}] executed and failed with status: {}",
            self.command, self.status
        )?;
        write!(f, "  stdout: {}", self.stdout)?;
        write!(f, "  stderr: {}", self.stderr)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ExecutionError {
    #[error("Failed to start execution of [{command}]: {err}")]
    ExecutionStart { command: String, err: std::io::Error },

    #[error("{0}")]
    CommandFailure(Box<FailureInfo>),

    #[error("Command [{command}] did not complete within {timeout:?}")]
    Timeout { command: String, timeout: Duration },

    #[error("Failed to parse output of [{command}]: {reason}")]
    ParseFailure { command: String, reason: String },
}

impl ExecutionError {
    pub fn from_output(command: &Command, output: &Output) -> Self {
        Self::CommandFailure(Box::new(FailureInfo {
            command: Input::from(command).to_string(),
            status: output.status,
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        }))
    }

    /// The text an operator should see for this failure.
    ///
    /// For commands that ran and failed this is what the command printed;
    /// otherwise it is the error's own description.
    pub fn operator_message(&self) -> String {
        match self {
            ExecutionError::CommandFailure(info) => {
                let output = info.combined_output();
                if output.is_empty() {
                    info.to_string()
                } else {
                    output
                }
            }
            other => other.to_string(),
        }
    }
}
