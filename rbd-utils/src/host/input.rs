// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::collections::VecDeque;
use std::process::Command;

/// Wrapper around the input of a [std::process::Command] as strings.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Input {
    pub program: String,
    pub args: VecDeque<String>,
    pub envs: Vec<(String, String)>,
}

impl Input {
    pub fn new<S: Into<String>>(program: S, args: Vec<S>) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().map(|s| s.into()).collect(),
            envs: vec![],
        }
    }

    /// Short-hand for a whitespace-separated string, which can be provided
    /// "like a shell command".
    pub fn shell<S: AsRef<str>>(input: S) -> Self {
        let mut args = shlex::split(input.as_ref()).expect("Invalid input");

        if args.is_empty() {
            panic!("Empty input is invalid");
        }

        Self::new(args.remove(0), args)
    }

    /// Returns true if any argument is exactly `arg`.
    pub fn has_arg(&self, arg: &str) -> bool {
        self.args.iter().any(|a| a == arg)
    }
}

impl std::fmt::Display for Input {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", quote(&self.program))?;
        for arg in &self.args {
            write!(f, " {}", quote(arg))?;
        }
        Ok(())
    }
}

fn quote(s: &str) -> std::borrow::Cow<'_, str> {
    // `try_quote` only fails on interior NUL bytes, which cannot appear in a
    // process argument anyway.
    shlex::try_quote(s).unwrap_or(std::borrow::Cow::Borrowed(s))
}

fn os_str_to_string(s: &std::ffi::OsStr) -> String {
    s.to_string_lossy().to_string()
}

impl From<&Command> for Input {
    fn from(command: &Command) -> Self {
        Self {
            program: os_str_to_string(command.get_program()),
            args: command.get_args().map(os_str_to_string).collect(),
            envs: command
                .get_envs()
                .map(|(k, v)| {
                    (
                        os_str_to_string(k),
                        os_str_to_string(v.unwrap_or_default()),
                    )
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn shell_input_matches_command() {
        let mut cmd = Command::new("rbd");
        cmd.args(["--id", "rbd-mirror.host", "mirror", "pool", "info"]);
        assert_eq!(
            Input::from(&cmd),
            Input::shell("rbd --id rbd-mirror.host mirror pool info")
        );
    }

    #[test]
    fn display_quotes_arguments() {
        let input = Input::new("rbd", vec!["info", "pool/my image"]);
        assert_eq!(input.to_string(), "rbd info 'pool/my image'");
    }
}
