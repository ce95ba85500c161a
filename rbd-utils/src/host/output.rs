// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;

pub type Output = std::process::Output;

/// Builders for canned `rbd` results handed out by a
/// [`FakeExecutor`](super::FakeExecutor).
pub trait OutputExt: Sized {
    /// Exited with `code`, printing nothing.
    fn exited(code: i32) -> Self;

    fn success() -> Self {
        Self::exited(0)
    }

    /// The status `rbd` exits with for most errors.
    fn failure() -> Self {
        Self::exited(1)
    }

    fn set_stdout<S: AsRef<str>>(self, stdout: S) -> Self;
    fn set_stderr<S: AsRef<str>>(self, stderr: S) -> Self;

    /// Stdout as `rbd --format json` prints it.
    fn set_json(self, value: &serde_json::Value) -> Self {
        self.set_stdout(value.to_string())
    }
}

impl OutputExt for Output {
    fn exited(code: i32) -> Self {
        // The raw wait status keeps the exit code in its second byte.
        Output {
            status: ExitStatus::from_raw((code & 0xff) << 8),
            stdout: vec![],
            stderr: vec![],
        }
    }

    fn set_stdout<S: AsRef<str>>(mut self, stdout: S) -> Self {
        self.stdout = stdout.as_ref().as_bytes().to_vec();
        self
    }

    fn set_stderr<S: AsRef<str>>(mut self, stderr: S) -> Self {
        self.stderr = stderr.as_ref().as_bytes().to_vec();
        self
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn exit_codes() {
        assert!(Output::success().status.success());
        assert_eq!(Output::failure().status.code(), Some(1));
        assert_eq!(Output::exited(22).status.code(), Some(22));
    }

    #[test]
    fn json_stdout() {
        let output = Output::success().set_json(&json!({"mode": "image"}));
        let parsed: serde_json::Value =
            serde_json::from_slice(&output.stdout).unwrap();
        assert_eq!(parsed["mode"], "image");
        assert!(output.stderr.is_empty());
    }
}
