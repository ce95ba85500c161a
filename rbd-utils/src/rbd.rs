// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Utilities for driving RBD pool mirroring.
//!
//! All commands run as a single Ceph client identity (`--id`), which is only
//! authorized against the local cluster. Anything that has to happen on the
//! remote cluster goes through a forwarded broker request instead.

use crate::host::{BoxedExecutor, ExecutionError, Output, RBD};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::process::Command;
use std::str::FromStr;

/// Name of the remote cluster, as configured in the local `ceph.conf` set.
pub const REMOTE_CLUSTER_NAME: &str = "remote";

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
#[error("Failed to parse output: {0}")]
pub struct ParseError(String);

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("rbd execution error")]
    Execution(#[from] ExecutionError),

    #[error(transparent)]
    Parse(#[from] ParseError),
}

impl Error {
    /// The underlying execution failure, if the command ran and failed.
    pub fn execution_error(&self) -> Option<&ExecutionError> {
        match self {
            Error::Execution(err) => Some(err),
            Error::Parse(_) => None,
        }
    }

    /// See [`ExecutionError::operator_message`].
    pub fn operator_message(&self) -> String {
        match self {
            Error::Execution(err) => err.operator_message(),
            Error::Parse(err) => err.to_string(),
        }
    }
}

/// Error returned by [`Rbd::mirror_pool_info`] and the predicates built on it.
#[derive(thiserror::Error, Debug)]
#[error("Failed to get mirroring info for pool '{pool}'")]
pub struct PoolInfoError {
    pub pool: String,
    #[source]
    pub err: Error,
}

/// Error returned by [`Rbd::mirror_pool_status`].
#[derive(thiserror::Error, Debug)]
#[error("Failed to get mirroring status for pool '{pool}'")]
pub struct PoolStatusError {
    pub pool: String,
    #[source]
    pub err: Error,
}

/// The step of [`Rbd::mirror_pool_enable`] that failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EnableStep {
    Enable,
    PeerAdd,
}

impl fmt::Display for EnableStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnableStep::Enable => write!(f, "enable mirroring"),
            EnableStep::PeerAdd => write!(f, "add remote peer"),
        }
    }
}

/// Error returned by [`Rbd::mirror_pool_enable`].
#[derive(thiserror::Error, Debug)]
#[error("Failed to {step} on pool '{pool}' (mode {mode})")]
pub struct EnableError {
    pub pool: String,
    pub mode: MirrorMode,
    pub step: EnableStep,
    #[source]
    pub err: ExecutionError,
}

/// Error returned by [`Rbd::mirror_pool_action`].
#[derive(thiserror::Error, Debug)]
#[error("Failed to {action} pool '{pool}'")]
pub struct PoolActionError {
    pub pool: String,
    pub action: PoolAction,
    #[source]
    pub err: ExecutionError,
}

/// Error returned by the per-image commands.
#[derive(thiserror::Error, Debug)]
#[error("Failed to {operation} '{target}'")]
pub struct ImageError {
    pub operation: &'static str,
    pub target: String,
    #[source]
    pub err: Error,
}

/// Mirroring mode of a pool.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum MirrorMode {
    /// Mirroring is off for the pool.
    Disabled,
    /// Only images explicitly enabled for mirroring are mirrored.
    Image,
    /// Every journaled image in the pool is mirrored.
    #[default]
    Pool,
}

impl MirrorMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            MirrorMode::Disabled => "disabled",
            MirrorMode::Image => "image",
            MirrorMode::Pool => "pool",
        }
    }
}

impl fmt::Display for MirrorMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MirrorMode {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "disabled" => Ok(MirrorMode::Disabled),
            "image" => Ok(MirrorMode::Image),
            "pool" => Ok(MirrorMode::Pool),
            _ => Err(ParseError(format!("Unrecognized mirroring mode: {s}"))),
        }
    }
}

/// A peer registered against a pool's mirroring configuration.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct MirrorPeer {
    pub uuid: String,
    #[serde(alias = "site_name")]
    pub cluster_name: String,
    pub client_name: String,
}

/// Output of `rbd mirror pool info`.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct MirrorPoolInfo {
    pub mode: MirrorMode,
    #[serde(default)]
    pub peers: Vec<MirrorPeer>,
}

/// The `summary` object of `rbd mirror pool status`.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct MirrorPoolStatusSummary {
    pub health: String,
    #[serde(default)]
    pub states: BTreeMap<String, u64>,
}

/// Output of `rbd mirror pool status`.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct MirrorPoolStatus {
    pub summary: MirrorPoolStatusSummary,
}

/// The subset of `rbd info` we care about.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct ImageInfo {
    #[serde(default)]
    pub mirroring: Option<ImageMirroring>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct ImageMirroring {
    pub state: String,
}

impl ImageInfo {
    /// Returns true if mirroring is disabled (or not reported) for the image.
    pub fn mirroring_disabled(&self) -> bool {
        self.mirroring.as_ref().map_or(true, |m| m.state == "disabled")
    }
}

/// Pool-scoped mirroring commands exposed to operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PoolAction {
    Promote,
    Demote,
    Status,
}

impl PoolAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            PoolAction::Promote => "promote",
            PoolAction::Demote => "demote",
            PoolAction::Status => "status",
        }
    }
}

impl fmt::Display for PoolAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output format requested from `rbd`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Plain,
    Json,
}

impl OutputFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Plain => "plain",
            OutputFormat::Json => "json",
        }
    }
}

impl FromStr for OutputFormat {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "plain" => Ok(OutputFormat::Plain),
            "json" => Ok(OutputFormat::Json),
            _ => Err(ParseError(format!("Unrecognized output format: {s}"))),
        }
    }
}

/// Optional flags passed through to a [`PoolAction`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PoolActionFlags {
    pub force: bool,
    pub verbose: bool,
    pub format: Option<OutputFormat>,
}

fn stdout_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

/// Everything a command printed, as an operator would see it on a terminal.
fn combined_output_of(output: &Output) -> String {
    let mut text = stdout_of(output);
    text.push_str(&String::from_utf8_lossy(&output.stderr));
    text.trim_end().to_string()
}

fn parse_json<T: DeserializeOwned>(
    command: &str,
    output: &Output,
) -> Result<T, ParseError> {
    serde_json::from_slice(&output.stdout).map_err(|err| {
        ParseError(format!("invalid JSON from `{command}`: {err}"))
    })
}

/// Wraps `rbd` commands issued as one fixed Ceph client identity.
#[derive(Clone)]
pub struct Rbd {
    executor: BoxedExecutor,
    ceph_id: String,
}

impl fmt::Debug for Rbd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rbd").field("ceph_id", &self.ceph_id).finish()
    }
}

impl Rbd {
    pub fn new(executor: BoxedExecutor, ceph_id: impl Into<String>) -> Self {
        Self { executor, ceph_id: ceph_id.into() }
    }

    /// The Ceph client identity commands run as (without `client.`).
    pub fn ceph_id(&self) -> &str {
        &self.ceph_id
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(RBD);
        cmd.arg("--id").arg(&self.ceph_id);
        cmd
    }

    fn mirror_pool_command(&self) -> Command {
        let mut cmd = self.command();
        cmd.args(["mirror", "pool"]);
        cmd
    }

    /// `rbd mirror pool info --format json <pool>`
    pub fn mirror_pool_info(
        &self,
        pool: &str,
    ) -> Result<MirrorPoolInfo, PoolInfoError> {
        let mut cmd = self.mirror_pool_command();
        cmd.args(["info", "--format", "json", pool]);
        let output = self.executor.execute(&mut cmd).map_err(|err| {
            PoolInfoError { pool: pool.to_string(), err: err.into() }
        })?;
        parse_json(&format!("mirror pool info {pool}"), &output).map_err(
            |err| PoolInfoError { pool: pool.to_string(), err: err.into() },
        )
    }

    /// Returns true if mirroring is enabled on `pool` in exactly `mode`.
    ///
    /// A pool mirroring in some other mode is reported as not enabled, so
    /// that the caller re-asserts the mode it wants.
    pub fn mirror_pool_enabled(
        &self,
        pool: &str,
        mode: MirrorMode,
    ) -> Result<bool, PoolInfoError> {
        Ok(self.mirror_pool_info(pool)?.mode == mode)
    }

    /// Returns true if `pool` has at least one mirroring peer.
    ///
    /// The peers themselves are not inspected.
    pub fn mirror_pool_has_peers(
        &self,
        pool: &str,
    ) -> Result<bool, PoolInfoError> {
        Ok(!self.mirror_pool_info(pool)?.peers.is_empty())
    }

    /// `rbd mirror pool status --format json <pool>`
    pub fn mirror_pool_status(
        &self,
        pool: &str,
    ) -> Result<MirrorPoolStatus, PoolStatusError> {
        let mut cmd = self.mirror_pool_command();
        cmd.args(["status", "--format", "json", pool]);
        let output = self.executor.execute(&mut cmd).map_err(|err| {
            PoolStatusError { pool: pool.to_string(), err: err.into() }
        })?;
        parse_json(&format!("mirror pool status {pool}"), &output).map_err(
            |err| PoolStatusError { pool: pool.to_string(), err: err.into() },
        )
    }

    /// Enable mirroring on `pool` in `mode`, then add the remote cluster as a
    /// peer.
    ///
    /// The two steps are not atomic. If enabling fails, the peer is never
    /// added and the pool is left as it was. If enabling succeeds but adding
    /// the peer fails, the pool is mirroring without a peer. In that case
    /// [`Self::mirror_pool_has_peers`] reports `false` and the next call
    /// retries both steps.
    ///
    /// Retrying relies on the daemon's contract: re-enabling a pool in the
    /// mode it already has is a no-op, and adding a peer again is safe. This
    /// method does not check either.
    pub fn mirror_pool_enable(
        &self,
        pool: &str,
        mode: MirrorMode,
    ) -> Result<(), EnableError> {
        let mut cmd = self.mirror_pool_command();
        cmd.args(["enable", pool, mode.as_str()]);
        self.executor.execute(&mut cmd).map_err(|err| EnableError {
            pool: pool.to_string(),
            mode,
            step: EnableStep::Enable,
            err,
        })?;

        let peer = format!("client.{}@{}", self.ceph_id, REMOTE_CLUSTER_NAME);
        let mut cmd = self.mirror_pool_command();
        cmd.args(["peer", "add", pool, &peer]);
        self.executor.execute(&mut cmd).map_err(|err| EnableError {
            pool: pool.to_string(),
            mode,
            step: EnableStep::PeerAdd,
            err,
        })?;
        Ok(())
    }

    /// `rbd mirror pool <action> [--force] [--verbose] [--format F] <pool>`
    ///
    /// Returns what the command printed: stdout alone when JSON was
    /// requested, otherwise stdout followed by stderr.
    pub fn mirror_pool_action(
        &self,
        pool: &str,
        action: PoolAction,
        flags: &PoolActionFlags,
    ) -> Result<String, PoolActionError> {
        let mut cmd = self.mirror_pool_command();
        cmd.arg(action.as_str());
        if flags.force {
            cmd.arg("--force");
        }
        if flags.verbose {
            cmd.arg("--verbose");
        }
        if let Some(format) = flags.format {
            cmd.args(["--format", format.as_str()]);
        }
        cmd.arg(pool);
        let output = self.executor.execute(&mut cmd).map_err(|err| {
            PoolActionError { pool: pool.to_string(), action, err }
        })?;
        match flags.format {
            Some(OutputFormat::Json) => Ok(stdout_of(&output)),
            _ => Ok(combined_output_of(&output)),
        }
    }

    /// `rbd --format json -p <pool> ls`
    pub fn list_images(&self, pool: &str) -> Result<Vec<String>, ImageError> {
        let mut cmd = self.command();
        cmd.args(["--format", "json", "-p", pool, "ls"]);
        let err = |err: Error| ImageError {
            operation: "list images in pool",
            target: pool.to_string(),
            err,
        };
        let output =
            self.executor.execute(&mut cmd).map_err(|e| err(e.into()))?;
        parse_json(&format!("ls -p {pool}"), &output).map_err(|e| err(e.into()))
    }

    /// `rbd --format json info <pool>/<image>`
    pub fn image_info(
        &self,
        pool: &str,
        image: &str,
    ) -> Result<ImageInfo, ImageError> {
        let target = format!("{pool}/{image}");
        let mut cmd = self.command();
        cmd.args(["--format", "json", "info", &target]);
        let output = self.executor.execute(&mut cmd).map_err(|err| {
            ImageError {
                operation: "get info for image",
                target: target.clone(),
                err: err.into(),
            }
        })?;
        parse_json(&format!("info {target}"), &output).map_err(|err| {
            ImageError {
                operation: "get info for image",
                target: target.clone(),
                err: err.into(),
            }
        })
    }

    /// `rbd mirror image resync <pool>/<image>`
    ///
    /// Returns what the command printed.
    pub fn mirror_image_resync(
        &self,
        pool: &str,
        image: &str,
    ) -> Result<String, ImageError> {
        let target = format!("{pool}/{image}");
        let mut cmd = self.command();
        cmd.args(["mirror", "image", "resync", &target]);
        let output =
            self.executor.execute(&mut cmd).map_err(|err| ImageError {
                operation: "resync image",
                target: target.clone(),
                err: err.into(),
            })?;
        Ok(combined_output_of(&output))
    }
}
