// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! File-backed relations and leadership.
//!
//! Whatever delivers relation data drops it under the state directory:
//!
//! ```text
//! <state_dir>/leader                        on the leader unit
//! <state_dir>/refresh-pools                 pending operator refresh
//! <state_dir>/<endpoint>/pools.json         pool directory
//! <state_dir>/<endpoint>/broker-requests.json
//! <state_dir>/<endpoint>/outgoing-request.json  written by us
//! <state_dir>/<endpoint>/refresh-requested      touched by us
//! ```
//!
//! An endpoint is available exactly when its `pools.json` exists.

use anyhow::Context;
use camino::{Utf8Path, Utf8PathBuf};
use rbd_mirror_reconciler::facilities::{ClusterEndpoint, Leadership};
use rbd_mirror_types::{BrokerRequest, PoolDirectory};
use serde::Serialize;
use slog::{debug, info, o, warn, Logger};
use std::io::ErrorKind;

pub const LOCAL_ENDPOINT: &str = "ceph-local";
pub const REMOTE_ENDPOINT: &str = "ceph-remote";

const POOLS_FILE: &str = "pools.json";
const BROKER_REQUESTS_FILE: &str = "broker-requests.json";
const OUTGOING_REQUEST_FILE: &str = "outgoing-request.json";
const REFRESH_REQUESTED_FILE: &str = "refresh-requested";
const LEADER_FILE: &str = "leader";
const REFRESH_POOLS_FILE: &str = "refresh-pools";

/// Write `value` as JSON to `path`, replacing it atomically.
pub fn write_json_atomic<T: Serialize>(
    path: &Utf8Path,
    value: &T,
) -> anyhow::Result<()> {
    let data = serde_json::to_vec_pretty(value)
        .with_context(|| format!("serializing {path}"))?;
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, data).with_context(|| format!("writing {tmp}"))?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("renaming {tmp} to {path}"))
}

/// Read `path`, treating a missing file as `None`.
fn read_optional(path: &Utf8Path) -> anyhow::Result<Option<String>> {
    match std::fs::read_to_string(path) {
        Ok(data) => Ok(Some(data)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err).with_context(|| format!("reading {path}")),
    }
}

fn touch(path: &Utf8Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {parent}"))?;
    }
    std::fs::write(path, b"").with_context(|| format!("creating {path}"))
}

fn remove_if_present(path: &Utf8Path) -> anyhow::Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err).with_context(|| format!("removing {path}")),
    }
}

/// A [`ClusterEndpoint`] backed by files under `<state_dir>/<name>`.
#[derive(Debug)]
pub struct FileEndpoint {
    name: String,
    dir: Utf8PathBuf,
    log: Logger,
}

impl FileEndpoint {
    pub fn new(state_dir: &Utf8Path, name: &str, log: &Logger) -> Self {
        Self {
            name: name.to_string(),
            dir: state_dir.join(name),
            log: log.new(o!("endpoint" => name.to_string())),
        }
    }

    pub fn dir(&self) -> &Utf8Path {
        &self.dir
    }
}

impl ClusterEndpoint for FileEndpoint {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_available(&self) -> bool {
        self.dir.join(POOLS_FILE).exists()
    }

    fn pools(&self) -> anyhow::Result<PoolDirectory> {
        let path = self.dir.join(POOLS_FILE);
        let data = std::fs::read_to_string(&path)
            .with_context(|| format!("reading {path}"))?;
        PoolDirectory::from_json(&data)
            .with_context(|| format!("parsing {path}"))
    }

    fn broker_requests(&self) -> anyhow::Result<Vec<Option<BrokerRequest>>> {
        let path = self.dir.join(BROKER_REQUESTS_FILE);
        match read_optional(&path)? {
            Some(data) => serde_json::from_str(&data)
                .with_context(|| format!("parsing {path}")),
            None => Ok(Vec::new()),
        }
    }

    fn send_request(&self, request: BrokerRequest) -> anyhow::Result<()> {
        let path = self.dir.join(OUTGOING_REQUEST_FILE);
        if let Some(data) = read_optional(&path)? {
            match serde_json::from_str::<BrokerRequest>(&data) {
                Ok(previous) if previous.same_ops(&request) => {
                    debug!(
                        self.log,
                        "broker request unchanged, not resending";
                        "request_id" => &previous.request_id,
                    );
                    return Ok(());
                }
                Ok(_) => (),
                Err(err) => {
                    warn!(
                        self.log,
                        "replacing unreadable outgoing request";
                        "path" => %path,
                        "error" => %err,
                    );
                }
            }
        }
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("creating {}", self.dir))?;
        write_json_atomic(&path, &request)?;
        info!(
            self.log,
            "sent broker request";
            "request_id" => &request.request_id,
            "ops" => request.ops.len(),
        );
        Ok(())
    }

    fn refresh_pools(&self) -> anyhow::Result<()> {
        touch(&self.dir.join(REFRESH_REQUESTED_FILE))
    }
}

/// A [`Leadership`] backed by marker files in the state directory.
#[derive(Debug)]
pub struct FileLeadership {
    state_dir: Utf8PathBuf,
}

impl FileLeadership {
    pub fn new(state_dir: &Utf8Path) -> Self {
        Self { state_dir: state_dir.to_owned() }
    }
}

impl Leadership for FileLeadership {
    fn is_leader(&self) -> bool {
        self.state_dir.join(LEADER_FILE).exists()
    }

    fn refresh_requested(&self) -> bool {
        self.state_dir.join(REFRESH_POOLS_FILE).exists()
    }

    fn request_refresh(&self) -> anyhow::Result<()> {
        touch(&self.state_dir.join(REFRESH_POOLS_FILE))
    }

    fn clear_refresh(&self) -> anyhow::Result<()> {
        remove_if_present(&self.state_dir.join(REFRESH_POOLS_FILE))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use camino_tempfile::Utf8TempDir;
    use rbd_mirror_test_utils::dev::test_setup_log;
    use rbd_mirror_types::BrokerOp;

    fn create_pool(name: &str) -> BrokerOp {
        BrokerOp::create_replicated_pool(name, Some(3), None, "rbd", None, None)
    }

    #[test]
    fn endpoint_reads_relation_files() {
        let logctx = test_setup_log("endpoint_reads_relation_files");
        let dir = Utf8TempDir::new().unwrap();
        let endpoint =
            FileEndpoint::new(dir.path(), LOCAL_ENDPOINT, &logctx.log);

        assert!(!endpoint.is_available());
        assert!(endpoint.broker_requests().unwrap().is_empty());

        std::fs::create_dir_all(endpoint.dir()).unwrap();
        std::fs::write(
            endpoint.dir().join(POOLS_FILE),
            r#"{"cinder-ceph": {"applications": {"rbd": {}}}}"#,
        )
        .unwrap();
        std::fs::write(
            endpoint.dir().join(BROKER_REQUESTS_FILE),
            r#"[null, {"api-version": 1, "request-id": "x", "ops": []}]"#,
        )
        .unwrap();

        assert!(endpoint.is_available());
        let pools = endpoint.pools().unwrap();
        assert!(pools.get("cinder-ceph").unwrap().has_application("rbd"));
        let requests = endpoint.broker_requests().unwrap();
        assert_eq!(requests.len(), 2);
        assert!(requests[0].is_none());

        std::fs::write(endpoint.dir().join(POOLS_FILE), "[]").unwrap();
        let err = endpoint.pools().unwrap_err();
        assert!(format!("{err:#}").contains(POOLS_FILE), "{err:#}");

        logctx.cleanup_successful();
    }

    #[test]
    fn send_request_skips_identical_ops() {
        let logctx = test_setup_log("send_request_skips_identical_ops");
        let dir = Utf8TempDir::new().unwrap();
        let endpoint =
            FileEndpoint::new(dir.path(), REMOTE_ENDPOINT, &logctx.log);
        let path = endpoint.dir().join(OUTGOING_REQUEST_FILE);
        let written = || -> BrokerRequest {
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap())
                .unwrap()
        };

        let mut first = BrokerRequest::new();
        first.add_op(create_pool("a"));
        endpoint.send_request(first.clone()).unwrap();
        assert_eq!(written(), first);

        // Same ops under a new request id: the first request stays.
        let mut second = BrokerRequest::new();
        second.add_op(create_pool("a"));
        endpoint.send_request(second).unwrap();
        assert_eq!(written().request_id, first.request_id);

        let mut third = BrokerRequest::new();
        third.add_op(create_pool("a"));
        third.add_op(create_pool("b"));
        endpoint.send_request(third.clone()).unwrap();
        assert_eq!(written(), third);

        logctx.cleanup_successful();
    }

    #[test]
    fn leadership_markers() {
        let dir = Utf8TempDir::new().unwrap();
        let leadership = FileLeadership::new(dir.path());
        assert!(!leadership.is_leader());
        assert!(!leadership.refresh_requested());

        touch(&dir.path().join(LEADER_FILE)).unwrap();
        assert!(leadership.is_leader());

        leadership.request_refresh().unwrap();
        assert!(leadership.refresh_requested());
        leadership.clear_refresh().unwrap();
        assert!(!leadership.refresh_requested());
        // Clearing twice is fine.
        leadership.clear_refresh().unwrap();
    }

    #[test]
    fn refresh_pools_touches_marker() {
        let logctx = test_setup_log("refresh_pools_touches_marker");
        let dir = Utf8TempDir::new().unwrap();
        let endpoint =
            FileEndpoint::new(dir.path(), LOCAL_ENDPOINT, &logctx.log);
        endpoint.refresh_pools().unwrap();
        assert!(endpoint.dir().join(REFRESH_REQUESTED_FILE).exists());
        logctx.cleanup_successful();
    }
}
