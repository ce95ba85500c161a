// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The long-lived control loop.

use crate::context::{AgentReconciler, ServerContext};
use crate::relation::write_json_atomic;
use anyhow::Context;
use camino::Utf8Path;
use chrono::{DateTime, Utc};
use display_error_chain::DisplayErrorChain;
use rbd_mirror_reconciler::{TickReport, WorkloadStatus};
use serde::Serialize;
use slog::{info, o, warn, Logger};
use tokio::signal::unix::{signal, SignalKind};
use tokio::time::MissedTickBehavior;

pub const STATUS_FILE: &str = "status.json";

/// Contents of `<state_dir>/status.json`, rewritten after every tick.
#[derive(Debug, Serialize)]
pub struct StatusFile<'a> {
    pub checked_at: DateTime<Utc>,
    pub status: Option<&'a WorkloadStatus>,
    pub report: &'a TickReport,
}

/// Record the outcome of a tick in the status file.
pub fn write_status(
    state_dir: &Utf8Path,
    report: &TickReport,
) -> anyhow::Result<()> {
    let status = StatusFile {
        checked_at: Utc::now(),
        status: report.status.as_ref(),
        report,
    };
    std::fs::create_dir_all(state_dir)
        .with_context(|| format!("creating {state_dir}"))?;
    write_json_atomic(&state_dir.join(STATUS_FILE), &status)
}

/// Run one tick and record it.
pub fn tick_and_record(
    reconciler: &AgentReconciler,
    state_dir: &Utf8Path,
    log: &Logger,
) -> TickReport {
    let report = reconciler.tick();
    if let Err(err) = write_status(state_dir, &report) {
        warn!(
            log,
            "failed to write status file";
            "error" => %DisplayErrorChain::new(AsRef::<dyn std::error::Error>::as_ref(&err)),
        );
    }
    report
}

/// Tick every `tick_interval_secs`, or immediately on SIGHUP, until Ctrl-C.
///
/// Each tick runs on the blocking pool. The loop waits for it to finish, so
/// at most one tick is ever in progress and signals are only acted on
/// between ticks.
pub async fn run(ctx: ServerContext) -> anyhow::Result<()> {
    let log = ctx.log.new(o!("component" => "Agent"));
    let state_dir = ctx.config.state_dir.clone();
    let mut reconciler = ctx.reconciler();

    let mut interval = tokio::time::interval(ctx.config.tick_interval());
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut hangup = signal(SignalKind::hangup())
        .context("installing SIGHUP handler")?;

    info!(
        log,
        "starting";
        "tick_interval" => ?ctx.config.tick_interval(),
    );
    loop {
        let cause = tokio::select! {
            _ = interval.tick() => "interval",
            Some(()) = hangup.recv() => "hangup",
            result = tokio::signal::ctrl_c() => {
                result.context("waiting for Ctrl-C")?;
                info!(log, "shutting down");
                return Ok(());
            }
        };

        let tick_log = log.new(o!("cause" => cause));
        let tick_dir = state_dir.clone();
        let (returned, report) = tokio::task::spawn_blocking(move || {
            let report = tick_and_record(&reconciler, &tick_dir, &tick_log);
            (reconciler, report)
        })
        .await
        .context("reconciler tick panicked")?;
        reconciler = returned;

        info!(
            log,
            "tick finished";
            "cause" => cause,
            "actions" => ?report.actions,
            "errors" => report.errors.len(),
        );
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::Config;
    use camino_tempfile::Utf8TempDir;
    use dropshot::{ConfigLogging, ConfigLoggingLevel};
    use rbd_mirror_test_utils::dev::test_setup_log;
    use rbd_mirror_types::BrokerRequest;
    use rbd_utils::host::{CommandSequence, FakeExecutorBuilder};

    const ID: &str = "rbd-mirror.testhost";

    fn config(state_dir: &Utf8Path) -> Config {
        Config {
            state_dir: state_dir.to_owned(),
            tick_interval_secs: 300,
            command_timeout_secs: None,
            log: ConfigLogging::StderrTerminal {
                level: ConfigLoggingLevel::Info,
            },
            status: Default::default(),
        }
    }

    fn write(path: impl AsRef<Utf8Path>, contents: &str) {
        let path = path.as_ref();
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }

    #[test]
    fn tick_over_relation_files() {
        let logctx = test_setup_log("tick_over_relation_files");
        let dir = Utf8TempDir::new().unwrap();
        let state = dir.path();
        write(state.join("leader"), "");
        write(
            state.join("ceph-local/pools.json"),
            r#"{
                "cinder-ceph": {
                    "applications": {"rbd": {}},
                    "parameters": {"size": 3, "pg_num": 32},
                    "quota": {"max_bytes": 1024}
                },
                "objects": {"applications": {"rgw": {}}}
            }"#,
        );
        write(state.join("ceph-remote/pools.json"), "{}");
        write(state.join("ceph-remote/broker-requests.json"), "[null]");

        let mut seq = CommandSequence::new();
        seq.expect_stdout(
            format!(
                "rbd --id {ID} mirror pool info --format json cinder-ceph"
            ),
            r#"{"mode": "disabled"}"#,
        );
        seq.expect_ok(format!(
            "rbd --id {ID} mirror pool enable cinder-ceph pool"
        ));
        seq.expect_ok(format!(
            "rbd --id {ID} mirror pool peer add cinder-ceph client.{ID}@remote"
        ));
        seq.expect_stdout(
            format!(
                "rbd --id {ID} mirror pool status --format json cinder-ceph"
            ),
            r#"{"summary": {"health": "OK", "states": {"stopped": 4}}}"#,
        );
        let executor = FakeExecutorBuilder::new(logctx.log.clone())
            .with_sequence(seq)
            .build();
        let ctx = ServerContext::with_executor(
            config(state),
            logctx.log.clone(),
            executor.as_executor(),
            ID.to_string(),
        );

        let report = tick_and_record(&ctx.reconciler(), state, &logctx.log);
        assert!(report.errors.is_empty(), "{:?}", report.errors);

        let sent: BrokerRequest = serde_json::from_str(
            &std::fs::read_to_string(
                state.join("ceph-remote/outgoing-request.json"),
            )
            .unwrap(),
        )
        .unwrap();
        assert_eq!(
            serde_json::to_value(&sent.ops).unwrap(),
            serde_json::json!([{
                "op": "create-pool",
                "name": "cinder-ceph",
                "app-name": "rbd",
                "replicas": 3,
                "pg_num": 32,
                "max-bytes": 1024
            }])
        );

        let status: serde_json::Value = serde_json::from_str(
            &std::fs::read_to_string(state.join(STATUS_FILE)).unwrap(),
        )
        .unwrap();
        assert_eq!(status["status"]["state"], "active");
        assert_eq!(
            status["status"]["message"],
            "Unit is ready (Pools OK (1) Images Primary (4))"
        );
        assert!(status["checked_at"].is_string());

        logctx.cleanup_successful();
    }
}
