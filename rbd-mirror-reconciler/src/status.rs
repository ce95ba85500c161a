// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Aggregation of per-pool mirroring status into a single report.

use rbd_utils::rbd::{PoolStatusError, Rbd};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Counts of pool health and image state labels across the mirrored pools.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct MirrorStatusSummary {
    pub pool_health: BTreeMap<String, u64>,
    pub image_states: BTreeMap<String, u64>,
}

/// Outcome of a status check.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "summary", rename_all = "snake_case")]
pub enum MirrorStatus {
    Known(MirrorStatusSummary),
    /// At least one query failed; no partial summary is reported.
    Unknown,
}

/// Query the mirroring status of every pool in `pools` and add it up.
///
/// Any failed query fails the whole summary.
pub fn mirror_pools_summary<'a, I>(
    rbd: &Rbd,
    pools: I,
) -> Result<MirrorStatusSummary, PoolStatusError>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut summary = MirrorStatusSummary::default();
    for pool in pools {
        let status = rbd.mirror_pool_status(pool)?.summary;
        *summary.pool_health.entry(status.health).or_default() += 1;
        for (state, count) in status.states {
            *summary.image_states.entry(state).or_default() += count;
        }
    }
    Ok(summary)
}

/// Operator-facing name of an image state.
///
/// Images in the `stopped` state are primaries; `replaying` ones are
/// secondaries being replicated to.
pub fn display_image_state(state: &str) -> &str {
    match state {
        "stopped" => "Primary",
        "replaying" => "Secondary",
        other => other,
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StatusPolicy {
    /// Report the workload as blocked when any pool's health is not `OK`.
    #[serde(default)]
    pub escalate_unhealthy_pools: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkloadState {
    Active,
    Blocked,
    Waiting,
}

impl fmt::Display for WorkloadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            WorkloadState::Active => "active",
            WorkloadState::Blocked => "blocked",
            WorkloadState::Waiting => "waiting",
        })
    }
}

/// What the unit reports to the operator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct WorkloadStatus {
    pub state: WorkloadState,
    pub message: String,
}

impl fmt::Display for WorkloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.state, self.message)
    }
}

fn render_counts<'a>(
    counts: impl Iterator<Item = (&'a str, u64)>,
) -> Option<String> {
    let rendered = counts
        .map(|(label, count)| format!("{label} ({count})"))
        .collect::<Vec<_>>();
    if rendered.is_empty() {
        None
    } else {
        Some(rendered.join(" "))
    }
}

/// Render a status summary for the operator.
///
/// Returns `None` when the summary is unknown: nothing is reported rather
/// than something misleading.
pub fn assess_status(
    status: &MirrorStatus,
    policy: &StatusPolicy,
) -> Option<WorkloadStatus> {
    let MirrorStatus::Known(summary) = status else {
        return None;
    };
    if summary.pool_health.is_empty() {
        return Some(WorkloadStatus {
            state: WorkloadState::Waiting,
            message: "Waiting for pools to be created".to_string(),
        });
    }

    let unhealthy = summary.pool_health.keys().any(|health| health != "OK");
    let state = if unhealthy && policy.escalate_unhealthy_pools {
        WorkloadState::Blocked
    } else {
        WorkloadState::Active
    };

    let mut parts = Vec::new();
    if let Some(pools) = render_counts(
        summary.pool_health.iter().map(|(h, c)| (h.as_str(), *c)),
    ) {
        parts.push(format!("Pools {pools}"));
    }
    if let Some(images) = render_counts(
        summary
            .image_states
            .iter()
            .map(|(s, c)| (display_image_state(s), *c)),
    ) {
        parts.push(format!("Images {images}"));
    }

    Some(WorkloadStatus {
        state,
        message: format!("Unit is ready ({})", parts.join(" ")),
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use rbd_mirror_test_utils::dev::test_setup_log;
    use rbd_utils::host::{CommandSequence, FakeExecutorBuilder};

    fn summary(
        pool_health: &[(&str, u64)],
        image_states: &[(&str, u64)],
    ) -> MirrorStatus {
        let to_map = |pairs: &[(&str, u64)]| {
            pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
        };
        MirrorStatus::Known(MirrorStatusSummary {
            pool_health: to_map(pool_health),
            image_states: to_map(image_states),
        })
    }

    #[test]
    fn summary_adds_up_states_across_pools() {
        let logctx = test_setup_log("summary_adds_up_states_across_pools");
        let mut seq = CommandSequence::new();
        seq.expect_stdout(
            "rbd --id rbd-mirror.host mirror pool status --format json a",
            r#"{"summary": {"health": "OK", "states": {"stopped": 2}}}"#,
        );
        seq.expect_stdout(
            "rbd --id rbd-mirror.host mirror pool status --format json b",
            r#"{"summary": {"health": "WARN",
                "states": {"stopped": 1, "replaying": 1}}}"#,
        );
        seq.expect_stdout(
            "rbd --id rbd-mirror.host mirror pool status --format json c",
            r#"{"summary": {"health": "OK", "states": {}}}"#,
        );
        let executor = FakeExecutorBuilder::new(logctx.log.clone())
            .with_sequence(seq)
            .build();
        let rbd = Rbd::new(executor.as_executor(), "rbd-mirror.host");

        let summary = mirror_pools_summary(&rbd, ["a", "b", "c"]).unwrap();
        assert_eq!(
            summary.pool_health,
            BTreeMap::from([("OK".to_string(), 2), ("WARN".to_string(), 1)])
        );
        assert_eq!(
            summary.image_states,
            BTreeMap::from([
                ("replaying".to_string(), 1),
                ("stopped".to_string(), 3)
            ])
        );

        logctx.cleanup_successful();
    }

    #[test]
    fn summary_fails_if_any_pool_fails() {
        let logctx = test_setup_log("summary_fails_if_any_pool_fails");
        let mut seq = CommandSequence::new();
        seq.expect_stdout(
            "rbd --id rbd-mirror.host mirror pool status --format json a",
            r#"{"summary": {"health": "OK", "states": {"stopped": 2}}}"#,
        );
        seq.expect_fail(
            "rbd --id rbd-mirror.host mirror pool status --format json b",
        );
        let executor = FakeExecutorBuilder::new(logctx.log.clone())
            .with_sequence(seq)
            .build();
        let rbd = Rbd::new(executor.as_executor(), "rbd-mirror.host");

        let err = mirror_pools_summary(&rbd, ["a", "b"]).unwrap_err();
        assert_eq!(err.pool, "b");

        logctx.cleanup_successful();
    }

    #[test]
    fn ready_message_translates_image_states() {
        let status = assess_status(
            &summary(&[("OK", 1)], &[("stopped", 2)]),
            &StatusPolicy::default(),
        )
        .unwrap();
        assert_eq!(
            status,
            WorkloadStatus {
                state: WorkloadState::Active,
                message: "Unit is ready (Pools OK (1) Images Primary (2))"
                    .to_string(),
            }
        );

        let status = assess_status(
            &summary(
                &[("OK", 1), ("WARN", 1)],
                &[("stopped", 2), ("replaying", 1)],
            ),
            &StatusPolicy::default(),
        )
        .unwrap();
        assert_eq!(status.state, WorkloadState::Active);
        assert!(status.message.contains("OK (1)"), "{}", status.message);
        assert!(status.message.contains("WARN (1)"), "{}", status.message);
        assert!(status.message.contains("Primary (2)"), "{}", status.message);
        assert!(status.message.contains("Secondary (1)"), "{}", status.message);
    }

    #[test]
    fn unknown_labels_pass_through() {
        let status = assess_status(
            &summary(&[("OK", 1)], &[("syncing", 4)]),
            &StatusPolicy::default(),
        )
        .unwrap();
        assert_eq!(
            status.message,
            "Unit is ready (Pools OK (1) Images syncing (4))"
        );

        // A pool without images has no image states at all.
        let status =
            assess_status(&summary(&[("OK", 1)], &[]), &StatusPolicy::default())
                .unwrap();
        assert_eq!(status.message, "Unit is ready (Pools OK (1))");
    }

    #[test]
    fn unhealthy_pools_block_only_when_escalating() {
        let status = summary(&[("OK", 1), ("WARN", 1)], &[("stopped", 1)]);
        let escalate = StatusPolicy { escalate_unhealthy_pools: true };
        assert_eq!(
            assess_status(&status, &escalate).unwrap().state,
            WorkloadState::Blocked
        );
        assert_eq!(
            assess_status(&summary(&[("OK", 3)], &[]), &escalate)
                .unwrap()
                .state,
            WorkloadState::Active
        );
    }

    #[test]
    fn no_pools_means_waiting_and_unknown_means_nothing() {
        assert_eq!(
            assess_status(&summary(&[], &[]), &StatusPolicy::default()),
            Some(WorkloadStatus {
                state: WorkloadState::Waiting,
                message: "Waiting for pools to be created".to_string(),
            })
        );
        assert_eq!(
            assess_status(&MirrorStatus::Unknown, &StatusPolicy::default()),
            None
        );
    }
}
