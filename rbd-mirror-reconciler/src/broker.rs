// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Collapsing and interpreting the broker request queues of the two
//! relations.

use rbd_mirror_types::{
    BrokerOp, BrokerRequest, BROKER_API_VERSION, CREATE_POOL,
};
use rbd_utils::rbd::MirrorMode;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// A broker request that cannot be interpreted.
///
/// These are protocol violations: they are never retried, and they fail the
/// operation that encountered them.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum BrokerRequestError {
    #[error(
        "broker request {request_id:?} uses api-version {found}, \
         only {} is supported",
        BROKER_API_VERSION
    )]
    UnsupportedApiVersion { request_id: String, found: u64 },

    #[error("{kind} op for pool {pool:?} has invalid {attribute}: {value}")]
    InvalidAttribute {
        kind: String,
        pool: String,
        attribute: &'static str,
        value: Value,
    },
}

fn check_api_version(
    request: &BrokerRequest,
) -> Result<(), BrokerRequestError> {
    if request.api_version != BROKER_API_VERSION {
        return Err(BrokerRequestError::UnsupportedApiVersion {
            request_id: request.request_id.clone(),
            found: request.api_version,
        });
    }
    Ok(())
}

/// Gather the ops of `requests` whose kind is in `allowed_ops` and whose
/// attributes include every pair in `require`, into one new request.
///
/// Missing entries (`None`) in the queue are skipped. Ops keep the order in
/// which they are encountered. Returns `Ok(None)` if no op matched.
pub fn collapse_and_filter_broker_requests(
    requests: &[Option<BrokerRequest>],
    allowed_ops: &BTreeSet<&str>,
    require: &BTreeMap<String, Value>,
) -> Result<Option<BrokerRequest>, BrokerRequestError> {
    let mut collapsed: Option<BrokerRequest> = None;
    for request in requests.iter().flatten() {
        check_api_version(request)?;
        for op in &request.ops {
            if allowed_ops.contains(op.kind.as_str()) && op.matches(require) {
                collapsed
                    .get_or_insert_with(BrokerRequest::new)
                    .add_op(op.clone());
            }
        }
    }
    Ok(collapsed)
}

fn creates_pool(op: &BrokerOp) -> Option<&str> {
    if op.kind == CREATE_POOL {
        op.name()
    } else {
        None
    }
}

/// The mirroring mode requested for `pool`.
///
/// The first `create-pool` op for `pool` that carries a mode decides it.
/// Pools nobody asked for a mode on mirror in [`MirrorMode::Pool`] mode.
pub fn pool_mirroring_mode(
    pool: &str,
    requests: &[Option<&BrokerRequest>],
) -> Result<MirrorMode, BrokerRequestError> {
    for request in requests.iter().flatten() {
        check_api_version(request)?;
        for op in &request.ops {
            if creates_pool(op) != Some(pool) {
                continue;
            }
            let Some(mode) = op.mirroring_mode() else {
                continue;
            };
            let invalid = || BrokerRequestError::InvalidAttribute {
                kind: op.kind.clone(),
                pool: pool.to_string(),
                attribute: "rbd-mirroring-mode",
                value: mode.clone(),
            };
            let mode = mode.as_str().ok_or_else(invalid)?;
            return mode.parse().map_err(|_| invalid());
        }
    }
    Ok(MirrorMode::default())
}

/// Names of the pools a request asks to create.
pub fn pools_in_broker_request(request: &BrokerRequest) -> BTreeSet<String> {
    request.ops.iter().filter_map(creates_pool).map(String::from).collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    fn request(value: Value) -> Option<BrokerRequest> {
        serde_json::from_value(value).unwrap()
    }

    fn rbd_requirement() -> BTreeMap<String, Value> {
        BTreeMap::from([("app-name".to_string(), json!("rbd"))])
    }

    fn queue() -> Vec<Option<BrokerRequest>> {
        vec![
            request(json!({
                "api-version": 1,
                "ops": [{
                    "op": "create-pool", "name": "pool-rq0", "app-name": "rbd"
                }]
            })),
            request(json!({
                "api-version": 1,
                "ops": [{
                    "op": "create-pool",
                    "name": "pool-rq1",
                    "app-name": "notrbd"
                }]
            })),
            None,
            request(json!({
                "api-version": 1,
                "ops": [
                    {"op": "set-key-permissions", "app-name": "rbd"},
                    {
                        "op": "create-pool",
                        "name": "pool-rq2",
                        "app-name": "rbd",
                        "someotherkey": "value"
                    }
                ]
            })),
        ]
    }

    #[test]
    fn collapse_keeps_matching_ops_in_order() {
        let allowed = BTreeSet::from([CREATE_POOL]);
        let rq = collapse_and_filter_broker_requests(
            &queue(),
            &allowed,
            &rbd_requirement(),
        )
        .unwrap()
        .expect("some ops matched");

        assert_eq!(rq.api_version, BROKER_API_VERSION);
        let names: Vec<_> = rq.ops.iter().map(|op| op.name()).collect();
        assert_eq!(names, [Some("pool-rq0"), Some("pool-rq2")]);
        assert_eq!(rq.ops[1].attribute("someotherkey"), Some(&json!("value")));

        let mut require = rbd_requirement();
        require.insert("someotherkey".to_string(), json!("value"));
        let rq =
            collapse_and_filter_broker_requests(&queue(), &allowed, &require)
                .unwrap()
                .unwrap();
        assert_eq!(rq.ops.len(), 1);
        assert_eq!(rq.ops[0].name(), Some("pool-rq2"));
    }

    #[test]
    fn collapse_with_nothing_matching() {
        let allowed = BTreeSet::from(["delete-pool"]);
        assert_eq!(
            collapse_and_filter_broker_requests(
                &queue(),
                &allowed,
                &rbd_requirement()
            ),
            Ok(None)
        );
        assert_eq!(
            collapse_and_filter_broker_requests(
                &[None, None],
                &BTreeSet::from([CREATE_POOL]),
                &rbd_requirement()
            ),
            Ok(None)
        );
    }

    #[test]
    fn collapse_rejects_other_api_versions() {
        let mut requests = queue();
        requests.push(request(json!({
            "api-version": 2,
            "request-id": "future",
            "ops": []
        })));
        let err = collapse_and_filter_broker_requests(
            &requests,
            &BTreeSet::from([CREATE_POOL]),
            &rbd_requirement(),
        )
        .unwrap_err();
        assert_eq!(
            err,
            BrokerRequestError::UnsupportedApiVersion {
                request_id: "future".to_string(),
                found: 2,
            }
        );
    }

    #[test]
    fn mirroring_mode_from_first_op_with_a_mode() {
        let rq1 = request(json!({
            "api-version": 1,
            "request-id": "broker_rq1",
            "ops": [{
                "op": "create-pool",
                "name": "pool-rq0",
                "app-name": "rbd-pool",
                "rbd-mirroring-mode": "pool"
            }]
        }))
        .unwrap();
        let rq2 = request(json!({
            "api-version": 1,
            "request-id": "broker_rq2",
            "ops": [
                {"op": "create-pool", "name": "pool-rq1", "app-name": "rbd"},
                {
                    "op": "create-pool",
                    "name": "pool-rq1",
                    "app-name": "rbd-image",
                    "rbd-mirroring-mode": "image"
                },
                {
                    "op": "create-pool",
                    "name": "pool-rq1",
                    "rbd-mirroring-mode": "pool"
                }
            ]
        }))
        .unwrap();
        let requests = [Some(&rq1), Some(&rq2), None];

        assert_eq!(
            pool_mirroring_mode("pool-rq0", &requests),
            Ok(MirrorMode::Pool)
        );
        assert_eq!(
            pool_mirroring_mode("pool-rq1", &requests),
            Ok(MirrorMode::Image)
        );
        assert_eq!(
            pool_mirroring_mode("unrequested", &requests),
            Ok(MirrorMode::Pool)
        );
        assert_eq!(
            pool_mirroring_mode("any", &[None, None]),
            Ok(MirrorMode::Pool)
        );
    }

    #[test]
    fn mirroring_mode_rejects_garbage() {
        let rq = request(json!({
            "api-version": 1,
            "ops": [{
                "op": "create-pool",
                "name": "p",
                "rbd-mirroring-mode": "journal"
            }]
        }))
        .unwrap();
        assert_matches!(
            pool_mirroring_mode("p", &[Some(&rq)]),
            Err(BrokerRequestError::InvalidAttribute { pool, .. }) => {
                assert_eq!(pool, "p");
            }
        );

        let rq = BrokerRequest { api_version: 0, ..BrokerRequest::new() };
        assert_matches!(
            pool_mirroring_mode("p", &[Some(&rq)]),
            Err(BrokerRequestError::UnsupportedApiVersion { found: 0, .. })
        );
    }

    #[test]
    fn pools_in_request() {
        let rq = queue().remove(3).unwrap();
        assert_eq!(
            pools_in_broker_request(&rq),
            BTreeSet::from(["pool-rq2".to_string()])
        );
        assert!(pools_in_broker_request(&BrokerRequest::new()).is_empty());
    }
}
