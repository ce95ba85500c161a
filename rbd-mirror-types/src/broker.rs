// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Ceph broker requests: batches of provisioning operations sent to the
//! monitors over a relation.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

/// The only broker protocol version understood here.
pub const BROKER_API_VERSION: u64 = 1;

/// Op kind of a pool creation request.
pub const CREATE_POOL: &str = "create-pool";

const NAME: &str = "name";
const APP_NAME: &str = "app-name";
const MIRRORING_MODE: &str = "rbd-mirroring-mode";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerRequest {
    #[serde(rename = "api-version")]
    pub api_version: u64,
    #[serde(rename = "request-id", default)]
    pub request_id: String,
    #[serde(default)]
    pub ops: Vec<BrokerOp>,
}

impl Default for BrokerRequest {
    fn default() -> Self {
        Self::new()
    }
}

impl BrokerRequest {
    /// An empty request with a fresh request id.
    pub fn new() -> Self {
        Self {
            api_version: BROKER_API_VERSION,
            request_id: Uuid::new_v4().to_string(),
            ops: Vec::new(),
        }
    }

    pub fn add_op(&mut self, op: BrokerOp) {
        self.ops.push(op);
    }

    /// True if both requests ask for the same operations, whatever their ids.
    pub fn same_ops(&self, other: &BrokerRequest) -> bool {
        self.api_version == other.api_version && self.ops == other.ops
    }
}

/// A single broker operation: its kind plus free-form attributes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerOp {
    #[serde(rename = "op")]
    pub kind: String,
    #[serde(flatten)]
    pub attributes: BTreeMap<String, Value>,
}

impl BrokerOp {
    pub fn new(kind: impl Into<String>) -> Self {
        Self { kind: kind.into(), attributes: BTreeMap::new() }
    }

    pub fn with_attribute(
        mut self,
        key: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Build a `create-pool` op for a replicated pool.
    ///
    /// Unset values are left out of the op entirely.
    pub fn create_replicated_pool(
        name: &str,
        replicas: Option<u64>,
        pg_num: Option<u64>,
        app_name: &str,
        max_bytes: Option<u64>,
        max_objects: Option<u64>,
    ) -> Self {
        let mut op = BrokerOp::new(CREATE_POOL)
            .with_attribute(NAME, name)
            .with_attribute(APP_NAME, app_name);
        for (key, value) in [
            ("replicas", replicas),
            ("pg_num", pg_num),
            ("max-bytes", max_bytes),
            ("max-objects", max_objects),
        ] {
            if let Some(value) = value {
                op.attributes.insert(key.to_string(), value.into());
            }
        }
        op
    }

    pub fn attribute(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    fn str_attribute(&self, key: &str) -> Option<&str> {
        self.attribute(key).and_then(Value::as_str)
    }

    pub fn name(&self) -> Option<&str> {
        self.str_attribute(NAME)
    }

    pub fn app_name(&self) -> Option<&str> {
        self.str_attribute(APP_NAME)
    }

    /// The raw `rbd-mirroring-mode` attribute, if present.
    pub fn mirroring_mode(&self) -> Option<&Value> {
        self.attribute(MIRRORING_MODE)
    }

    /// True if every `(key, value)` in `required` is present with an equal
    /// value.
    pub fn matches(&self, required: &BTreeMap<String, Value>) -> bool {
        required
            .iter()
            .all(|(key, value)| self.attributes.get(key) == Some(value))
    }
}
