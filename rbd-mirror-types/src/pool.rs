// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The pool directory published by the Ceph monitors.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// A pool as described by the monitors.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Pool {
    pub name: String,
    /// Application tags enabled on the pool (`rbd`, `rgw`, `cephfs`, ...).
    pub applications: BTreeSet<String>,
    pub parameters: PoolParameters,
    pub quota: PoolQuota,
}

impl Pool {
    pub fn new<I, S>(name: impl Into<String>, applications: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            applications: applications.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn has_application(&self, application: &str) -> bool {
        self.applications.contains(application)
    }
}

/// Creation parameters of a pool.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct PoolParameters {
    /// Replica count.
    #[serde(default, deserialize_with = "deserialize_opt_u64")]
    pub size: Option<u64>,
    #[serde(default, deserialize_with = "deserialize_opt_u64")]
    pub pg_num: Option<u64>,
    /// Present only for erasure-coded pools. A present `null` still counts.
    #[serde(default, deserialize_with = "deserialize_present")]
    pub erasure_code_profile: Option<Value>,
    /// Everything else the monitors published, kept as-is.
    #[serde(flatten)]
    pub other: BTreeMap<String, Value>,
}

impl PoolParameters {
    pub fn is_erasure_coded(&self) -> bool {
        self.erasure_code_profile.is_some()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct PoolQuota {
    #[serde(default, deserialize_with = "deserialize_opt_u64")]
    pub max_bytes: Option<u64>,
    #[serde(default, deserialize_with = "deserialize_opt_u64")]
    pub max_objects: Option<u64>,
}

/// Pools keyed by name.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PoolDirectory(BTreeMap<String, Pool>);

impl PoolDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse the JSON object published by the monitors.
    ///
    /// A single malformed pool rejects the whole directory.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn insert(&mut self, pool: Pool) {
        self.0.insert(pool.name.clone(), pool);
    }

    pub fn get(&self, name: &str) -> Option<&Pool> {
        self.0.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Pools in name order.
    pub fn iter(&self) -> impl Iterator<Item = &Pool> + '_ {
        self.0.values()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.0.keys().map(String::as_str)
    }
}

impl FromIterator<Pool> for PoolDirectory {
    fn from_iter<T: IntoIterator<Item = Pool>>(iter: T) -> Self {
        Self(iter.into_iter().map(|pool| (pool.name.clone(), pool)).collect())
    }
}

impl<'a> IntoIterator for &'a PoolDirectory {
    type Item = &'a Pool;
    type IntoIter = std::collections::btree_map::Values<'a, String, Pool>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.values()
    }
}

/// `applications` is published either as a map keyed by tag or as a list.
#[derive(Deserialize)]
#[serde(untagged)]
enum Applications {
    Map(BTreeMap<String, Value>),
    List(Vec<String>),
}

#[derive(Deserialize)]
struct WirePool {
    #[serde(default)]
    applications: Option<Applications>,
    #[serde(default)]
    parameters: Option<PoolParameters>,
    #[serde(default)]
    quota: Option<PoolQuota>,
}

impl WirePool {
    fn into_pool(self, name: String) -> Pool {
        let applications = match self.applications {
            Some(Applications::Map(map)) => map.into_keys().collect(),
            Some(Applications::List(list)) => list.into_iter().collect(),
            None => BTreeSet::new(),
        };
        Pool {
            name,
            applications,
            parameters: self.parameters.unwrap_or_default(),
            quota: self.quota.unwrap_or_default(),
        }
    }
}

impl<'de> Deserialize<'de> for PoolDirectory {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let wire = BTreeMap::<String, WirePool>::deserialize(deserializer)?;
        Ok(Self(
            wire.into_iter()
                .map(|(name, pool)| (name.clone(), pool.into_pool(name)))
                .collect(),
        ))
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum IntOrString {
    Int(u64),
    String(String),
}

/// `Some` whenever the key is present, `null` included.
fn deserialize_present<'de, D>(
    deserializer: D,
) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

/// Integers may be published as JSON numbers or as decimal strings.
fn deserialize_opt_u64<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<IntOrString>::deserialize(deserializer)? {
        None => Ok(None),
        Some(IntOrString::Int(value)) => Ok(Some(value)),
        Some(IntOrString::String(s)) => s.trim().parse().map(Some).map_err(
            |_| D::Error::custom(format!("expected an integer, got {s:?}")),
        ),
    }
}
