//! # Context Protocol
//!
//! `ContextMap` is the universal in-band payload between the executor and
//! processors: a flat string-to-string mapping carried as a JSON object.
//! Keys partition into telemetry (reserved `task.*`, `diagnosis.*`, `pod.*`,
//! `container`, `node`), opaque user parameters, and processor-emitted
//! results (`<domain>.<processor>.<field>`).
//!
//! The map is ordered (BTreeMap) so that serialization is deterministic and
//! a JSON round trip reproduces the original mapping byte for byte.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Hard cap on a serialized ContextMap crossing the wire in either
/// direction. A payload of exactly this size is legal; one byte more is a
/// protocol violation.
pub const MAX_CONTEXT_BYTES: usize = 2 * 1024 * 1024;

/// Reserved telemetry key: task UID.
pub const KEY_TASK_UID: &str = "task.uid";
/// Reserved telemetry key: task namespace.
pub const KEY_TASK_NAMESPACE: &str = "task.namespace";
/// Reserved telemetry key: task name.
pub const KEY_TASK_NAME: &str = "task.name";
/// Reserved telemetry key: diagnosis UID.
pub const KEY_DIAGNOSIS_UID: &str = "diagnosis.uid";
/// Reserved telemetry key: diagnosis namespace.
pub const KEY_DIAGNOSIS_NAMESPACE: &str = "diagnosis.namespace";
/// Reserved telemetry key: diagnosis name.
pub const KEY_DIAGNOSIS_NAME: &str = "diagnosis.name";
/// Reserved telemetry key: referenced pod namespace.
pub const KEY_POD_NAMESPACE: &str = "pod.namespace";
/// Reserved telemetry key: referenced pod name.
pub const KEY_POD_NAME: &str = "pod.name";
/// Reserved telemetry key: referenced container name.
pub const KEY_CONTAINER: &str = "container";
/// Reserved telemetry key: node the agent runs on.
pub const KEY_NODE: &str = "node";

/// All reserved telemetry keys. User parameters must never shadow these.
pub const RESERVED_KEYS: [&str; 10] = [
    KEY_TASK_UID,
    KEY_TASK_NAMESPACE,
    KEY_TASK_NAME,
    KEY_DIAGNOSIS_UID,
    KEY_DIAGNOSIS_NAMESPACE,
    KEY_DIAGNOSIS_NAME,
    KEY_POD_NAMESPACE,
    KEY_POD_NAME,
    KEY_CONTAINER,
    KEY_NODE,
];

/// Flat string-to-string payload exchanged with processors.
///
/// Wire shape is a plain JSON object with string values:
///
/// ```json
/// {"foo": "bar", "node": "n1", "task.name": "probe-n1"}
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextMap(BTreeMap<String, String>);

impl ContextMap {
    /// Create an empty map.
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Insert a key, overwriting any previous value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    /// Merge `other` into `self`, overwriting colliding keys.
    ///
    /// Later merges win, which is what gives telemetry keys precedence over
    /// user parameters when the executor builds a dispatch context.
    pub fn merge(&mut self, other: &ContextMap) {
        for (k, v) in &other.0 {
            self.0.insert(k.clone(), v.clone());
        }
    }

    /// Merge `other` but refuse to overwrite reserved telemetry keys.
    ///
    /// Used when folding processor results back into stored results, so a
    /// misbehaving processor cannot rewrite the telemetry of later nodes.
    pub fn merge_unreserved(&mut self, other: &ContextMap) {
        for (k, v) in &other.0 {
            if RESERVED_KEYS.contains(&k.as_str()) {
                continue;
            }
            self.0.insert(k.clone(), v.clone());
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Serialize to the wire form.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Decode from the wire form. Any non-string value is an error.
    pub fn from_json(raw: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(raw)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ContextMap {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl<'a> IntoIterator for &'a ContextMap {
    type Item = (&'a String, &'a String);
    type IntoIter = std::collections::btree_map::Iter<'a, String, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
