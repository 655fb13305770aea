// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 The OVP Authors

//! The record of flows installed on behalf of an entity.

use ovp::engine::Flow;
use std::collections::BTreeMap;

/// Flows keyed by the entity (node, pod interface, service CIDR) they
/// were installed for.
///
/// Iteration is in key order, so walking a cache is deterministic.
#[derive(Clone, Debug, Default)]
pub struct FlowCache {
    entries: BTreeMap<String, Vec<Flow>>,
}

impl FlowCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `flows` for `key`, returning whatever was recorded
    /// before.
    pub fn insert(&mut self, key: &str, flows: Vec<Flow>) -> Option<Vec<Flow>> {
        self.entries.insert(key.to_string(), flows)
    }

    pub fn remove(&mut self, key: &str) -> Option<Vec<Flow>> {
        self.entries.remove(key)
    }

    pub fn get(&self, key: &str) -> Option<&[Flow]> {
        self.entries.get(key).map(Vec::as_slice)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Every recorded flow, grouped by key in key order.
    pub fn flows(&self) -> impl Iterator<Item = &Flow> {
        self.entries.values().flatten()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::engine::Pipeline;
    use ovp::api::OfPort;

    #[test]
    fn insert_and_remove() {
        let pl = Pipeline::new("br-int").unwrap();
        let a = pl.service_flows("10.96.0.0/12".parse().unwrap(), OfPort::new(2)).unwrap();
        let b = pl.service_flows("10.0.0.0/16".parse().unwrap(), OfPort::new(2)).unwrap();

        let mut cache = FlowCache::new();
        assert!(cache.insert("b", b.clone()).is_none());
        assert!(cache.insert("a", a.clone()).is_none());
        assert_eq!(cache.keys().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(cache.flows().count(), 2);
        assert_eq!(cache.get("a"), Some(a.as_slice()));

        assert_eq!(cache.remove("a"), Some(a));
        assert!(!cache.contains("a"));
        assert_eq!(cache.remove("a"), None);
        assert_eq!(cache.len(), 1);
    }
}
