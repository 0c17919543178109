//! Named state cells shared between the backend and the rendered tree.

use std::collections::{HashMap, HashSet};

use serde_json::{Map, Value};

use crate::model::{ElementId, VersionTracker, binding_name};
use crate::protocol::StateSync;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct StateCell {
    /// Value visible to consumers.
    pub local_value: Value,
    /// Last value confirmed by the backend.
    pub backend_value: Value,
    consumers: HashSet<ElementId>,
    /// Written locally since the last request went out.
    unsent: bool,
}

impl StateCell {
    pub fn consumers(&self) -> impl Iterator<Item = &ElementId> {
        self.consumers.iter()
    }

    pub fn has_consumer(&self, id: &str) -> bool {
        self.consumers.contains(id)
    }

    /// True when a local write has not been confirmed by the backend.
    pub fn diverged(&self) -> bool {
        self.local_value != self.backend_value
    }

    /// True when a local write still has to be sent to the backend.
    pub fn unsent(&self) -> bool {
        self.unsent
    }
}

#[derive(Debug, Default)]
pub struct StateCellStore {
    cells: HashMap<String, StateCell>,
}

impl StateCellStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes `value` and bumps every consumer. Returns how many were bumped.
    /// A backend write supersedes any local write not yet sent.
    pub fn set_value(
        &mut self,
        name: &str,
        value: Value,
        from_backend: bool,
        versions: &mut VersionTracker,
    ) -> usize {
        let cell = self.cell_mut(name);
        if from_backend {
            cell.backend_value = value.clone();
        }
        cell.unsent = !from_backend;
        cell.local_value = value;
        for id in &cell.consumers {
            versions.bump(id);
        }
        cell.consumers.len()
    }

    pub fn tag_consumer<S: AsRef<str>>(&mut self, id: &ElementId, names: &[S]) {
        for name in names {
            self.cell_mut(name.as_ref()).consumers.insert(id.clone());
        }
    }

    pub fn untag_consumer<S: AsRef<str>>(&mut self, id: &ElementId, names: &[S]) {
        for name in names {
            if let Some(cell) = self.cells.get_mut(name.as_ref()) {
                cell.consumers.remove(id.as_str());
            }
        }
    }

    /// Drops consumer ids for which `live` returns false.
    pub fn prune_consumers(&mut self, mut live: impl FnMut(&ElementId) -> bool) {
        for cell in self.cells.values_mut() {
            cell.consumers.retain(|id| live(id));
        }
    }

    /// Local writes made since the last call, sorted by cell name.
    pub fn take_local_changes(&mut self) -> Vec<StateSync> {
        let mut changes: Vec<StateSync> = self
            .cells
            .iter_mut()
            .filter(|(_, cell)| cell.unsent)
            .map(|(name, cell)| {
                cell.unsent = false;
                StateSync {
                    name: name.clone(),
                    value: cell.local_value.clone(),
                }
            })
            .collect();
        changes.sort_by(|a, b| a.name.cmp(&b.name));
        changes
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.cells.get(name).map(|cell| &cell.local_value)
    }

    pub fn cell(&self, name: &str) -> Option<&StateCell> {
        self.cells.get(name)
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Local values of every cell, keyed by name.
    pub fn snapshot(&self) -> Map<String, Value> {
        self.cells
            .iter()
            .map(|(name, cell)| (name.clone(), cell.local_value.clone()))
            .collect()
    }

    /// `props` with binding values replaced by the bound cell's local value.
    /// Unknown cells resolve to null.
    pub fn resolve_props(&self, props: &Map<String, Value>) -> Map<String, Value> {
        props
            .iter()
            .map(|(key, value)| {
                let resolved = match binding_name(value) {
                    Some(name) => self.get(name).cloned().unwrap_or(Value::Null),
                    None => value.clone(),
                };
                (key.clone(), resolved)
            })
            .collect()
    }

    fn cell_mut(&mut self, name: &str) -> &mut StateCell {
        self.cells.entry(name.to_string()).or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::binding;
    use serde_json::json;

    #[test]
    fn set_value_bumps_only_consumers() {
        let mut store = StateCellStore::new();
        let mut versions = VersionTracker::default();
        let (a, b, c) = (ElementId::from("A"), ElementId::from("B"), ElementId::from("C"));
        for id in [&a, &b, &c] {
            versions.bump(id);
        }
        store.tag_consumer(&a, &["count"]);
        store.tag_consumer(&c, &["count"]);
        store.tag_consumer(&b, &["other"]);

        let bumped = store.set_value("count", json!(3), false, &mut versions);
        assert_eq!(bumped, 2);
        assert_eq!(versions.get("A"), 2);
        assert_eq!(versions.get("C"), 2);
        assert_eq!(versions.get("B"), 1);
        assert_eq!(store.get("count"), Some(&json!(3)));
    }

    #[test]
    fn backend_value_tracks_only_backend_writes() {
        let mut store = StateCellStore::new();
        let mut versions = VersionTracker::default();
        store.set_value("name", json!("srv"), true, &mut versions);
        store.set_value("name", json!("typed"), false, &mut versions);
        let cell = store.cell("name").unwrap();
        assert_eq!(cell.backend_value, json!("srv"));
        assert_eq!(cell.local_value, json!("typed"));
        assert!(cell.diverged());

        store.set_value("name", json!("srv2"), true, &mut versions);
        assert!(!store.cell("name").unwrap().diverged());
    }

    #[test]
    fn local_writes_are_taken_once() {
        let mut store = StateCellStore::new();
        let mut versions = VersionTracker::default();
        store.set_value("b", json!(1), false, &mut versions);
        store.set_value("a", json!("x"), false, &mut versions);
        store.set_value("srv", json!(true), true, &mut versions);
        store.set_value("b", json!(2), false, &mut versions);

        let changes = store.take_local_changes();
        let pairs: Vec<(&str, &Value)> = changes.iter().map(|c| (c.name.as_str(), &c.value)).collect();
        assert_eq!(pairs, [("a", &json!("x")), ("b", &json!(2))]);
        assert!(store.take_local_changes().is_empty());

        // the backend overwrote it before it went out
        store.set_value("a", json!("y"), false, &mut versions);
        store.set_value("a", json!("z"), true, &mut versions);
        assert!(!store.cell("a").unwrap().unsent());
        assert!(store.take_local_changes().is_empty());
    }

    #[test]
    fn untag_and_prune() {
        let mut store = StateCellStore::new();
        let a = ElementId::from("a");
        let b = ElementId::from("b");
        store.tag_consumer(&a, &["x", "y"]);
        store.tag_consumer(&b, &["x"]);
        store.untag_consumer(&a, &["x"]);
        assert!(!store.cell("x").unwrap().has_consumer("a"));
        assert!(store.cell("y").unwrap().has_consumer("a"));

        store.prune_consumers(|id| id.as_str() != "b");
        assert_eq!(store.cell("x").unwrap().consumers().count(), 0);
    }

    #[test]
    fn resolve_props_substitutes_bindings() {
        let mut store = StateCellStore::new();
        let mut versions = VersionTracker::default();
        store.set_value("$.name", json!("ada"), true, &mut versions);
        let mut props = Map::new();
        props.insert("value".into(), binding("$.name"));
        props.insert("hint".into(), binding("$.missing"));
        props.insert("class".into(), json!("wide"));

        let resolved = store.resolve_props(&props);
        assert_eq!(resolved["value"], json!("ada"));
        assert_eq!(resolved["hint"], Value::Null);
        assert_eq!(resolved["class"], json!("wide"));
    }
}
