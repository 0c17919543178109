use std::collections::HashMap;

use super::element::ElementId;

/// Per-element and whole-tree change counters.
///
/// The rendering layer compares these against the values it last rendered
/// to decide which consumers need a re-render. Counters only move forward
/// while an element id stays in the tree; `forget` drops the entry once the
/// element is gone.
#[derive(Debug, Default)]
pub struct VersionTracker {
    nodes: HashMap<ElementId, u64>,
    global: u64,
}

impl VersionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bump(&mut self, id: &ElementId) -> u64 {
        let entry = self.nodes.entry(id.clone()).or_insert(0);
        *entry += 1;
        *entry
    }

    pub fn get(&self, id: &str) -> u64 {
        self.nodes.get(id).copied().unwrap_or(0)
    }

    pub fn forget(&mut self, id: &str) {
        self.nodes.remove(id);
    }

    pub fn bump_global(&mut self) -> u64 {
        self.global += 1;
        self.global
    }

    pub fn global(&self) -> u64 {
        self.global
    }

    pub fn tracked(&self) -> usize {
        self.nodes.len()
    }
}
