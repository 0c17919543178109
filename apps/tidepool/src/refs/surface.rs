use std::collections::HashMap;

use serde::Serialize;
use serde_json::Value;

/// One drawing command addressed to a surface-backed ref.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SurfaceCommand {
    pub op: String,
    pub params: Value,
}

/// Commands accumulated per output key until the rendering layer drains them.
#[derive(Debug, Default)]
pub struct SurfaceStore {
    outputs: HashMap<String, Vec<SurfaceCommand>>,
}

impl SurfaceStore {
    pub fn push(&mut self, key: &str, command: SurfaceCommand) {
        self.outputs.entry(key.to_string()).or_default().push(command);
    }

    pub fn take(&mut self, key: &str) -> Vec<SurfaceCommand> {
        self.outputs.remove(key).unwrap_or_default()
    }

    pub fn pending(&self, key: &str) -> usize {
        self.outputs.get(key).map_or(0, Vec::len)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.outputs.keys().map(String::as_str)
    }
}
