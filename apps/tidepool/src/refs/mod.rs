//! Registry of live on-screen handles ("refs").
//!
//! The rendering layer reports attach/detach through [`RefRegistry::attach`]
//! and [`RefRegistry::detach`]; the registry turns real transitions into
//! dirty flags that are flushed into the next outgoing request.

pub mod surface;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::protocol::{RefOperation, RefPosition, RefUpdate};

pub use surface::{SurfaceCommand, SurfaceStore};

pub const FOCUS_OP: &str = "focus";

/// Imperative surface of an attached on-screen resource.
pub trait RefHandle: Send + Sync {
    fn focus(&self) -> Result<(), String>;

    /// Current geometry, when the resource is laid out.
    fn position(&self) -> Option<RefPosition>;
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RefError {
    #[error("unknown ref '{0}'")]
    UnknownRef(String),
    #[error("ref '{0}' has no attached handle")]
    NoHandle(String),
    #[error("focus on ref '{ref_id}' failed: {reason}")]
    FocusFailed { ref_id: String, reason: String },
}

#[derive(Clone, Default)]
pub struct RefEntry {
    pub ref_id: String,
    handle: Option<Arc<dyn RefHandle>>,
    pub has_handle: bool,
    pub track_position: bool,
    pub position_dirty: bool,
}

impl RefEntry {
    fn new(ref_id: &str, track_position: bool) -> Self {
        Self {
            ref_id: ref_id.to_string(),
            handle: None,
            has_handle: false,
            track_position,
            position_dirty: false,
        }
    }

    pub fn handle(&self) -> Option<&Arc<dyn RefHandle>> {
        self.handle.as_ref()
    }
}

impl fmt::Debug for RefEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefEntry")
            .field("ref_id", &self.ref_id)
            .field("has_handle", &self.has_handle)
            .field("track_position", &self.track_position)
            .field("position_dirty", &self.position_dirty)
            .finish()
    }
}

/// What a backend ref operation turned into.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RefOutcome {
    Focused,
    /// Queued on the surface store under this key.
    Queued(String),
}

#[derive(Debug, Default)]
pub struct RefRegistry {
    entries: BTreeMap<String, RefEntry>,
    surfaces: SurfaceStore,
}

impl RefRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the entry for `ref_id`, creating it on first request. A later
    /// request can turn position tracking on but never off.
    pub fn get_or_create(&mut self, ref_id: &str, track_position: bool) -> &RefEntry {
        let entry = self
            .entries
            .entry(ref_id.to_string())
            .or_insert_with(|| RefEntry::new(ref_id, track_position));
        entry.track_position |= track_position;
        entry
    }

    pub fn get(&self, ref_id: &str) -> Option<&RefEntry> {
        self.entries.get(ref_id)
    }

    /// Stores `handle`. Returns true when the ref went from detached to
    /// attached, which marks it dirty.
    pub fn attach(&mut self, ref_id: &str, handle: Arc<dyn RefHandle>) -> Result<bool, RefError> {
        let entry = self.entry_mut(ref_id)?;
        entry.handle = Some(handle);
        Ok(entry.set_attached(true))
    }

    /// Drops the handle. Returns true on a real attached to detached change.
    pub fn detach(&mut self, ref_id: &str) -> Result<bool, RefError> {
        let entry = self.entry_mut(ref_id)?;
        entry.handle = None;
        Ok(entry.set_attached(false))
    }

    pub fn has_dirty(&self) -> bool {
        self.entries.values().any(|entry| entry.position_dirty)
    }

    /// Snapshots every dirty entry plus tracked entries with a live handle,
    /// then clears the dirty flags.
    pub fn collect_dirty_updates(&mut self) -> Vec<RefUpdate> {
        let mut updates = Vec::new();
        for entry in self.entries.values_mut() {
            let tracked = entry.track_position && entry.handle.is_some();
            if !entry.position_dirty && !tracked {
                continue;
            }
            entry.position_dirty = false;
            updates.push(RefUpdate {
                ref_id: entry.ref_id.clone(),
                has_handle: entry.has_handle,
                position: entry.handle.as_ref().and_then(|handle| handle.position()),
            });
        }
        updates
    }

    /// Runs one backend ref operation. `focus` goes to the handle; anything
    /// else is queued for the surface keyed by `outputref`, or the ref id.
    pub fn apply_ref_operation(&mut self, op: &RefOperation) -> Result<RefOutcome, RefError> {
        if op.op != FOCUS_OP {
            let key = op.output_ref.as_deref().unwrap_or(&op.ref_id);
            self.surfaces.push(
                key,
                SurfaceCommand {
                    op: op.op.clone(),
                    params: op.payload.clone().unwrap_or_default(),
                },
            );
            return Ok(RefOutcome::Queued(key.to_string()));
        }

        let entry = self
            .entries
            .get(&op.ref_id)
            .ok_or_else(|| RefError::UnknownRef(op.ref_id.clone()))?;
        let handle = entry
            .handle
            .as_ref()
            .ok_or_else(|| RefError::NoHandle(op.ref_id.clone()))?;
        handle.focus().map_err(|reason| RefError::FocusFailed {
            ref_id: op.ref_id.clone(),
            reason,
        })?;
        Ok(RefOutcome::Focused)
    }

    pub fn take_surface_commands(&mut self, key: &str) -> Vec<SurfaceCommand> {
        self.surfaces.take(key)
    }

    pub fn surfaces(&self) -> &SurfaceStore {
        &self.surfaces
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn entry_mut(&mut self, ref_id: &str) -> Result<&mut RefEntry, RefError> {
        self.entries
            .get_mut(ref_id)
            .ok_or_else(|| RefError::UnknownRef(ref_id.to_string()))
    }
}

impl RefEntry {
    fn set_attached(&mut self, attached: bool) -> bool {
        if self.has_handle == attached {
            return false;
        }
        self.has_handle = attached;
        self.position_dirty = true;
        true
    }
}
