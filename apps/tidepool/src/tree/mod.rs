//! Locally held copy of the backend's element tree.
//!
//! The tree is patched only through [`RenderOp`]s. Parent ids are resolved
//! through a [`TreeIndex`] of parent links that is rebuilt once per backend
//! response and kept current as ops land, so an op may target a node
//! introduced earlier in the same response.

pub mod transfer;

use std::collections::HashMap;
use std::fmt;

use thiserror::Error;

use crate::model::{Element, ElementId};
use crate::protocol::{RenderUpdate, UpdateType};

pub use transfer::{TransferIndex, flatten};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PatchOp {
    Root,
    Append,
    Replace,
    Remove,
    Insert,
}

impl fmt::Display for PatchOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PatchOp::Root => "root",
            PatchOp::Append => "append",
            PatchOp::Replace => "replace",
            PatchOp::Remove => "remove",
            PatchOp::Insert => "insert",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PatchError {
    #[error("unknown render update type '{0}'")]
    UnknownUpdateType(String),
    #[error("{op}: missing target element id")]
    MissingTarget { op: PatchOp },
    #[error("{op}: missing child index")]
    MissingIndex { op: PatchOp },
    #[error("{op}: update carries no node")]
    MissingNode { op: PatchOp },
    #[error("{op}: unknown target element '{target}'")]
    UnknownTarget { op: PatchOp, target: ElementId },
    #[error("{op}: index {index} out of range for '{target}' with {len} children")]
    IndexOutOfRange {
        op: PatchOp,
        target: ElementId,
        index: usize,
        len: usize,
    },
    #[error("{op}: transfer element '{id}' not found")]
    MissingTransferElem { op: PatchOp, id: ElementId },
    #[error("{op}: transfer element '{id}' contains itself")]
    TransferCycle { op: PatchOp, id: ElementId },
    #[error("{op}: transfer element '{id}' is referenced more than once")]
    DuplicateTransferElem { op: PatchOp, id: ElementId },
}

/// A structural patch with its payload resolved.
#[derive(Clone, Debug, PartialEq)]
pub enum RenderOp {
    Root(Element),
    Append {
        parent: ElementId,
        node: Element,
    },
    Replace {
        parent: ElementId,
        index: usize,
        node: Element,
    },
    Remove {
        parent: ElementId,
        index: usize,
    },
    Insert {
        parent: ElementId,
        index: usize,
        node: Element,
    },
}

impl RenderOp {
    /// Resolves a wire update, pulling `nodeid` payloads from `transfer`.
    pub fn from_update(
        update: RenderUpdate,
        transfer: &TransferIndex<'_>,
    ) -> Result<Self, PatchError> {
        let op = match &update.update_type {
            UpdateType::Root => PatchOp::Root,
            UpdateType::Append => PatchOp::Append,
            UpdateType::Replace => PatchOp::Replace,
            UpdateType::Remove => PatchOp::Remove,
            UpdateType::Insert => PatchOp::Insert,
            UpdateType::Unknown(other) => {
                return Err(PatchError::UnknownUpdateType(other.clone()));
            }
        };
        let RenderUpdate {
            target_id,
            index,
            node,
            node_id,
            ..
        } = update;

        let require_parent = || target_id.clone().ok_or(PatchError::MissingTarget { op });
        let require_index = || index.ok_or(PatchError::MissingIndex { op });
        let resolve_node = move || match (node, node_id) {
            (Some(inline), _) => Ok(inline),
            (None, Some(id)) => transfer.build(op, &id),
            (None, None) => Err(PatchError::MissingNode { op }),
        };

        Ok(match op {
            PatchOp::Root => RenderOp::Root(resolve_node()?),
            PatchOp::Append => RenderOp::Append {
                parent: require_parent()?,
                node: resolve_node()?,
            },
            PatchOp::Replace => RenderOp::Replace {
                parent: require_parent()?,
                index: require_index()?,
                node: resolve_node()?,
            },
            PatchOp::Remove => RenderOp::Remove {
                parent: require_parent()?,
                index: require_index()?,
            },
            PatchOp::Insert => RenderOp::Insert {
                parent: require_parent()?,
                index: require_index()?,
                node: resolve_node()?,
            },
        })
    }

    pub fn kind(&self) -> PatchOp {
        match self {
            RenderOp::Root(_) => PatchOp::Root,
            RenderOp::Append { .. } => PatchOp::Append,
            RenderOp::Replace { .. } => PatchOp::Replace,
            RenderOp::Remove { .. } => PatchOp::Remove,
            RenderOp::Insert { .. } => PatchOp::Insert,
        }
    }
}

/// An element that entered or left the tree, with the cells it binds.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeSummary {
    pub id: ElementId,
    pub cells: Vec<String>,
}

fn summarize(elem: &Element) -> Vec<NodeSummary> {
    elem.walk()
        .map(|node| NodeSummary {
            id: node.id.clone(),
            cells: node.bound_cells(),
        })
        .collect()
}

/// What a successful op changed.
#[derive(Debug, Default)]
pub struct Applied {
    /// Parent whose child list changed, or the new root.
    pub changed: Option<ElementId>,
    pub added: Vec<NodeSummary>,
    pub removed: Vec<NodeSummary>,
}

/// Where an element sits: its parent and its position among the parent's
/// children.
#[derive(Clone, Debug, PartialEq, Eq)]
struct Slot {
    parent: Option<ElementId>,
    position: usize,
}

/// Element id to parent link. Paths are recomputed by walking up, so a
/// patch only touches the entries of the edited child list.
#[derive(Debug, Default)]
pub struct TreeIndex {
    slots: HashMap<ElementId, Slot>,
}

impl TreeIndex {
    /// Child-index path from the root to `id`; empty for the root itself.
    pub fn path(&self, id: &str) -> Option<Vec<usize>> {
        let mut slot = self.slots.get(id)?;
        let mut path = Vec::new();
        while let Some(parent) = &slot.parent {
            // A path can never be longer than the number of indexed nodes.
            if path.len() >= self.slots.len() {
                return None;
            }
            path.push(slot.position);
            slot = self.slots.get(parent.as_str())?;
        }
        path.reverse();
        Some(path)
    }

    pub fn parent(&self, id: &str) -> Option<&ElementId> {
        self.slots.get(id)?.parent.as_ref()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.slots.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn rebuild(&mut self, root: Option<&Element>) {
        self.slots.clear();
        if let Some(root) = root {
            self.index_subtree(root, None, 0);
        }
    }

    /// Records `elem`, found at `position` under `parent`, and all its
    /// descendants.
    fn index_subtree(&mut self, elem: &Element, parent: Option<&ElementId>, position: usize) {
        self.slots.insert(
            elem.id.clone(),
            Slot {
                parent: parent.cloned(),
                position,
            },
        );
        let mut stack = vec![elem];
        while let Some(node) = stack.pop() {
            for (i, child) in node.children.iter().enumerate() {
                self.slots.insert(
                    child.id.clone(),
                    Slot {
                        parent: Some(node.id.clone()),
                        position: i,
                    },
                );
                stack.push(child);
            }
        }
    }

    /// Brings the direct children of `parent` up to date after an edit.
    /// Children already filed under `parent` only get their position moved;
    /// anything else is a new subtree.
    fn reindex_children(&mut self, parent: &Element) {
        for (i, child) in parent.children.iter().enumerate() {
            match self.slots.get_mut(child.id.as_str()) {
                Some(slot) if slot.parent.as_ref() == Some(&parent.id) => slot.position = i,
                _ => self.index_subtree(child, Some(&parent.id), i),
            }
        }
    }

    fn forget(&mut self, removed: &[NodeSummary]) {
        for summary in removed {
            self.slots.remove(summary.id.as_str());
        }
    }
}

#[derive(Debug, Default)]
pub struct ElementTree {
    root: Option<Element>,
    index: TreeIndex,
}

impl ElementTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn root(&self) -> Option<&Element> {
        self.root.as_ref()
    }

    pub fn get(&self, id: &str) -> Option<&Element> {
        let path = self.index.path(id)?;
        node_at(self.root.as_ref()?, &path)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains(id)
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    pub fn index(&self) -> &TreeIndex {
        &self.index
    }

    /// Re-walks the current tree. Called once per backend response.
    pub fn rebuild_index(&mut self) {
        self.index.rebuild(self.root.as_ref());
    }

    pub fn apply_render_op(&mut self, op: RenderOp) -> Result<Applied, PatchError> {
        let kind = op.kind();
        let (parent, added, removed) = match op {
            RenderOp::Root(node) => {
                let added = summarize(&node);
                let changed = Some(node.id.clone());
                let removed = self
                    .root
                    .replace(node)
                    .map(|old| summarize(&old))
                    .unwrap_or_default();
                self.rebuild_index();
                return Ok(Applied {
                    changed,
                    added,
                    removed,
                });
            }
            RenderOp::Append { parent, node } => {
                let added = summarize(&node);
                let removed = self.patch_children(kind, &parent, |children| {
                    children.push(node);
                    Ok(None)
                })?;
                (parent, added, removed)
            }
            RenderOp::Insert {
                parent,
                index,
                node,
            } => {
                let added = summarize(&node);
                let removed = self.patch_children(kind, &parent, |children| {
                    check_index(index, children.len(), true)?;
                    children.insert(index, node);
                    Ok(None)
                })?;
                (parent, added, removed)
            }
            RenderOp::Replace {
                parent,
                index,
                node,
            } => {
                let added = summarize(&node);
                let removed = self.patch_children(kind, &parent, |children| {
                    check_index(index, children.len(), false)?;
                    Ok(Some(std::mem::replace(&mut children[index], node)))
                })?;
                (parent, added, removed)
            }
            RenderOp::Remove { parent, index } => {
                let removed = self.patch_children(kind, &parent, |children| {
                    check_index(index, children.len(), false)?;
                    Ok(Some(children.remove(index)))
                })?;
                (parent, Vec::new(), removed)
            }
        };
        Ok(Applied {
            changed: Some(parent),
            added,
            removed,
        })
    }

    /// Runs `edit` on the child list of `parent`, then refreshes the index
    /// for that list. `edit` returns the displaced child, if any.
    fn patch_children<F>(
        &mut self,
        op: PatchOp,
        parent: &ElementId,
        edit: F,
    ) -> Result<Vec<NodeSummary>, PatchError>
    where
        F: FnOnce(&mut Vec<Element>) -> Result<Option<Element>, OutOfRange>,
    {
        let unknown = || PatchError::UnknownTarget {
            op,
            target: parent.clone(),
        };
        let path = self.index.path(parent.as_str()).ok_or_else(unknown)?;
        let root = self.root.as_mut().ok_or_else(unknown)?;
        let node = node_at_mut(root, &path).ok_or_else(unknown)?;

        let displaced = edit(&mut node.children).map_err(|OutOfRange { index, len }| {
            PatchError::IndexOutOfRange {
                op,
                target: parent.clone(),
                index,
                len,
            }
        })?;
        let removed = displaced.as_ref().map(summarize).unwrap_or_default();

        self.index.forget(&removed);
        self.index.reindex_children(node);
        Ok(removed)
    }
}

struct OutOfRange {
    index: usize,
    len: usize,
}

/// Insert may target one past the end; replace and remove may not.
fn check_index(index: usize, len: usize, allow_end: bool) -> Result<(), OutOfRange> {
    let fits = if allow_end { index <= len } else { index < len };
    if fits {
        Ok(())
    } else {
        Err(OutOfRange { index, len })
    }
}

fn node_at<'a>(root: &'a Element, path: &[usize]) -> Option<&'a Element> {
    let mut node = root;
    for &i in path {
        node = node.children.get(i)?;
    }
    Some(node)
}

fn node_at_mut<'a>(root: &'a mut Element, path: &[usize]) -> Option<&'a mut Element> {
    let mut node = root;
    for &i in path {
        node = node.children.get_mut(i)?;
    }
    Some(node)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::binding;

    fn ids(elem: &Element) -> Vec<&str> {
        elem.children.iter().map(|c| c.id.as_str()).collect()
    }

    fn tree_with_root() -> ElementTree {
        let mut tree = ElementTree::new();
        tree.apply_render_op(RenderOp::Root(Element::new("r", "box")))
            .unwrap();
        tree
    }

    #[test]
    fn root_then_append() {
        let mut tree = tree_with_root();
        let applied = tree
            .apply_render_op(RenderOp::Append {
                parent: "r".into(),
                node: Element::new("c1", "text"),
            })
            .unwrap();
        assert_eq!(applied.changed.as_ref().map(ElementId::as_str), Some("r"));
        let root = tree.root().unwrap();
        assert_eq!(root.id.as_str(), "r");
        assert_eq!(ids(root), ["c1"]);
        assert!(tree.contains("c1"));
    }

    #[test]
    fn insert_replace_remove_keep_index_current() {
        let mut tree = tree_with_root();
        for id in ["a", "b", "c"] {
            tree.apply_render_op(RenderOp::Append {
                parent: "r".into(),
                node: Element::new(id, "box"),
            })
            .unwrap();
        }
        tree.apply_render_op(RenderOp::Insert {
            parent: "r".into(),
            index: 0,
            node: Element::new("z", "box"),
        })
        .unwrap();
        // "c" shifted from index 2 to 3 and must still resolve.
        tree.apply_render_op(RenderOp::Append {
            parent: "c".into(),
            node: Element::new("c-child", "text"),
        })
        .unwrap();
        assert_eq!(tree.get("c-child").map(|e| e.kind.as_str()), Some("text"));

        let applied = tree
            .apply_render_op(RenderOp::Remove {
                parent: "r".into(),
                index: 3,
            })
            .unwrap();
        let removed: Vec<&str> = applied.removed.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(removed, ["c", "c-child"]);
        assert!(!tree.contains("c-child"));

        tree.apply_render_op(RenderOp::Replace {
            parent: "r".into(),
            index: 1,
            node: Element::new("a2", "box"),
        })
        .unwrap();
        assert_eq!(ids(tree.root().unwrap()), ["z", "a2", "b"]);
        assert!(!tree.contains("a"));
        assert_eq!(tree.len(), 4);
    }

    #[test]
    fn index_tracks_parents_and_positions() {
        let mut tree = tree_with_root();
        for id in ["a", "b"] {
            tree.apply_render_op(RenderOp::Append {
                parent: "r".into(),
                node: Element::new(id, "box").with_child(Element::new(format!("{id}1"), "text")),
            })
            .unwrap();
        }
        tree.apply_render_op(RenderOp::Insert {
            parent: "r".into(),
            index: 0,
            node: Element::new("z", "box"),
        })
        .unwrap();

        let index = tree.index();
        assert_eq!(index.path("r"), Some(vec![]));
        assert_eq!(index.path("b1"), Some(vec![2, 0]));
        assert_eq!(index.parent("b1").map(ElementId::as_str), Some("b"));
        assert_eq!(index.parent("r"), None);
        assert_eq!(index.path("ghost"), None);
    }

    #[test]
    fn unknown_target_leaves_tree_unchanged() {
        let mut tree = tree_with_root();
        let before = tree.root().cloned();
        let err = tree
            .apply_render_op(RenderOp::Append {
                parent: "ghost".into(),
                node: Element::new("x", "box"),
            })
            .unwrap_err();
        assert_eq!(
            err,
            PatchError::UnknownTarget {
                op: PatchOp::Append,
                target: "ghost".into(),
            }
        );
        assert_eq!(tree.root().cloned(), before);
        assert!(!tree.contains("x"));
    }

    #[test]
    fn index_bounds_are_checked_per_op() {
        let mut tree = tree_with_root();
        tree.apply_render_op(RenderOp::Append {
            parent: "r".into(),
            node: Element::new("a", "box"),
        })
        .unwrap();

        // insert at len is an append
        tree.apply_render_op(RenderOp::Insert {
            parent: "r".into(),
            index: 1,
            node: Element::new("b", "box"),
        })
        .unwrap();

        let err = tree
            .apply_render_op(RenderOp::Insert {
                parent: "r".into(),
                index: 3,
                node: Element::new("x", "box"),
            })
            .unwrap_err();
        assert_eq!(
            err,
            PatchError::IndexOutOfRange {
                op: PatchOp::Insert,
                target: "r".into(),
                index: 3,
                len: 2,
            }
        );
        assert!(
            tree.apply_render_op(RenderOp::Replace {
                parent: "r".into(),
                index: 2,
                node: Element::new("x", "box"),
            })
            .is_err()
        );
        assert!(
            tree.apply_render_op(RenderOp::Remove {
                parent: "r".into(),
                index: 2,
            })
            .is_err()
        );
        assert_eq!(ids(tree.root().unwrap()), ["a", "b"]);
    }

    #[test]
    fn summaries_carry_bound_cells() {
        let mut tree = tree_with_root();
        let node = Element::new("form", "form")
            .with_child(Element::new("name", "input").with_prop("value", binding("$.name")));
        let applied = tree
            .apply_render_op(RenderOp::Append {
                parent: "r".into(),
                node,
            })
            .unwrap();
        assert_eq!(
            applied.added,
            vec![
                NodeSummary {
                    id: "form".into(),
                    cells: vec![],
                },
                NodeSummary {
                    id: "name".into(),
                    cells: vec!["$.name".into()],
                },
            ]
        );
    }

    #[test]
    fn from_update_reports_missing_fields() {
        let transfer = TransferIndex::new(&[]);
        let err = RenderOp::from_update(
            RenderUpdate {
                update_type: UpdateType::Remove,
                target_id: Some("r".into()),
                index: None,
                node: None,
                node_id: None,
            },
            &transfer,
        )
        .unwrap_err();
        assert_eq!(err, PatchError::MissingIndex { op: PatchOp::Remove });

        let err = RenderOp::from_update(
            RenderUpdate {
                update_type: UpdateType::Append,
                target_id: Some("r".into()),
                index: None,
                node: None,
                node_id: None,
            },
            &transfer,
        )
        .unwrap_err();
        assert_eq!(err, PatchError::MissingNode { op: PatchOp::Append });

        let err = RenderOp::from_update(
            RenderUpdate {
                update_type: UpdateType::Unknown("warp".into()),
                target_id: None,
                index: None,
                node: None,
                node_id: None,
            },
            &transfer,
        )
        .unwrap_err();
        assert_eq!(err, PatchError::UnknownUpdateType("warp".into()));
    }
}
