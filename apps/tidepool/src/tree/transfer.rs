use std::collections::{HashMap, HashSet};

use crate::model::{Element, ElementId};
use crate::protocol::TransferElem;

use super::{PatchError, PatchOp};

/// Lookup over a response's flattened elements. Later duplicates win.
pub struct TransferIndex<'a> {
    elems: HashMap<&'a str, &'a TransferElem>,
}

impl<'a> TransferIndex<'a> {
    pub fn new(elems: &'a [TransferElem]) -> Self {
        let mut map = HashMap::with_capacity(elems.len());
        for elem in elems {
            map.insert(elem.id.as_str(), elem);
        }
        Self { elems: map }
    }

    pub fn is_empty(&self) -> bool {
        self.elems.is_empty()
    }

    /// Rebuilds the nested element rooted at `id`. Every element may be
    /// placed once; a second reference would duplicate ids in the tree.
    pub(crate) fn build(&self, op: PatchOp, id: &ElementId) -> Result<Element, PatchError> {
        struct Frame<'b> {
            elem: &'b TransferElem,
            next_child: usize,
            built: Vec<Element>,
        }

        let root = self.lookup(op, id)?;
        let mut on_path: HashSet<&str> = HashSet::new();
        let mut placed: HashSet<&str> = HashSet::new();
        on_path.insert(root.id.as_str());
        placed.insert(root.id.as_str());
        let mut stack = vec![Frame {
            elem: root,
            next_child: 0,
            built: Vec::with_capacity(root.children.len()),
        }];

        loop {
            let Some(top) = stack.last_mut() else {
                unreachable!("transfer stack drained before the root was built");
            };
            let elem = top.elem;
            if let Some(child_id) = elem.children.get(top.next_child) {
                top.next_child += 1;
                let child = self.lookup(op, child_id)?;
                if on_path.contains(child.id.as_str()) {
                    return Err(PatchError::TransferCycle {
                        op,
                        id: child.id.clone(),
                    });
                }
                if !placed.insert(child.id.as_str()) {
                    return Err(PatchError::DuplicateTransferElem {
                        op,
                        id: child.id.clone(),
                    });
                }
                on_path.insert(child.id.as_str());
                stack.push(Frame {
                    elem: child,
                    next_child: 0,
                    built: Vec::with_capacity(child.children.len()),
                });
                continue;
            }

            let Some(frame) = stack.pop() else {
                unreachable!("transfer stack drained before the root was built");
            };
            on_path.remove(frame.elem.id.as_str());
            let elem = Element {
                id: frame.elem.id.clone(),
                kind: frame.elem.kind.clone(),
                props: frame.elem.props.clone(),
                children: frame.built,
                text: frame.elem.text.clone(),
            };
            match stack.last_mut() {
                Some(parent) => parent.built.push(elem),
                None => return Ok(elem),
            }
        }
    }

    fn lookup(&self, op: PatchOp, id: &ElementId) -> Result<&'a TransferElem, PatchError> {
        self.elems
            .get(id.as_str())
            .copied()
            .ok_or_else(|| PatchError::MissingTransferElem { op, id: id.clone() })
    }
}

/// Writes `root` out as a preorder transfer list, the inverse of
/// [`TransferIndex::build`]. Works for trees of any depth.
pub fn flatten(root: &Element) -> Vec<TransferElem> {
    root.walk()
        .map(|node| TransferElem {
            id: node.id.clone(),
            kind: node.kind.clone(),
            props: node.props.clone(),
            children: node.children.iter().map(|c| c.id.clone()).collect(),
            text: node.text.clone(),
        })
        .collect()
}
