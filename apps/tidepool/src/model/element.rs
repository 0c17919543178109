use std::borrow::Borrow;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Type tag of text leaf nodes.
pub const TEXT_TAG: &str = "#text";

const BINDING_TYPE: &str = "binding";

/// Backend-assigned element identity, unique within one tree snapshot.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ElementId(String);

impl ElementId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ElementId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ElementId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl Borrow<str> for ElementId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One node of the rendered tree.
///
/// Trees built from flattened transfer lists can be far deeper than the
/// call stack allows, so `Clone`, `PartialEq`, `Debug` and `Drop` all work
/// on an explicit stack. The serde impls nest; trees of unbounded depth are
/// written out flattened (see `tree::flatten`).
#[derive(Serialize, Deserialize)]
pub struct Element {
    pub id: ElementId,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub props: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Element>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl Element {
    pub fn new(id: impl Into<ElementId>, kind: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            props: Map::new(),
            children: Vec::new(),
            text: None,
        }
    }

    pub fn text_node(id: impl Into<ElementId>, text: impl Into<String>) -> Self {
        let mut elem = Self::new(id, TEXT_TAG);
        elem.text = Some(text.into());
        elem
    }

    pub fn with_prop(mut self, key: impl Into<String>, value: Value) -> Self {
        self.props.insert(key.into(), value);
        self
    }

    pub fn with_child(mut self, child: Element) -> Self {
        self.children.push(child);
        self
    }

    pub fn is_text(&self) -> bool {
        self.kind == TEXT_TAG
    }

    /// Preorder walk over this element and all of its descendants.
    pub fn walk(&self) -> Walk<'_> {
        Walk { stack: vec![self] }
    }

    /// Names of the state cells this element's props are bound to.
    pub fn bound_cells(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for value in self.props.values() {
            if let Some(name) = binding_name(value) {
                if !names.iter().any(|existing| existing == name) {
                    names.push(name.to_string());
                }
            }
        }
        names
    }

    /// Same id, type, props and text, and the same number of children.
    fn same_node(&self, other: &Element) -> bool {
        self.id == other.id
            && self.kind == other.kind
            && self.props == other.props
            && self.text == other.text
            && self.children.len() == other.children.len()
    }

    fn shallow_copy(&self, children: Vec<Element>) -> Element {
        Element {
            id: self.id.clone(),
            kind: self.kind.clone(),
            props: self.props.clone(),
            children,
            text: self.text.clone(),
        }
    }
}

impl Clone for Element {
    fn clone(&self) -> Self {
        struct Frame<'a> {
            src: &'a Element,
            next: usize,
            built: Vec<Element>,
        }

        let mut stack = vec![Frame {
            src: self,
            next: 0,
            built: Vec::with_capacity(self.children.len()),
        }];
        while let Some(mut frame) = stack.pop() {
            if let Some(child) = frame.src.children.get(frame.next) {
                frame.next += 1;
                stack.push(frame);
                stack.push(Frame {
                    src: child,
                    next: 0,
                    built: Vec::with_capacity(child.children.len()),
                });
                continue;
            }
            let copy = frame.src.shallow_copy(frame.built);
            match stack.last_mut() {
                Some(parent) => parent.built.push(copy),
                None => return copy,
            }
        }
        unreachable!("clone stack starts with the root frame")
    }
}

impl PartialEq for Element {
    // Two preorder walks agree node by node, child counts included, only
    // when the trees have the same shape.
    fn eq(&self, other: &Self) -> bool {
        let mut left = self.walk();
        let mut right = other.walk();
        loop {
            match (left.next(), right.next()) {
                (None, None) => return true,
                (Some(a), Some(b)) if a.same_node(b) => {}
                _ => return false,
            }
        }
    }
}

impl fmt::Debug for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let children: Vec<&str> = self.children.iter().map(|c| c.id.as_str()).collect();
        f.debug_struct("Element")
            .field("id", &self.id.as_str())
            .field("kind", &self.kind)
            .field("props", &self.props)
            .field("text", &self.text)
            .field("children", &children)
            .finish()
    }
}

impl Drop for Element {
    fn drop(&mut self) {
        let mut pending = std::mem::take(&mut self.children);
        while let Some(mut node) = pending.pop() {
            pending.append(&mut node.children);
        }
    }
}

/// Returns the bound cell name when `value` is a `{"type":"binding"}` prop.
pub fn binding_name(value: &Value) -> Option<&str> {
    let obj = value.as_object()?;
    if obj.get("type").and_then(Value::as_str) != Some(BINDING_TYPE) {
        return None;
    }
    obj.get("bind").and_then(Value::as_str)
}

pub fn binding(name: &str) -> Value {
    serde_json::json!({ "type": BINDING_TYPE, "bind": name })
}

pub struct Walk<'a> {
    stack: Vec<&'a Element>,
}

impl<'a> Iterator for Walk<'a> {
    type Item = &'a Element;

    fn next(&mut self) -> Option<Self::Item> {
        let elem = self.stack.pop()?;
        self.stack.extend(elem.children.iter().rev());
        Some(elem)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn walk_is_preorder() {
        let tree = Element::new("r", "box")
            .with_child(Element::new("a", "box").with_child(Element::new("a1", "text")))
            .with_child(Element::new("b", "text"));
        let ids: Vec<&str> = tree.walk().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, ["r", "a", "a1", "b"]);
    }

    #[test]
    fn walk_handles_deep_nesting() {
        let mut elem = Element::new("leaf", "text");
        for depth in 0..20_000 {
            elem = Element::new(format!("n{depth}"), "box").with_child(elem);
        }
        assert_eq!(elem.walk().count(), 20_001);
    }

    fn chain(depth: usize) -> Element {
        let mut elem = Element::new("leaf", "text");
        for level in 0..depth {
            elem = Element::new(format!("n{level}"), "box").with_child(elem);
        }
        elem
    }

    #[test]
    fn deep_trees_clone_compare_and_drop() {
        let original = chain(100_000);
        let copy = original.clone();
        assert!(copy == original);

        let mut changed = copy.clone();
        let mut node = &mut changed;
        while !node.children.is_empty() {
            node = &mut node.children[0];
        }
        node.text = Some("edited".into());
        assert!(changed != original);
        drop(changed);
        drop(copy);
    }

    #[test]
    fn debug_lists_child_ids_only() {
        let elem = Element::new("r", "box")
            .with_child(Element::new("a", "box").with_child(Element::new("a1", "text")));
        let text = format!("{elem:?}");
        assert!(text.contains("children: [\"a\"]"));
        assert!(!text.contains("a1"));
    }

    #[test]
    fn bound_cells_are_deduplicated() {
        let elem = Element::new("in", "input")
            .with_prop("value", binding("$.name"))
            .with_prop("placeholder", binding("$.name"))
            .with_prop("disabled", binding("$.locked"))
            .with_prop("class", json!("wide"));
        let mut cells = elem.bound_cells();
        cells.sort();
        assert_eq!(cells, ["$.locked", "$.name"]);
    }

    #[test]
    fn wire_shape_uses_type_tag() {
        let elem: Element = serde_json::from_value(json!({
            "id": "t1",
            "type": "#text",
            "text": "hello"
        }))
        .unwrap();
        assert!(elem.is_text());
        assert_eq!(elem.text.as_deref(), Some("hello"));
        assert!(elem.children.is_empty());
        let back = serde_json::to_value(&elem).unwrap();
        assert_eq!(back, json!({"id": "t1", "type": "#text", "text": "hello"}));
    }
}
