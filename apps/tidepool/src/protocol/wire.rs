//! Frontend/backend message shapes.
//!
//! Field names follow the backend's lowercase-concatenated JSON convention
//! (`renderupdates`, `refoperations`, ...). Everything here is plain data;
//! behaviour lives in the tree, state, refs and sync modules.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::model::{Element, ElementId};

pub const FRONTEND_UPDATE_TYPE: &str = "frontendupdate";
pub const BACKEND_UPDATE_TYPE: &str = "backendupdate";

pub fn timestamp_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as i64)
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// frontend -> backend
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FrontendUpdate {
    #[serde(rename = "type")]
    pub kind: String,
    pub ts: i64,
    #[serde(rename = "sessionid")]
    pub session_id: String,
    #[serde(rename = "rendercontext")]
    pub render_context: RenderContext,
    pub dispose: bool,
    pub resync: bool,
    #[serde(default)]
    pub events: Vec<PendingEvent>,
    #[serde(rename = "refupdates", default)]
    pub ref_updates: Vec<RefUpdate>,
    /// Cells written locally since the previous request.
    #[serde(rename = "statesync", default, skip_serializing_if = "Vec::is_empty")]
    pub state_sync: Vec<StateSync>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderContext {
    pub focused: bool,
    pub width: u32,
    pub height: u32,
    #[serde(rename = "rootrefid")]
    pub root_ref_id: String,
    #[serde(default)]
    pub background: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PendingEvent {
    #[serde(rename = "targetid")]
    pub target_id: Option<ElementId>,
    #[serde(rename = "eventtype")]
    pub kind: String,
    #[serde(
        rename = "globaleventtype",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub global_kind: Option<String>,
    #[serde(rename = "keydata", default, skip_serializing_if = "Option::is_none")]
    pub key: Option<KeyData>,
    #[serde(rename = "mousedata", default, skip_serializing_if = "Option::is_none")]
    pub pointer: Option<PointerData>,
    #[serde(rename = "targetvalue", default, skip_serializing_if = "Option::is_none")]
    pub target_value: Option<String>,
    #[serde(
        rename = "targetchecked",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub target_checked: Option<bool>,
}

/// Normalized keyboard event. `cmd` and `option` are the platform-neutral
/// modifiers derived from the raw Meta/Alt flags.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyData {
    #[serde(rename = "type")]
    pub key_type: String,
    pub key: String,
    pub code: String,
    #[serde(default)]
    pub repeat: bool,
    #[serde(default)]
    pub location: u32,
    #[serde(default)]
    pub shift: bool,
    #[serde(default)]
    pub control: bool,
    #[serde(default)]
    pub alt: bool,
    #[serde(default)]
    pub meta: bool,
    #[serde(default)]
    pub cmd: bool,
    #[serde(default)]
    pub option: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointerData {
    pub button: i32,
    pub buttons: i32,
    #[serde(rename = "clientx")]
    pub client_x: i32,
    #[serde(rename = "clienty")]
    pub client_y: i32,
    #[serde(rename = "pagex")]
    pub page_x: i32,
    #[serde(rename = "pagey")]
    pub page_y: i32,
    #[serde(rename = "screenx")]
    pub screen_x: i32,
    #[serde(rename = "screeny")]
    pub screen_y: i32,
    #[serde(rename = "movementx")]
    pub movement_x: i32,
    #[serde(rename = "movementy")]
    pub movement_y: i32,
    #[serde(default)]
    pub shift: bool,
    #[serde(default)]
    pub control: bool,
    #[serde(default)]
    pub alt: bool,
    #[serde(default)]
    pub meta: bool,
    #[serde(default)]
    pub cmd: bool,
    #[serde(default)]
    pub option: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefUpdate {
    #[serde(rename = "refid")]
    pub ref_id: String,
    #[serde(rename = "hashandle")]
    pub has_handle: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<RefPosition>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefPosition {
    #[serde(rename = "offsetwidth")]
    pub offset_width: i32,
    #[serde(rename = "offsetheight")]
    pub offset_height: i32,
    #[serde(rename = "scrollwidth")]
    pub scroll_width: i32,
    #[serde(rename = "scrollheight")]
    pub scroll_height: i32,
    #[serde(rename = "scrolltop")]
    pub scroll_top: i32,
    #[serde(rename = "boundingrect")]
    pub bounding_rect: BoundingRect,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingRect {
    pub top: i32,
    pub left: i32,
    pub right: i32,
    pub bottom: i32,
    pub width: i32,
    pub height: i32,
}

// ---------------------------------------------------------------------------
// backend -> frontend
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UpdateType {
    Root,
    Append,
    Replace,
    Remove,
    Insert,
    Unknown(String),
}

impl UpdateType {
    pub fn as_str(&self) -> &str {
        match self {
            UpdateType::Root => "root",
            UpdateType::Append => "append",
            UpdateType::Replace => "replace",
            UpdateType::Remove => "remove",
            UpdateType::Insert => "insert",
            UpdateType::Unknown(other) => other,
        }
    }
}

impl From<&str> for UpdateType {
    fn from(value: &str) -> Self {
        match value {
            "root" => UpdateType::Root,
            "append" => UpdateType::Append,
            "replace" => UpdateType::Replace,
            "remove" => UpdateType::Remove,
            "insert" => UpdateType::Insert,
            other => UpdateType::Unknown(other.to_string()),
        }
    }
}

impl fmt::Display for UpdateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for UpdateType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for UpdateType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(UpdateType::from(raw.as_str()))
    }
}

/// One structural patch against the element tree.
///
/// The payload of `root`/`append`/`replace`/`insert` is either inlined in
/// `node` or referenced through `nodeid` into the response's transfer list.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RenderUpdate {
    #[serde(rename = "updatetype")]
    pub update_type: UpdateType,
    #[serde(rename = "targetid", default, skip_serializing_if = "Option::is_none")]
    pub target_id: Option<ElementId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node: Option<Element>,
    #[serde(rename = "nodeid", default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<ElementId>,
}

impl RenderUpdate {
    pub fn root(node: Element) -> Self {
        Self::with_node(UpdateType::Root, None, None, node)
    }

    pub fn append(target: impl Into<ElementId>, node: Element) -> Self {
        Self::with_node(UpdateType::Append, Some(target.into()), None, node)
    }

    pub fn insert(target: impl Into<ElementId>, index: usize, node: Element) -> Self {
        Self::with_node(UpdateType::Insert, Some(target.into()), Some(index), node)
    }

    pub fn replace(target: impl Into<ElementId>, index: usize, node: Element) -> Self {
        Self::with_node(UpdateType::Replace, Some(target.into()), Some(index), node)
    }

    pub fn remove(target: impl Into<ElementId>, index: usize) -> Self {
        Self {
            update_type: UpdateType::Remove,
            target_id: Some(target.into()),
            index: Some(index),
            node: None,
            node_id: None,
        }
    }

    fn with_node(
        update_type: UpdateType,
        target_id: Option<ElementId>,
        index: Option<usize>,
        node: Element,
    ) -> Self {
        Self {
            update_type,
            target_id,
            index,
            node: Some(node),
            node_id: None,
        }
    }
}

/// Flattened element: children are referenced by id.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransferElem {
    pub id: ElementId,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub props: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ElementId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StateSync {
    pub name: String,
    pub value: Value,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RefOperation {
    #[serde(rename = "refid")]
    pub ref_id: String,
    pub op: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(rename = "outputref", default, skip_serializing_if = "Option::is_none")]
    pub output_ref: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Error,
    Info,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionMessage {
    pub kind: MessageKind,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<String>,
}

impl SessionMessage {
    pub fn error(text: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::Error,
            text: text.into(),
            trace: None,
        }
    }

    pub fn info(text: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::Info,
            text: text.into(),
            trace: None,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BackendOpts {
    #[serde(
        rename = "closeoninterrupt",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub close_on_interrupt: Option<bool>,
    #[serde(
        rename = "globalkeyboardevents",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub global_keyboard_events: Option<bool>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl BackendOpts {
    pub fn close_on_interrupt(&self) -> bool {
        self.close_on_interrupt.unwrap_or(false)
    }

    pub fn global_keyboard_events(&self) -> bool {
        self.global_keyboard_events.unwrap_or(false)
    }
}

/// A backend response, or one streamed chunk of it.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BackendUpdate {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ts: Option<i64>,
    #[serde(rename = "renderupdates", default, skip_serializing_if = "Vec::is_empty")]
    pub render_updates: Vec<RenderUpdate>,
    #[serde(rename = "transferelems", default, skip_serializing_if = "Vec::is_empty")]
    pub transfer_elems: Vec<TransferElem>,
    #[serde(rename = "statesync", default, skip_serializing_if = "Vec::is_empty")]
    pub state_sync: Vec<StateSync>,
    #[serde(rename = "refoperations", default, skip_serializing_if = "Vec::is_empty")]
    pub ref_operations: Vec<RefOperation>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<SessionMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opts: Option<BackendOpts>,
    #[serde(rename = "haswork", default, skip_serializing_if = "Option::is_none")]
    pub has_work: Option<bool>,
}

impl BackendUpdate {
    /// Overlays a later chunk onto this one: list fields concatenate, scalar
    /// fields take the chunk's value when the chunk sets one.
    pub fn merge(&mut self, chunk: BackendUpdate) {
        let BackendUpdate {
            kind,
            ts,
            render_updates,
            transfer_elems,
            state_sync,
            ref_operations,
            messages,
            opts,
            has_work,
        } = chunk;
        if kind.is_some() {
            self.kind = kind;
        }
        if ts.is_some() {
            self.ts = ts;
        }
        self.render_updates.extend(render_updates);
        self.transfer_elems.extend(transfer_elems);
        self.state_sync.extend(state_sync);
        self.ref_operations.extend(ref_operations);
        self.messages.extend(messages);
        if opts.is_some() {
            self.opts = opts;
        }
        if has_work.is_some() {
            self.has_work = has_work;
        }
    }

    pub fn has_work(&self) -> bool {
        self.has_work.unwrap_or(false)
    }
}

/// Folds response chunks left to right. `None` when no chunk arrived.
pub fn merge_chunks<I>(chunks: I) -> Option<BackendUpdate>
where
    I: IntoIterator<Item = BackendUpdate>,
{
    let mut iter = chunks.into_iter();
    let mut merged = iter.next()?;
    for chunk in iter {
        merged.merge(chunk);
    }
    Some(merged)
}
