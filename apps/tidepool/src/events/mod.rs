pub mod keys;

use std::collections::VecDeque;

use crate::model::ElementId;
use crate::protocol::PendingEvent;

pub use keys::{DescriptorError, KeyDescriptor, Platform, RawKey, RawPointer, key_matches};

/// Host-side interaction before annotation.
#[derive(Clone, Debug, PartialEq)]
pub enum RawEvent {
    Key {
        target: Option<ElementId>,
        kind: String,
        key: RawKey,
    },
    Pointer {
        target: Option<ElementId>,
        kind: String,
        pointer: RawPointer,
    },
    Change {
        target: ElementId,
        kind: String,
        value: Option<String>,
        checked: Option<bool>,
    },
    /// Events that carry no payload (`onClick` without pointer data, `onFocus`, ...).
    Plain {
        target: Option<ElementId>,
        kind: String,
    },
}

impl RawEvent {
    pub fn annotate(self, platform: Platform) -> PendingEvent {
        let mut event = PendingEvent {
            target_id: None,
            kind: String::new(),
            global_kind: None,
            key: None,
            pointer: None,
            target_value: None,
            target_checked: None,
        };
        match self {
            RawEvent::Key { target, kind, key } => {
                event.target_id = target;
                event.kind = kind;
                event.key = Some(key.annotate(platform));
            }
            RawEvent::Pointer {
                target,
                kind,
                pointer,
            } => {
                event.target_id = target;
                event.kind = kind;
                event.pointer = Some(pointer.annotate(platform));
            }
            RawEvent::Change {
                target,
                kind,
                value,
                checked,
            } => {
                event.target_id = Some(target);
                event.kind = kind;
                event.target_value = value;
                event.target_checked = checked;
            }
            RawEvent::Plain { target, kind } => {
                event.target_id = target;
                event.kind = kind;
            }
        }
        event
    }
}

/// Pending events in arrival order. Drained once per outgoing request.
#[derive(Debug, Default)]
pub struct EventBuffer {
    pending: VecDeque<PendingEvent>,
}

impl EventBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: PendingEvent) {
        self.pending.push_back(event);
    }

    pub fn drain(&mut self) -> Vec<PendingEvent> {
        self.pending.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_preserves_order_and_empties() {
        let mut buffer = EventBuffer::new();
        for (i, kind) in ["onClick", "onKeyDown", "onChange"].iter().enumerate() {
            buffer.push(
                RawEvent::Plain {
                    target: Some(ElementId::new(format!("e{i}"))),
                    kind: kind.to_string(),
                }
                .annotate(Platform::Other),
            );
        }
        let drained = buffer.drain();
        let kinds: Vec<&str> = drained.iter().map(|e| e.kind.as_str()).collect();
        assert_eq!(kinds, ["onClick", "onKeyDown", "onChange"]);
        assert!(buffer.is_empty());
        assert!(buffer.drain().is_empty());
    }

    #[test]
    fn change_events_carry_value_and_checked() {
        let event = RawEvent::Change {
            target: "box".into(),
            kind: "onChange".into(),
            value: Some("on".into()),
            checked: Some(true),
        }
        .annotate(Platform::Mac);
        assert_eq!(event.target_id.as_ref().map(ElementId::as_str), Some("box"));
        assert_eq!(event.target_value.as_deref(), Some("on"));
        assert_eq!(event.target_checked, Some(true));
        assert!(event.key.is_none() && event.pointer.is_none());
    }

    #[test]
    fn key_events_are_annotated() {
        let event = RawEvent::Key {
            target: Some("in".into()),
            kind: "onKeyDown".into(),
            key: RawKey::keydown("Enter").with_meta(),
        }
        .annotate(Platform::Mac);
        let key = event.key.expect("key data");
        assert!(key.cmd);
        assert_eq!(key.key, "Enter");
    }
}
