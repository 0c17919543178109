use std::collections::VecDeque;

use crate::protocol::{MessageKind, SessionMessage};

/// Diagnostic log surfaced to the host. Oldest entries fall off once
/// `limit` is reached.
#[derive(Debug)]
pub struct MessageLog {
    entries: VecDeque<SessionMessage>,
    limit: usize,
    dropped: u64,
}

impl MessageLog {
    pub fn new(limit: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            limit: limit.max(1),
            dropped: 0,
        }
    }

    pub fn push(&mut self, message: SessionMessage) {
        if self.entries.len() == self.limit {
            self.entries.pop_front();
            self.dropped += 1;
        }
        self.entries.push_back(message);
    }

    pub fn error(&mut self, text: impl Into<String>) {
        self.push(SessionMessage::error(text));
    }

    pub fn snapshot(&self) -> Vec<SessionMessage> {
        self.entries.iter().cloned().collect()
    }

    pub fn take(&mut self) -> Vec<SessionMessage> {
        self.entries.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn errors(&self) -> usize {
        self.entries
            .iter()
            .filter(|message| message.kind == MessageKind::Error)
            .count()
    }

    /// Entries evicted over the log's lifetime.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oldest_entries_are_evicted() {
        let mut log = MessageLog::new(2);
        log.error("one");
        log.push(SessionMessage::info("two"));
        log.error("three");
        let texts: Vec<String> = log.snapshot().into_iter().map(|m| m.text).collect();
        assert_eq!(texts, ["two", "three"]);
        assert_eq!(log.dropped(), 1);
        assert_eq!(log.errors(), 1);
    }

    #[test]
    fn take_drains() {
        let mut log = MessageLog::new(10);
        log.error("boom");
        assert_eq!(log.take().len(), 1);
        assert!(log.is_empty());
    }
}
