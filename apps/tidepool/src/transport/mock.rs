use std::collections::VecDeque;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream;
use parking_lot::Mutex;
use tokio::sync::{oneshot, watch};

use super::{ResponseStream, SyncTransport, TransportError};
use crate::protocol::{BackendUpdate, FrontendUpdate};

#[derive(Clone, Debug)]
pub struct RecordedRequest {
    pub route: String,
    pub request: FrontendUpdate,
}

/// Holds one exchange open until released or dropped.
#[derive(Debug)]
pub struct Gate {
    tx: oneshot::Sender<()>,
}

impl Gate {
    pub fn release(self) {
        let _ = self.tx.send(());
    }
}

#[derive(Default)]
struct Script {
    requests: Vec<RecordedRequest>,
    responses: VecDeque<Vec<BackendUpdate>>,
    gates: VecDeque<oneshot::Receiver<()>>,
    fail_next: Option<TransportError>,
}

/// In-process transport answering from a queue of canned responses.
///
/// Every request is recorded. With the queue empty a request gets an empty
/// response stream.
pub struct ScriptedTransport {
    script: Mutex<Script>,
    seen: watch::Sender<usize>,
}

impl Default for ScriptedTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedTransport {
    pub fn new() -> Self {
        let (seen, _) = watch::channel(0);
        Self {
            script: Mutex::new(Script::default()),
            seen,
        }
    }

    /// Parses a JSON-lines script: each non-empty line is an array of chunks
    /// making up one response.
    pub fn from_script(text: &str) -> Result<Self, TransportError> {
        let transport = Self::new();
        for line in text.lines().map(str::trim).filter(|line| !line.is_empty()) {
            let chunks: Vec<BackendUpdate> = serde_json::from_str(line)?;
            transport.push_response(chunks);
        }
        Ok(transport)
    }

    pub fn push_response(&self, chunks: Vec<BackendUpdate>) {
        self.script.lock().responses.push_back(chunks);
    }

    /// The next exchange waits for the returned gate before answering.
    pub fn hold_next(&self) -> Gate {
        let (tx, rx) = oneshot::channel();
        self.script.lock().gates.push_back(rx);
        Gate { tx }
    }

    pub fn fail_next(&self, err: TransportError) {
        self.script.lock().fail_next = Some(err);
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.script.lock().requests.clone()
    }

    pub fn request_count(&self) -> usize {
        *self.seen.borrow()
    }

    pub fn remaining_responses(&self) -> usize {
        self.script.lock().responses.len()
    }

    /// Resolves once at least `count` requests have arrived.
    pub async fn wait_for_requests(&self, count: usize) {
        let mut rx = self.seen.subscribe();
        let _ = rx.wait_for(|seen| *seen >= count).await;
    }
}

#[async_trait]
impl SyncTransport for ScriptedTransport {
    async fn render(
        &self,
        route: &str,
        request: FrontendUpdate,
    ) -> Result<ResponseStream, TransportError> {
        let (gate, outcome) = {
            let mut script = self.script.lock();
            script.requests.push(RecordedRequest {
                route: route.to_string(),
                request,
            });
            let gate = script.gates.pop_front();
            let outcome = match script.fail_next.take() {
                Some(err) => Err(err),
                None => Ok(script.responses.pop_front().unwrap_or_default()),
            };
            (gate, outcome)
        };
        self.seen.send_modify(|seen| *seen += 1);

        if let Some(gate) = gate {
            let _ = gate.await;
        }
        let chunks = outcome?;
        Ok(stream::iter(chunks.into_iter().map(Ok)).boxed())
    }
}
