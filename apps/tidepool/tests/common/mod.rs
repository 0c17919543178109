#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use route_bus::{LocalRouteBus, RouteBus, RouteStatus};
use serde_json::Value;
use tidepool_core::events::{Platform, RawEvent, RawKey};
use tidepool_core::protocol::{BackendUpdate, FrontendUpdate};
use tidepool_core::transport::ScriptedTransport;
use tidepool_core::{SessionConfig, SessionHost, SyncSession, ViewState};

pub const ROUTE: &str = "panel-route";

/// Host that records what the session asked of it.
#[derive(Default)]
pub struct RecordingHost {
    closed: AtomicUsize,
    versions: Mutex<Vec<u64>>,
}

impl RecordingHost {
    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn versions(&self) -> Vec<u64> {
        self.versions.lock().unwrap().clone()
    }
}

impl SessionHost for RecordingHost {
    fn view_state(&self) -> ViewState {
        ViewState {
            focused: true,
            width: 120,
            height: 40,
            background: false,
        }
    }

    fn close_view(&self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }

    fn tree_updated(&self, version: u64) {
        self.versions.lock().unwrap().push(version);
    }
}

pub struct Fixture {
    pub session: SyncSession,
    pub transport: Arc<ScriptedTransport>,
    pub bus: Arc<LocalRouteBus>,
    pub host: Arc<RecordingHost>,
}

impl Fixture {
    pub fn config() -> SessionConfig {
        SessionConfig::default().with_platform(Platform::Other)
    }

    /// Session bound to [`ROUTE`], which is not up yet.
    pub fn unconfirmed(config: SessionConfig) -> Self {
        let transport = Arc::new(ScriptedTransport::new());
        let bus = Arc::new(LocalRouteBus::new());
        let host = Arc::new(RecordingHost::default());
        let session = SyncSession::start(
            config,
            transport.clone(),
            bus.clone(),
            host.clone(),
            Some(ROUTE.to_string()),
        )
        .expect("session starts inside a runtime");
        Self {
            session,
            transport,
            bus,
            host,
        }
    }

    /// Session whose route is up and whose initial resync exchange finished.
    /// `initial` answers that first request.
    pub async fn confirmed(initial: Vec<BackendUpdate>) -> Self {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_response(initial);
        let bus = Arc::new(LocalRouteBus::new());
        bus.publish(ROUTE, RouteStatus::Up).expect("publish");
        let host = Arc::new(RecordingHost::default());
        let session = SyncSession::start(
            Self::config(),
            transport.clone(),
            bus.clone(),
            host.clone(),
            Some(ROUTE.to_string()),
        )
        .expect("session starts inside a runtime");
        let fixture = Self {
            session,
            transport,
            bus,
            host,
        };
        fixture.transport.wait_for_requests(1).await;
        fixture.settle().await;
        fixture
    }

    /// Lets spawned timers and exchanges run until the session is idle.
    pub async fn settle(&self) {
        for _ in 0..1_000 {
            tokio::time::sleep(Duration::from_millis(1)).await;
            if !self.session.timer_pending() && !self.session.request_in_flight() {
                return;
            }
        }
        panic!("session did not settle");
    }

    pub fn requests(&self) -> Vec<FrontendUpdate> {
        self.transport
            .requests()
            .into_iter()
            .map(|recorded| recorded.request)
            .collect()
    }

    pub fn last_request(&self) -> FrontendUpdate {
        self.requests().pop().expect("at least one request")
    }
}

pub fn chunk(value: Value) -> BackendUpdate {
    serde_json::from_value(value).expect("valid backend chunk")
}

pub fn key_event(target: &str, key: &str) -> RawEvent {
    RawEvent::Key {
        target: Some(target.into()),
        kind: "onKeyDown".into(),
        key: RawKey::keydown(key),
    }
}

pub fn child_ids(session: &SyncSession, id: &str) -> Vec<String> {
    session.with_tree(|tree| {
        tree.get(id)
            .map(|elem| elem.children.iter().map(|c| c.id.to_string()).collect())
            .unwrap_or_default()
    })
}
