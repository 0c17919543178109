//! One remote-rendered panel: route lifecycle, request/response loop and the
//! local copies of tree, cells and refs.
//!
//! All mutable state sits behind a single lock and is only touched in short
//! synchronous sections; the lock is never held across an await or while
//! calling into the host. Timers are spawned tasks holding a weak reference
//! to the session, so a dropped session quietly stops its own timers.

use std::collections::HashSet;
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::StreamExt;
use parking_lot::Mutex;
use route_bus::{RouteBus, RouteStatus, wait_for_route};
use serde_json::{Map, Value};
use tokio::runtime::Handle;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use super::messages::MessageLog;
use super::scheduler::{Plan, UpdateScheduler};
use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::events::{EventBuffer, RawEvent, RawKey, key_matches};
use crate::model::{Element, VersionTracker};
use crate::protocol::wire::{FRONTEND_UPDATE_TYPE, timestamp_ms};
use crate::protocol::{
    BackendOpts, BackendUpdate, FrontendUpdate, MessageKind, PendingEvent, RenderContext,
    SessionMessage,
};
use crate::refs::{RefError, RefHandle, RefOutcome, RefRegistry, SurfaceCommand};
use crate::state::StateCellStore;
use crate::telemetry::{self, Metric, PerfGuard};
use crate::transport::{SyncTransport, TransportError};
use crate::tree::{Applied, ElementTree, RenderOp, TransferIndex};

/// Key combination that closes the view when the backend opts into it.
pub const INTERRUPT_KEY: &str = "Ctrl:c";
pub const GLOBAL_KEYDOWN: &str = "onKeyDown";

/// What the host reports about the view hosting this session.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ViewState {
    pub focused: bool,
    pub width: u32,
    pub height: u32,
    pub background: bool,
}

/// The application shell around a session.
///
/// Called without any session lock held, so implementations may call back
/// into the session.
pub trait SessionHost: Send + Sync {
    fn view_state(&self) -> ViewState;

    /// The session is finished with its view (route lost or interrupt).
    fn close_view(&self);

    /// A response or local cell write produced a new global version.
    fn tree_updated(&self, _version: u64) {}
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SessionFlags {
    pub disposed: bool,
    pub should_dispose: bool,
    pub dispose_sent: bool,
    pub route_confirmed: bool,
    pub needs_resync: bool,
    pub needs_update: bool,
    /// At least one response was applied.
    pub active: bool,
    pub has_work: bool,
}

impl SessionFlags {
    fn dispose_notice_pending(&self) -> bool {
        self.should_dispose && !self.dispose_sent
    }
}

struct Core {
    tree: ElementTree,
    versions: VersionTracker,
    cells: StateCellStore,
    refs: RefRegistry,
    events: EventBuffer,
    scheduler: UpdateScheduler,
    messages: MessageLog,
    opts: BackendOpts,
    flags: SessionFlags,
    route: Option<String>,
    root_ref_id: String,
}

struct SessionInner {
    session_id: String,
    config: SessionConfig,
    core: Mutex<Core>,
    transport: Arc<dyn SyncTransport>,
    bus: Arc<dyn RouteBus>,
    host: Arc<dyn SessionHost>,
    runtime: Handle,
    route_task: Mutex<Option<AbortHandle>>,
}

/// Cheap to clone; clones share one session.
#[derive(Clone)]
pub struct SyncSession {
    inner: Arc<SessionInner>,
}

impl SyncSession {
    /// Creates the session on the current tokio runtime. With a known
    /// `route` the route is bound immediately, see [`SyncSession::bind_route`].
    pub fn start(
        config: SessionConfig,
        transport: Arc<dyn SyncTransport>,
        bus: Arc<dyn RouteBus>,
        host: Arc<dyn SessionHost>,
        route: Option<String>,
    ) -> Result<Self, SessionError> {
        let runtime = Handle::try_current().map_err(|_| SessionError::NoRuntime)?;
        let root_ref_id = Uuid::new_v4().to_string();
        let mut refs = RefRegistry::new();
        refs.get_or_create(&root_ref_id, false);

        let core = Core {
            tree: ElementTree::new(),
            versions: VersionTracker::new(),
            cells: StateCellStore::new(),
            refs,
            events: EventBuffer::new(),
            scheduler: UpdateScheduler::new(config.max_normal_interval),
            messages: MessageLog::new(config.message_log_limit),
            opts: BackendOpts::default(),
            flags: SessionFlags {
                needs_resync: true,
                ..SessionFlags::default()
            },
            route: None,
            root_ref_id,
        };
        let session = Self {
            inner: Arc::new(SessionInner {
                session_id: Uuid::new_v4().to_string(),
                config,
                core: Mutex::new(core),
                transport,
                bus,
                host,
                runtime,
                route_task: Mutex::new(None),
            }),
        };
        debug!(
            target = "sync::session",
            session_id = %session.inner.session_id,
            "session created"
        );
        if let Some(route) = route {
            session.bind_route(route);
        }
        Ok(session)
    }

    /// Binds the backend route: schedules an immediate sync and waits, up to
    /// the configured timeout, for the route to report `Up`. Failure to
    /// confirm, or a later `Down`, disposes the session.
    pub fn bind_route(&self, route: impl Into<String>) {
        let route = route.into();
        {
            let mut core = self.inner.core.lock();
            if core.flags.disposed {
                return;
            }
            core.route = Some(route.clone());
            core.flags.route_confirmed = false;
        }
        self.schedule_update(true, Duration::ZERO);

        let weak = Arc::downgrade(&self.inner);
        let bus = Arc::clone(&self.inner.bus);
        let wait = self.inner.config.route_timeout;
        let task = self
            .inner
            .runtime
            .spawn(watch_route(weak, bus, route, wait));
        if let Some(previous) = self.inner.route_task.lock().replace(task.abort_handle()) {
            previous.abort();
        }
    }

    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    // ---------------------------------------------------------------------
    // scheduling
    // ---------------------------------------------------------------------

    /// Asks for a sync. Quick requests fire as soon as possible; normal ones
    /// wait at least `delay` and keep the configured spacing.
    pub fn schedule_update(&self, quick: bool, delay: Duration) {
        let mut core = self.inner.core.lock();
        if core.flags.disposed {
            return;
        }
        let Plan::Arm { id, delay, quick } = core.scheduler.plan(quick, delay, Instant::now())
        else {
            return;
        };
        trace!(target = "sync::scheduler", id, ?delay, quick, "timer armed");
        let weak = Arc::downgrade(&self.inner);
        let task = self.inner.runtime.spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if let Some(inner) = weak.upgrade() {
                SyncSession { inner }.on_timer(id).await;
            }
        });
        core.scheduler.set_abort(id, task.abort_handle());
    }

    pub fn timer_pending(&self) -> bool {
        self.inner.core.lock().scheduler.has_pending()
    }

    pub fn request_in_flight(&self) -> bool {
        self.inner.core.lock().scheduler.in_flight()
    }

    async fn on_timer(&self, id: u64) {
        let Some(quick) = self.inner.core.lock().scheduler.fire(id) else {
            return;
        };
        if let Err(err) = self.send(quick).await {
            warn!(
                target = "sync::session",
                session_id = %self.inner.session_id,
                error = %err,
                "scheduled sync failed"
            );
            self.inner
                .core
                .lock()
                .messages
                .error(format!("sync request failed: {err}"));
        }
    }

    // ---------------------------------------------------------------------
    // request/response
    // ---------------------------------------------------------------------

    /// Sends one request when there is something to send. A call made
    /// while another request is outstanding only records that a follow-up
    /// is owed. Transport failures are returned; the in-flight state is
    /// cleared either way.
    pub async fn send(&self, force: bool) -> Result<(), SessionError> {
        let view = self.inner.host.view_state();
        let Some((route, request)) = self.prepare(force, view) else {
            return Ok(());
        };
        debug!(
            target = "sync::session",
            session_id = %self.inner.session_id,
            route = %route,
            events = request.events.len(),
            refs = request.ref_updates.len(),
            resync = request.resync,
            dispose = request.dispose,
            "sending frontend update"
        );

        let outcome = self.exchange(&route, request).await;

        let (result, version, followup, notice) = {
            let mut core = self.inner.core.lock();
            let (result, version) = match outcome {
                Ok(Some(update)) if !core.flags.disposed => (Ok(()), Some(core.apply_response(update))),
                Ok(Some(_)) => {
                    debug!(target = "sync::session", "response after dispose dropped");
                    (Ok(()), None)
                }
                Ok(None) => {
                    // A response with no chunks carries no haswork either.
                    if !core.flags.disposed {
                        core.flags.has_work = false;
                    }
                    (Ok(()), None)
                }
                Err(err) => (Err(SessionError::from(err)), None),
            };
            let followup = core.scheduler.finish_request(Instant::now());
            let notice = core.flags.dispose_notice_pending() && core.flags.route_confirmed;
            (result, version, followup && !core.flags.disposed, notice)
        };

        if let Some(version) = version {
            self.inner.host.tree_updated(version);
        }
        if notice {
            self.spawn_send(true);
        } else if followup {
            self.schedule_update(true, Duration::ZERO);
        }
        result
    }

    fn prepare(&self, force: bool, view: ViewState) -> Option<(String, FrontendUpdate)> {
        let mut core = self.inner.core.lock();
        let notice = core.flags.dispose_notice_pending();
        if core.flags.disposed && !notice {
            return None;
        }
        if !core.flags.route_confirmed {
            return None;
        }
        let route = core.route.clone()?;
        let wanted = force || notice || core.flags.needs_update;
        if !wanted && !core.scheduler.in_flight() {
            return None;
        }
        if !core.scheduler.begin_request() {
            trace!(target = "sync::scheduler", "request in flight, follow-up recorded");
            return None;
        }
        let request = core.build_request(&self.inner.session_id, view);
        if request.dispose {
            core.flags.dispose_sent = true;
        }
        Some((route, request))
    }

    async fn exchange(
        &self,
        route: &str,
        request: FrontendUpdate,
    ) -> Result<Option<BackendUpdate>, TransportError> {
        let mut stream = self.inner.transport.render(route, request).await?;
        let mut merged: Option<BackendUpdate> = None;
        let mut chunks = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            chunks += 1;
            match merged.as_mut() {
                Some(response) => response.merge(chunk),
                None => merged = Some(chunk),
            }
        }
        telemetry::record(Metric::ResponseChunks, chunks);
        trace!(target = "sync::session", chunks, "response merged");
        Ok(merged)
    }

    fn spawn_send(&self, force: bool) {
        let session = self.clone();
        self.inner.runtime.spawn(async move {
            if let Err(err) = session.send(force).await {
                warn!(target = "sync::session", error = %err, "background sync failed");
            }
        });
    }

    /// Marks the next request as a resync and sends it promptly.
    pub fn request_resync(&self) {
        {
            let mut core = self.inner.core.lock();
            if core.flags.disposed {
                return;
            }
            core.flags.needs_resync = true;
        }
        self.schedule_update(true, Duration::ZERO);
    }

    // ---------------------------------------------------------------------
    // host hooks
    // ---------------------------------------------------------------------

    /// Called after the host rendered `version`. Dirty refs or pending
    /// backend work trigger a quick follow-up.
    pub fn render_done(&self, version: u64) {
        let wanted = {
            let core = self.inner.core.lock();
            if core.flags.disposed {
                return;
            }
            core.refs.has_dirty() || core.flags.has_work
        };
        trace!(target = "sync::session", version, wanted, "render done");
        if wanted {
            self.schedule_update(true, Duration::ZERO);
        }
    }

    /// Global key handling. Returns true when the key was consumed.
    pub fn key_down(&self, raw: &RawKey) -> bool {
        let platform = self.inner.config.platform;
        let (close_on_interrupt, global_keys) = {
            let core = self.inner.core.lock();
            if core.flags.disposed {
                return false;
            }
            (
                core.opts.close_on_interrupt(),
                core.opts.global_keyboard_events(),
            )
        };
        let key = raw.annotate(platform);
        if close_on_interrupt && key_matches(INTERRUPT_KEY, &key, platform) {
            info!(target = "sync::session", "interrupt key, closing view");
            self.dispose();
            self.inner.host.close_view();
            return true;
        }
        if global_keys && !key.cmd && !key.meta {
            self.push_event(PendingEvent {
                target_id: None,
                kind: GLOBAL_KEYDOWN.to_string(),
                global_kind: Some(GLOBAL_KEYDOWN.to_string()),
                key: Some(key),
                pointer: None,
                target_value: None,
                target_checked: None,
            });
            return true;
        }
        false
    }

    pub fn push_event(&self, event: PendingEvent) {
        {
            let mut core = self.inner.core.lock();
            if core.flags.disposed {
                return;
            }
            core.events.push(event);
            core.flags.needs_update = true;
        }
        self.schedule_update(false, Duration::ZERO);
    }

    /// Annotates a host event for this session's platform and queues it.
    pub fn push_raw_event(&self, event: RawEvent) {
        self.push_event(event.annotate(self.inner.config.platform));
    }

    /// Stops the session. When the route was confirmed one last request
    /// tells the backend; it waits behind any request still in flight.
    pub fn dispose(&self) {
        if self.mark_disposed() == Some(true) {
            self.spawn_send(true);
        }
    }

    /// Like [`dispose`](Self::dispose), but sends the final notice on the
    /// calling task and returns once the backend has answered it. With a
    /// request still outstanding the notice follows that request instead,
    /// as it does for `dispose`.
    pub async fn shutdown(&self) -> Result<(), SessionError> {
        match self.mark_disposed() {
            Some(true) => self.send(true).await,
            _ => Ok(()),
        }
    }

    /// Flags the session disposed. `None` when it already was, otherwise
    /// whether a dispose notice is owed to the backend.
    fn mark_disposed(&self) -> Option<bool> {
        if let Some(task) = self.inner.route_task.lock().take() {
            task.abort();
        }
        let notice = {
            let mut core = self.inner.core.lock();
            if core.flags.disposed {
                return None;
            }
            core.flags.disposed = true;
            core.flags.should_dispose = true;
            core.scheduler.cancel();
            core.flags.route_confirmed
        };
        info!(
            target = "sync::session",
            session_id = %self.inner.session_id,
            notice,
            "session disposed"
        );
        Some(notice)
    }

    fn on_route_confirmed(&self, route: &str) {
        {
            let mut core = self.inner.core.lock();
            if core.flags.disposed || core.route.as_deref() != Some(route) {
                return;
            }
            core.flags.route_confirmed = true;
        }
        info!(target = "sync::route", route, "backend route confirmed");
        self.schedule_update(true, Duration::ZERO);
    }

    fn on_route_lost(&self, route: &str, reason: &str) {
        {
            let mut core = self.inner.core.lock();
            if core.flags.disposed {
                return;
            }
            core.flags.disposed = true;
            core.scheduler.cancel();
            core.messages
                .error(format!("backend route {route} unavailable: {reason}"));
        }
        let persist = self.inner.config.persist;
        warn!(target = "sync::route", route, reason, persist, "backend route lost");
        if !persist {
            self.inner.host.close_view();
        }
    }

    // ---------------------------------------------------------------------
    // cells and refs
    // ---------------------------------------------------------------------

    /// Local write to a state cell. The new value rides along with the
    /// next request so the backend sees it.
    pub fn set_cell(&self, name: &str, value: Value) {
        let (version, disposed) = {
            let mut core = self.inner.core.lock();
            let Core {
                cells,
                versions,
                flags,
                ..
            } = &mut *core;
            cells.set_value(name, value, false, versions);
            if !flags.disposed {
                flags.needs_update = true;
            }
            (versions.bump_global(), flags.disposed)
        };
        self.inner.host.tree_updated(version);
        if !disposed {
            self.schedule_update(false, Duration::ZERO);
        }
    }

    pub fn cell(&self, name: &str) -> Option<Value> {
        self.inner.core.lock().cells.get(name).cloned()
    }

    pub fn cells(&self) -> Map<String, Value> {
        self.inner.core.lock().cells.snapshot()
    }

    pub fn register_ref(&self, ref_id: &str, track_position: bool) {
        self.inner
            .core
            .lock()
            .refs
            .get_or_create(ref_id, track_position);
    }

    pub fn attach_ref(&self, ref_id: &str, handle: Arc<dyn RefHandle>) -> Result<bool, RefError> {
        self.inner.core.lock().refs.attach(ref_id, handle)
    }

    pub fn detach_ref(&self, ref_id: &str) -> Result<bool, RefError> {
        self.inner.core.lock().refs.detach(ref_id)
    }

    pub fn take_surface_commands(&self, key: &str) -> Vec<SurfaceCommand> {
        self.inner.core.lock().refs.take_surface_commands(key)
    }

    pub fn root_ref_id(&self) -> String {
        self.inner.core.lock().root_ref_id.clone()
    }

    // ---------------------------------------------------------------------
    // snapshots
    // ---------------------------------------------------------------------

    pub fn with_tree<R>(&self, f: impl FnOnce(&ElementTree) -> R) -> R {
        f(&self.inner.core.lock().tree)
    }

    pub fn root(&self) -> Option<Element> {
        self.inner.core.lock().tree.root().cloned()
    }

    /// Props of `id` with bindings resolved against the current cells.
    pub fn resolved_props(&self, id: &str) -> Option<Map<String, Value>> {
        let core = self.inner.core.lock();
        let elem = core.tree.get(id)?;
        Some(core.cells.resolve_props(&elem.props))
    }

    pub fn version(&self, id: &str) -> u64 {
        self.inner.core.lock().versions.get(id)
    }

    pub fn global_version(&self) -> u64 {
        self.inner.core.lock().versions.global()
    }

    pub fn flags(&self) -> SessionFlags {
        self.inner.core.lock().flags
    }

    pub fn opts(&self) -> BackendOpts {
        self.inner.core.lock().opts.clone()
    }

    pub fn messages(&self) -> Vec<SessionMessage> {
        self.inner.core.lock().messages.snapshot()
    }

    pub fn take_messages(&self) -> Vec<SessionMessage> {
        self.inner.core.lock().messages.take()
    }

    pub fn pending_events(&self) -> usize {
        self.inner.core.lock().events.len()
    }
}

impl Core {
    fn build_request(&mut self, session_id: &str, view: ViewState) -> FrontendUpdate {
        let resync = std::mem::take(&mut self.flags.needs_resync);
        let events = self.events.drain();
        let ref_updates = self.refs.collect_dirty_updates();
        let state_sync = self.cells.take_local_changes();
        self.flags.needs_update = false;
        let dispose = self.flags.should_dispose;
        if dispose {
            self.flags.disposed = true;
        }
        telemetry::record(Metric::RequestEvents, events.len() as u64);
        FrontendUpdate {
            kind: FRONTEND_UPDATE_TYPE.to_string(),
            ts: timestamp_ms(),
            session_id: session_id.to_string(),
            render_context: RenderContext {
                focused: view.focused,
                width: view.width,
                height: view.height,
                root_ref_id: self.root_ref_id.clone(),
                background: view.background,
            },
            dispose,
            resync,
            events,
            ref_updates,
            state_sync,
        }
    }

    /// Applies a merged response and returns the new global version.
    fn apply_response(&mut self, update: BackendUpdate) -> u64 {
        let _perf = PerfGuard::new(Metric::ApplyResponse);
        let BackendUpdate {
            render_updates,
            transfer_elems,
            state_sync,
            ref_operations,
            messages,
            opts,
            has_work,
            ..
        } = update;
        self.flags.active = true;
        self.tree.rebuild_index();
        telemetry::record(Metric::RenderUpdates, render_updates.len() as u64);

        let transfer = TransferIndex::new(&transfer_elems);
        for render_update in render_updates {
            let result = RenderOp::from_update(render_update, &transfer)
                .and_then(|op| self.tree.apply_render_op(op));
            match result {
                Ok(applied) => self.absorb(applied),
                Err(err) => {
                    warn!(target = "tree::patch", error = %err, "render update skipped");
                    self.messages.error(err.to_string());
                }
            }
        }
        let tree = &self.tree;
        self.cells.prune_consumers(|id| tree.contains(id.as_str()));

        for sync in state_sync {
            self.cells
                .set_value(&sync.name, sync.value, true, &mut self.versions);
        }

        for op in &ref_operations {
            match self.refs.apply_ref_operation(op) {
                Ok(RefOutcome::Focused) => {
                    debug!(target = "refs::ops", ref_id = %op.ref_id, "focused");
                }
                Ok(RefOutcome::Queued(key)) => {
                    trace!(target = "refs::ops", op = %op.op, key = %key, "surface op queued");
                }
                Err(err) => {
                    warn!(target = "refs::ops", error = %err, "ref operation failed");
                    self.messages.error(err.to_string());
                }
            }
        }

        for message in messages {
            match message.kind {
                MessageKind::Error => {
                    warn!(target = "sync::backend", text = %message.text, "backend error")
                }
                MessageKind::Info => {
                    info!(target = "sync::backend", text = %message.text, "backend message")
                }
            }
            self.messages.push(message);
        }

        if let Some(opts) = opts {
            self.opts = opts;
        }
        self.flags.has_work = has_work.unwrap_or(false);
        self.versions.bump_global()
    }

    /// Cell tagging and version upkeep for one applied op.
    fn absorb(&mut self, applied: Applied) {
        let re_added: HashSet<&str> = applied.added.iter().map(|node| node.id.as_str()).collect();
        for node in &applied.removed {
            self.cells.untag_consumer(&node.id, &node.cells);
            if !re_added.contains(node.id.as_str()) {
                self.versions.forget(node.id.as_str());
            }
        }
        for node in &applied.added {
            self.cells.tag_consumer(&node.id, &node.cells);
        }
        if let Some(changed) = &applied.changed {
            self.versions.bump(changed);
        }
    }
}

async fn watch_route(
    weak: Weak<SessionInner>,
    bus: Arc<dyn RouteBus>,
    route: String,
    wait: Duration,
) {
    let confirmed = wait_for_route(bus.as_ref(), &route, wait).await;
    let Some(inner) = weak.upgrade() else {
        return;
    };
    let session = SyncSession { inner };
    if let Err(err) = confirmed {
        session.on_route_lost(&route, &err.to_string());
        return;
    }
    session.on_route_confirmed(&route);
    drop(session);

    let mut rx = bus.subscribe(&route);
    let mut down = bus.status(&route) == Some(RouteStatus::Down);
    while !down {
        down = match rx.recv().await {
            Ok(event) => event.status == RouteStatus::Down,
            Err(RecvError::Lagged(_)) => bus.status(&route) == Some(RouteStatus::Down),
            Err(RecvError::Closed) => return,
        };
    }
    if let Some(inner) = weak.upgrade() {
        SyncSession { inner }.on_route_lost(&route, "route reported down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::RenderUpdate;
    use crate::transport::ScriptedTransport;
    use route_bus::LocalRouteBus;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct TestHost {
        closed: AtomicUsize,
    }

    impl SessionHost for TestHost {
        fn view_state(&self) -> ViewState {
            ViewState {
                focused: true,
                width: 80,
                height: 24,
                background: false,
            }
        }

        fn close_view(&self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn core() -> Core {
        Core {
            tree: ElementTree::new(),
            versions: VersionTracker::new(),
            cells: StateCellStore::new(),
            refs: RefRegistry::new(),
            events: EventBuffer::new(),
            scheduler: UpdateScheduler::new(Duration::from_millis(100)),
            messages: MessageLog::new(16),
            opts: BackendOpts::default(),
            flags: SessionFlags {
                needs_resync: true,
                ..SessionFlags::default()
            },
            route: None,
            root_ref_id: "root-ref".into(),
        }
    }

    #[test]
    fn resync_is_sent_once() {
        let mut core = core();
        assert!(core.build_request("s", ViewState::default()).resync);
        assert!(!core.build_request("s", ViewState::default()).resync);
    }

    #[test]
    fn soft_errors_do_not_stop_later_updates() {
        let mut core = core();
        let update = BackendUpdate {
            render_updates: vec![
                RenderUpdate::root(Element::new("r", "box")),
                RenderUpdate::append("ghost", Element::new("x", "box")),
                RenderUpdate::append("r", Element::new("c1", "text")),
            ],
            ..BackendUpdate::default()
        };
        let version = core.apply_response(update);
        assert_eq!(version, 1);
        assert_eq!(core.messages.len(), 1);
        assert!(core.tree.contains("c1"));
        assert!(!core.tree.contains("x"));
        assert!(core.flags.active);
    }

    #[test]
    fn removed_nodes_lose_versions_and_consumers() {
        let mut core = core();
        let node = Element::new("r", "box").with_child(
            Element::new("in", "input").with_prop("value", crate::model::binding("name")),
        );
        core.apply_response(BackendUpdate {
            render_updates: vec![RenderUpdate::root(node)],
            ..BackendUpdate::default()
        });
        core.apply_response(BackendUpdate {
            state_sync: vec![crate::protocol::StateSync {
                name: "name".into(),
                value: json!("ada"),
            }],
            ..BackendUpdate::default()
        });
        assert_eq!(core.versions.get("in"), 1);

        core.apply_response(BackendUpdate {
            render_updates: vec![RenderUpdate::remove("r", 0)],
            ..BackendUpdate::default()
        });
        assert_eq!(core.versions.get("in"), 0);
        assert_eq!(core.cells.cell("name").unwrap().consumers().count(), 0);
        assert!(core.versions.get("r") >= 2);
    }

    #[test]
    fn start_outside_runtime_fails() {
        let result = SyncSession::start(
            SessionConfig::default(),
            Arc::new(ScriptedTransport::new()),
            Arc::new(LocalRouteBus::new()),
            Arc::new(TestHost::default()),
            None,
        );
        assert!(matches!(result, Err(SessionError::NoRuntime)));
    }
}
