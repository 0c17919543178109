//! Route status bus.
//!
//! A backend process is reachable through a named route. The bus carries
//! `Up`/`Down` notifications for those routes so that remote-rendered
//! sessions can confirm their backend before talking to it, and tear down
//! when it goes away.

use std::collections::HashMap;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteStatus {
    Up,
    Down,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteEvent {
    pub route_id: String,
    pub status: RouteStatus,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BusError {
    #[error("route bus channel closed")]
    Closed,
    #[error("route {route_id} not confirmed within {waited:?}")]
    Timeout { route_id: String, waited: Duration },
}

pub type BusResult<T> = Result<T, BusError>;

pub trait RouteBus: Send + Sync {
    fn subscribe(&self, route_id: &str) -> broadcast::Receiver<RouteEvent>;
    fn publish(&self, route_id: &str, status: RouteStatus) -> BusResult<()>;
    /// Last status published for `route_id`, if any.
    fn status(&self, route_id: &str) -> Option<RouteStatus>;
}

struct RouteSlot {
    sender: broadcast::Sender<RouteEvent>,
    status: Option<RouteStatus>,
}

impl RouteSlot {
    fn new() -> Self {
        Self {
            sender: broadcast::channel(32).0,
            status: None,
        }
    }
}

/// In-process bus; also the bus used by tests and the replay tool.
#[derive(Default)]
pub struct LocalRouteBus {
    routes: parking_lot::RwLock<HashMap<String, RouteSlot>>,
}

impl LocalRouteBus {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RouteBus for LocalRouteBus {
    fn subscribe(&self, route_id: &str) -> broadcast::Receiver<RouteEvent> {
        let mut guard = self.routes.write();
        guard
            .entry(route_id.to_string())
            .or_insert_with(RouteSlot::new)
            .sender
            .subscribe()
    }

    fn publish(&self, route_id: &str, status: RouteStatus) -> BusResult<()> {
        let mut guard = self.routes.write();
        let slot = guard
            .entry(route_id.to_string())
            .or_insert_with(RouteSlot::new);
        slot.status = Some(status);
        trace!(target = "route::bus", route_id, ?status, "route status published");
        // No subscribers is fine: the status is still recorded for late waiters.
        let _ = slot.sender.send(RouteEvent {
            route_id: route_id.to_string(),
            status,
        });
        Ok(())
    }

    fn status(&self, route_id: &str) -> Option<RouteStatus> {
        self.routes.read().get(route_id).and_then(|slot| slot.status)
    }
}

/// Waits until `route_id` reports `Up`, giving up after `wait`.
///
/// A route that is already up resolves immediately. `Down` notifications
/// while waiting do not end the wait; the route may still come up.
pub async fn wait_for_route<B: RouteBus + ?Sized>(
    bus: &B,
    route_id: &str,
    wait: Duration,
) -> BusResult<()> {
    let mut rx = bus.subscribe(route_id);
    if bus.status(route_id) == Some(RouteStatus::Up) {
        return Ok(());
    }
    let deadline = Instant::now() + wait;
    loop {
        match tokio::time::timeout_at(deadline, rx.recv()).await {
            Ok(Ok(event)) => {
                if event.status == RouteStatus::Up {
                    debug!(target = "route::bus", route_id, "route confirmed");
                    return Ok(());
                }
            }
            Ok(Err(broadcast::error::RecvError::Lagged(_))) => {
                if bus.status(route_id) == Some(RouteStatus::Up) {
                    return Ok(());
                }
            }
            Ok(Err(broadcast::error::RecvError::Closed)) => return Err(BusError::Closed),
            Err(_) => {
                return Err(BusError::Timeout {
                    route_id: route_id.to_string(),
                    waited: wait,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn subscribers_see_published_status() {
        let bus = LocalRouteBus::new();
        let mut sub = bus.subscribe("app/1");
        bus.publish("app/1", RouteStatus::Down).expect("publish ok");
        let event = sub.recv().await.expect("receive ok");
        assert_eq!(event.route_id, "app/1");
        assert_eq!(event.status, RouteStatus::Down);
        assert_eq!(bus.status("app/1"), Some(RouteStatus::Down));
        assert_eq!(bus.status("app/2"), None);
    }

    #[tokio::test]
    async fn wait_resolves_immediately_for_known_route() {
        let bus = LocalRouteBus::new();
        bus.publish("app/1", RouteStatus::Up).unwrap();
        wait_for_route(&bus, "app/1", Duration::from_millis(10))
            .await
            .expect("route already up");
    }

    #[tokio::test(start_paused = true)]
    async fn wait_resolves_when_route_comes_up_later() {
        let bus = Arc::new(LocalRouteBus::new());
        let publisher = bus.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            publisher.publish("app/1", RouteStatus::Down).unwrap();
            tokio::time::sleep(Duration::from_millis(200)).await;
            publisher.publish("app/1", RouteStatus::Up).unwrap();
        });
        wait_for_route(bus.as_ref(), "app/1", Duration::from_secs(1))
            .await
            .expect("route confirmed before timeout");
    }

    #[tokio::test(start_paused = true)]
    async fn wait_times_out() {
        let bus = LocalRouteBus::new();
        let err = wait_for_route(&bus, "missing", Duration::from_millis(50))
            .await
            .expect_err("nothing publishes the route");
        assert_eq!(
            err,
            BusError::Timeout {
                route_id: "missing".into(),
                waited: Duration::from_millis(50),
            }
        );
    }
}
