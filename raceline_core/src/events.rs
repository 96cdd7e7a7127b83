//! Race events and the per-route event bus.

use crate::ids::{RouteId, TriggerId};
use crate::record::RecordHandle;
use raceline_env::ActorId;
use std::collections::HashMap;
use tokio::sync::broadcast;

/// Why a race ended without a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailReason {
    /// Entered a Fail trigger
    FailTrigger(TriggerId),
    /// Mounted on a route that disallows mounts
    Mounted,
    /// Re-entered the Start trigger mid-race
    Restarted,
}

/// Something that happened on a route during a tick.
///
/// Each fires at most once per transition.
#[derive(Debug, Clone)]
pub enum RaceEvent {
    Started {
        route: RouteId,
        actor: ActorId,
    },
    Checkpoint {
        route: RouteId,
        actor: ActorId,
        trigger: TriggerId,
        /// Zero-based count of checkpoints passed before this one
        index: usize,
        offset_ms: u64,
    },
    Finished {
        route: RouteId,
        actor: ActorId,
        record: RecordHandle,
    },
    Failed {
        route: RouteId,
        actor: ActorId,
        reason: FailReason,
    },
    /// Diagnostic for the acting actor (rejected start, missed checkpoints)
    Notice {
        route: RouteId,
        actor: ActorId,
        message: String,
    },
}

impl RaceEvent {
    pub fn route(&self) -> RouteId {
        match self {
            RaceEvent::Started { route, .. }
            | RaceEvent::Checkpoint { route, .. }
            | RaceEvent::Finished { route, .. }
            | RaceEvent::Failed { route, .. }
            | RaceEvent::Notice { route, .. } => *route,
        }
    }

    pub fn actor(&self) -> ActorId {
        match self {
            RaceEvent::Started { actor, .. }
            | RaceEvent::Checkpoint { actor, .. }
            | RaceEvent::Finished { actor, .. }
            | RaceEvent::Failed { actor, .. }
            | RaceEvent::Notice { actor, .. } => *actor,
        }
    }

    /// Short label for logs and exports.
    pub fn label(&self) -> &'static str {
        match self {
            RaceEvent::Started { .. } => "started",
            RaceEvent::Checkpoint { .. } => "checkpoint",
            RaceEvent::Finished { .. } => "finished",
            RaceEvent::Failed { .. } => "failed",
            RaceEvent::Notice { .. } => "notice",
        }
    }
}

/// Typed event channels keyed by route.
///
/// Subscribers hold a `broadcast::Receiver`; dropping it unsubscribes.
/// Clearing the bus (zone change) closes every channel.
#[derive(Debug)]
pub struct EventBus {
    capacity: usize,
    channels: HashMap<RouteId, broadcast::Sender<RaceEvent>>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            channels: HashMap::new(),
        }
    }

    /// The sending side for a route, creating the channel on first use.
    pub fn sender(&mut self, route: RouteId) -> broadcast::Sender<RaceEvent> {
        self.channels
            .entry(route)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }

    pub fn subscribe(&mut self, route: RouteId) -> broadcast::Receiver<RaceEvent> {
        self.sender(route).subscribe()
    }

    /// Deliver an event to its route's subscribers.
    ///
    /// Returns the number of receivers reached; zero when nobody listens.
    pub fn publish(&self, event: RaceEvent) -> usize {
        self.channels
            .get(&event.route())
            .and_then(|tx| tx.send(event).ok())
            .unwrap_or(0)
    }

    pub fn remove(&mut self, route: RouteId) {
        self.channels.remove(&route);
    }

    pub fn clear(&mut self) {
        self.channels.clear();
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_events_reach_only_their_route() {
        let mut bus = EventBus::new(16);
        let (a, b) = (RouteId::from_seed(1), RouteId::from_seed(2));
        let mut rx_a = bus.subscribe(a);
        let mut rx_b = bus.subscribe(b);
        let actor = ActorId::from_seed(7);

        assert_eq!(bus.publish(RaceEvent::Started { route: a, actor }), 1);

        let got = rx_a.recv().await.unwrap();
        assert_eq!(got.route(), a);
        assert_eq!(got.label(), "started");
        assert!(rx_b.try_recv().is_err());
    }

    #[test]
    fn test_publish_without_channel_is_noop() {
        let bus = EventBus::new(4);
        let sent = bus.publish(RaceEvent::Started {
            route: RouteId::new(),
            actor: ActorId::new(),
        });
        assert_eq!(sent, 0);
    }

    #[tokio::test]
    async fn test_clear_closes_channels() {
        let mut bus = EventBus::new(4);
        let route = RouteId::new();
        let mut rx = bus.subscribe(route);

        bus.clear();

        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Closed)
        ));
    }
}
