//! Topic-routed event fan-out for cycle observers.
//!
//! One [`tokio::sync::broadcast`] channel per [`Topic`]: each subscriber sees
//! every event on its topic, and a slow one only loses its own backlog.
//! Publishing never blocks, so the control cycle publishes while holding
//! the robot lock.
//!
//! # Topics
//!
//! | Topic | Carries |
//! |---|---|
//! | [`Topic::Telemetry`] | End-of-cycle robot state snapshots |
//! | [`Topic::Commands`] | The resolved command of each cycle |
//! | [`Topic::SystemAlerts`] | Connection loss, behavior faults, overruns |

use motive_types::{Event, EventPayload, MotiveError};
use tokio::sync::broadcast;
use tracing::{trace, warn};

/// Events buffered per topic before a lagging subscriber starts losing them.
const DEFAULT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Telemetry,
    Commands,
    SystemAlerts,
}

impl Topic {
    /// The lane a payload travels on.
    pub fn of(payload: &EventPayload) -> Self {
        match payload {
            EventPayload::Telemetry(_) => Topic::Telemetry,
            EventPayload::Command { .. } => Topic::Commands,
            EventPayload::Alert(_) => Topic::SystemAlerts,
        }
    }
}

/// Shared event bus.  Clone it cheaply: all clones share the same
/// underlying broadcast channels.
///
/// ```
/// use motive_middleware::bus::{EventBus, Topic};
/// use motive_types::{Alert, Event, EventPayload};
///
/// let bus = EventBus::default();
/// let mut alerts = bus.subscribe_to(Topic::SystemAlerts);
///
/// let event = Event::new("doc", EventPayload::Alert(Alert::ConnectionRestored));
/// assert_eq!(bus.publish(event).unwrap(), 1);
/// assert!(alerts.try_recv().unwrap().is_some());
/// ```
#[derive(Clone, Debug)]
pub struct EventBus {
    telemetry: broadcast::Sender<Event>,
    commands: broadcast::Sender<Event>,
    system_alerts: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create a new bus.  `capacity` applies to every topic independently
    /// and must be non-zero.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (telemetry, _) = broadcast::channel(capacity);
        let (commands, _) = broadcast::channel(capacity);
        let (system_alerts, _) = broadcast::channel(capacity);
        Self {
            telemetry,
            commands,
            system_alerts,
        }
    }

    /// Publish `event` on the given topic.
    ///
    /// Returns the number of subscribers that were handed the event; `Ok(0)`
    /// when nobody is listening, which is a normal condition.
    pub fn publish_to(&self, topic: Topic, event: Event) -> Result<usize, MotiveError> {
        match self.topic_sender(topic).send(event) {
            Ok(n) => Ok(n),
            Err(broadcast::error::SendError(_)) => {
                trace!(?topic, "no subscribers; event dropped");
                Ok(0)
            }
        }
    }

    /// Publish on the topic matching the event's payload.
    pub fn publish(&self, event: Event) -> Result<usize, MotiveError> {
        let topic = Topic::of(&event.payload);
        self.publish_to(topic, event)
    }

    pub fn subscribe_to(&self, topic: Topic) -> TopicReceiver {
        TopicReceiver {
            topic,
            receiver: self.topic_sender(topic).subscribe(),
        }
    }

    /// Current number of subscribers on `topic`.
    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.topic_sender(topic).receiver_count()
    }

    fn topic_sender(&self, topic: Topic) -> &broadcast::Sender<Event> {
        match topic {
            Topic::Telemetry => &self.telemetry,
            Topic::Commands => &self.commands,
            Topic::SystemAlerts => &self.system_alerts,
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// A receiver bound to a single [`Topic`] channel.
///
/// Usable from async code ([`recv`][Self::recv]) and from plain threads
/// ([`try_recv`][Self::try_recv], [`blocking_recv`][Self::blocking_recv]).
pub struct TopicReceiver {
    topic: Topic,
    receiver: broadcast::Receiver<Event>,
}

impl TopicReceiver {
    /// Wait for the next event.  A lagging subscriber skips the dropped
    /// events with a warning; `None` means the bus is gone.
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(n)) => self.lagged(n),
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Block the current (non-async) thread until the next event.
    pub fn blocking_recv(&mut self) -> Option<Event> {
        loop {
            match self.receiver.blocking_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(n)) => self.lagged(n),
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Next buffered event, if any, without waiting.
    pub fn try_recv(&mut self) -> Result<Option<Event>, MotiveError> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Ok(Some(event)),
                Err(broadcast::error::TryRecvError::Empty) => return Ok(None),
                Err(broadcast::error::TryRecvError::Lagged(n)) => self.lagged(n),
                Err(broadcast::error::TryRecvError::Closed) => {
                    return Err(MotiveError::Channel(format!(
                        "{:?} channel closed",
                        self.topic
                    )));
                }
            }
        }
    }

    /// Drain every buffered event.
    pub fn drain(&mut self) -> Vec<Event> {
        let mut out = Vec::new();
        while let Ok(Some(event)) = self.try_recv() {
            out.push(event);
        }
        out
    }

    pub fn topic(&self) -> Topic {
        self.topic
    }

    fn lagged(&self, n: u64) {
        warn!(topic = ?self.topic, lagged_by = n, "subscriber lagged; events dropped");
    }
}

#[cfg(test)]
mod tests {
    use motive_types::{Alert, ResolvedCommand, Telemetry};

    use super::*;

    fn telemetry_event() -> Event {
        Event::new(
            "motive-middleware::test",
            EventPayload::Telemetry(Telemetry::default()),
        )
    }

    fn alert_event() -> Event {
        Event::new(
            "motive-middleware::test",
            EventPayload::Alert(Alert::ConnectionLost { silent_ms: 2500 }),
        )
    }

    #[tokio::test]
    async fn publish_and_receive() -> Result<(), Box<dyn std::error::Error>> {
        let bus = EventBus::default();
        let mut rx = bus.subscribe_to(Topic::Telemetry);

        let event = telemetry_event();
        bus.publish_to(Topic::Telemetry, event.clone())?;

        let received = rx.recv().await.ok_or("bus closed")?;
        assert_eq!(received.id, event.id);
        assert_eq!(received.source, event.source);
        Ok(())
    }

    #[test]
    fn publish_without_subscribers_is_not_an_error() {
        let bus = EventBus::default();
        assert_eq!(bus.publish(telemetry_event()).unwrap(), 0);
    }

    #[test]
    fn payload_selects_topic() {
        let bus = EventBus::default();
        let mut alerts = bus.subscribe_to(Topic::SystemAlerts);
        let mut commands = bus.subscribe_to(Topic::Commands);

        bus.publish(alert_event()).unwrap();
        bus.publish(Event::new(
            "test",
            EventPayload::Command {
                cycle: 3,
                command: ResolvedCommand::idle(),
            },
        ))
        .unwrap();

        assert_eq!(alerts.drain().len(), 1);
        let got = commands.drain();
        assert_eq!(got.len(), 1);
        assert!(matches!(got[0].payload, EventPayload::Command { cycle: 3, .. }));
    }

    #[tokio::test]
    async fn topic_multiple_subscribers_receive_same_event()
    -> Result<(), Box<dyn std::error::Error>> {
        let bus = EventBus::default();
        let mut subscriber1 = bus.subscribe_to(Topic::Telemetry);
        let mut subscriber2 = bus.subscribe_to(Topic::Telemetry);
        assert_eq!(bus.subscriber_count(Topic::Telemetry), 2);

        let event = telemetry_event();
        assert_eq!(bus.publish_to(Topic::Telemetry, event.clone())?, 2);

        assert_eq!(subscriber1.recv().await.ok_or("closed")?.id, event.id);
        assert_eq!(subscriber2.recv().await.ok_or("closed")?.id, event.id);
        Ok(())
    }

    /// A subscriber on `SystemAlerts` must not receive events published to
    /// `Telemetry`.
    #[tokio::test]
    async fn topic_subscriber_does_not_receive_other_topic_events() {
        let bus = EventBus::default();
        let mut alerts_sub = bus.subscribe_to(Topic::SystemAlerts);
        let _telemetry_sub = bus.subscribe_to(Topic::Telemetry);

        bus.publish(telemetry_event()).unwrap();

        let result =
            tokio::time::timeout(std::time::Duration::from_millis(50), alerts_sub.recv()).await;
        assert!(result.is_err(), "SystemAlerts subscriber must not receive a Telemetry event");
    }

    /// A slow subscriber skips what it missed instead of failing.
    #[test]
    fn lagging_subscriber_skips_dropped_events() {
        let bus = EventBus::new(4);
        let mut slow = bus.subscribe_to(Topic::SystemAlerts);
        for _ in 0..100 {
            bus.publish(alert_event()).unwrap();
        }
        assert_eq!(slow.drain().len(), 4);
    }

    #[test]
    fn try_recv_reports_closed_bus() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe_to(Topic::Commands);
        drop(bus);
        assert!(matches!(rx.try_recv(), Err(MotiveError::Channel(_))));
    }
}
