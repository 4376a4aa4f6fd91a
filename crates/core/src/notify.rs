//! Fire-and-forget notifications about episode and encounter lifecycle changes.
//!
//! Publishing never fails the operation that triggered it. Nothing in the core consumes these
//! events.

use crate::constants::EVENTS_TARGET;
use serde::Serialize;
use tokio::sync::mpsc;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CareEvent {
    EpisodeStarted {
        episode: String,
        patient: String,
        organization: String,
        access_level: String,
    },
    EpisodeUpgraded {
        episode: String,
        access_level: String,
    },
    EpisodeEnded {
        episode: String,
    },
    EncounterStarted {
        encounter: String,
        episode: String,
    },
    EncounterEnded {
        encounter: String,
    },
}

impl CareEvent {
    pub fn name(&self) -> &'static str {
        match self {
            CareEvent::EpisodeStarted { .. } => "episode_started",
            CareEvent::EpisodeUpgraded { .. } => "episode_upgraded",
            CareEvent::EpisodeEnded { .. } => "episode_ended",
            CareEvent::EncounterStarted { .. } => "encounter_started",
            CareEvent::EncounterEnded { .. } => "encounter_ended",
        }
    }
}

pub trait EventPublisher: Send + Sync {
    fn publish(&self, event: CareEvent);
}

/// Emits each event as a structured record on the `care::events` tracing target.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingPublisher;

impl EventPublisher for TracingPublisher {
    fn publish(&self, event: CareEvent) {
        let payload = serde_json::to_string(&event).unwrap_or_default();
        tracing::info!(target: EVENTS_TARGET, event = event.name(), %payload);
    }
}

/// Forwards events to an in-process channel.
#[derive(Clone, Debug)]
pub struct ChannelPublisher {
    tx: mpsc::UnboundedSender<CareEvent>,
}

impl ChannelPublisher {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<CareEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventPublisher for ChannelPublisher {
    fn publish(&self, event: CareEvent) {
        if self.tx.send(event).is_err() {
            tracing::debug!("event receiver dropped");
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoopPublisher;

impl EventPublisher for NoopPublisher {
    fn publish(&self, _event: CareEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_publisher_delivers_in_order() {
        let (publisher, mut rx) = ChannelPublisher::channel();
        publisher.publish(CareEvent::EpisodeEnded {
            episode: "EpisodeOfCare/e1".into(),
        });
        publisher.publish(CareEvent::EncounterEnded {
            encounter: "Encounter/x".into(),
        });
        assert_eq!(rx.try_recv().unwrap().name(), "episode_ended");
        assert_eq!(rx.try_recv().unwrap().name(), "encounter_ended");
    }

    #[test]
    fn publishing_after_receiver_drop_does_not_panic() {
        let (publisher, rx) = ChannelPublisher::channel();
        drop(rx);
        publisher.publish(CareEvent::EpisodeEnded {
            episode: "EpisodeOfCare/e1".into(),
        });
    }

    #[test]
    fn events_serialise_with_a_tag() {
        let json = serde_json::to_value(CareEvent::EpisodeUpgraded {
            episode: "EpisodeOfCare/e1".into(),
            access_level: "full".into(),
        })
        .unwrap();
        assert_eq!(json["event"], "episode_upgraded");
        assert_eq!(json["access_level"], "full");
    }
}
