//! Domain event publication.
//!
//! The engine emits one [`ActionEvent`] per accepted command. Out-of-scope
//! collaborators (notifications, dashboards) subscribe through a sink;
//! publication is fire-and-forget and never fails a command.

use tokio::sync::broadcast;

use capa_core::ActionEvent;

/// Receives domain events as transitions commit.
pub trait EventSink: Send + Sync + 'static {
    fn publish(&self, event: &ActionEvent);
}

/// Sink that drops every event. Used where no subscriber exists.
pub struct NullSink;

impl EventSink for NullSink {
    fn publish(&self, _event: &ActionEvent) {}
}

/// Fan-out sink backed by a tokio broadcast channel.
///
/// Send errors (no live subscribers) are ignored: the durable audit trail
/// lives in the repository, the channel is only a live feed.
pub struct BroadcastSink {
    tx: broadcast::Sender<ActionEvent>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ActionEvent> {
        self.tx.subscribe()
    }
}

impl EventSink for BroadcastSink {
    fn publish(&self, event: &ActionEvent) {
        let _ = self.tx.send(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use capa_core::{ActionEventKind, Status};
    use time::macros::datetime;

    fn event() -> ActionEvent {
        ActionEvent {
            action_id: "ca-1".to_string(),
            kind: ActionEventKind::Started,
            from_status: Some(Status::Pending),
            to_status: Status::InProgress,
            actor_id: "u-1".to_string(),
            at: datetime!(2026-01-01 00:00 UTC),
            detail: None,
        }
    }

    #[tokio::test]
    async fn broadcast_sink_delivers_to_subscriber() {
        let sink = BroadcastSink::new(8);
        let mut rx = sink.subscribe();
        sink.publish(&event());
        assert_eq!(rx.recv().await.unwrap(), event());
    }

    #[test]
    fn broadcast_sink_without_subscribers_does_not_panic() {
        let sink = BroadcastSink::new(8);
        sink.publish(&event());
    }
}
