use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::info;

use super::repository::{DispatchError, NotificationDispatch, OwnershipEvent};

/// Notification dispatch backed by an in-process queue. Events are consumed by
/// a separate task so the committing request never waits on delivery.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    sender: UnboundedSender<OwnershipEvent>,
}

impl ChannelNotifier {
    pub fn channel() -> (Self, UnboundedReceiver<OwnershipEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl NotificationDispatch for ChannelNotifier {
    fn notify(&self, event: OwnershipEvent) -> Result<(), DispatchError> {
        self.sender.send(event).map_err(|_| DispatchError::Closed)
    }
}

/// Drains the outbox until every sender is dropped, logging each event for the
/// downstream mailer.
pub async fn drain_outbox(mut receiver: UnboundedReceiver<OwnershipEvent>) {
    while let Some(event) = receiver.recv().await {
        let payload = serde_json::to_string(&event).unwrap_or_default();
        info!(kind = event.kind(), %payload, "ownership notification queued");
    }
}
