use crate::service::EventStream;
use crate::types::SessionEvent;

pub const ALERT_TITLE: &str = "ALERT - PERSON DROWNING";
pub const ALERT_BODY: &str = "Tap to check";

/// OS-level (or remote) alerting: notifications, vibration, push.
pub trait NotificationGateway: Send {
    fn raise_alert(&mut self, title: &str, body: &str) -> anyhow::Result<()>;

    fn clear_alert(&mut self) -> anyhow::Result<()>;
}

impl<G: NotificationGateway + ?Sized> NotificationGateway for Box<G> {
    fn raise_alert(&mut self, title: &str, body: &str) -> anyhow::Result<()> {
        (**self).raise_alert(title, body)
    }

    fn clear_alert(&mut self) -> anyhow::Result<()> {
        (**self).clear_alert()
    }
}

/// Drive a gateway from a session event stream until the stream closes.
///
/// Blocking: run it on its own thread (`spawn_blocking`), gateways are
/// allowed to block on I/O. `AlertRaised` is only emitted on the edge into
/// the alerting state, so the gateway sees one raise per incident.
pub fn forward_notifications<G: NotificationGateway>(mut events: EventStream, mut gateway: G) {
    while let Some(event) = events.blocking_recv() {
        match event {
            SessionEvent::AlertRaised(detections) => {
                tracing::debug!(detections = detections.len(), "Forwarding alert");
                if let Err(e) = gateway.raise_alert(ALERT_TITLE, ALERT_BODY) {
                    tracing::error!(error = %e, "Failed to raise alert notification");
                }
            }
            SessionEvent::AlertCleared => {
                if let Err(e) = gateway.clear_alert() {
                    tracing::error!(error = %e, "Failed to clear alert notification");
                }
            }
            SessionEvent::ConnectionStatusChanged(..) | SessionEvent::ImageUpdated(_) => {}
        }
    }

    tracing::debug!("Notification stream closed");
}
