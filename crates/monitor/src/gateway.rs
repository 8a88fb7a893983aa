use anyhow::Result;
use session::NotificationGateway;

/// Fallback gateway when no broker is configured: alerts go to the log.
#[derive(Debug, Default)]
pub struct ConsoleGateway;

impl NotificationGateway for ConsoleGateway {
    fn raise_alert(&mut self, title: &str, body: &str) -> Result<()> {
        tracing::warn!(title, body, "Notification raised");
        Ok(())
    }

    fn clear_alert(&mut self) -> Result<()> {
        tracing::info!("Notification cleared");
        Ok(())
    }
}
