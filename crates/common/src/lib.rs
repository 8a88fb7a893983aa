pub mod config;
pub mod logging;
pub mod retry;
pub mod telemetry;

pub use config::{Environment, env_duration_ms, env_or, env_string};
pub use logging::setup_logging;
pub use retry::{ReconnectPolicy, with_jitter};
pub use telemetry::TelemetryGuard;
