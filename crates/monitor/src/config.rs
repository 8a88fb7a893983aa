use common::{Environment, ReconnectPolicy, env_duration_ms, env_or, env_string};
use session::TransportConfig;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct MqttConfig {
    pub broker_host: String,
    pub broker_port: u16,
    pub topic: String,
    pub device_id: String,
}

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub environment: Environment,
    pub heartbeat_interval: Duration,
    pub heartbeat_timeout: Duration,
    pub connect_timeout: Duration,
    pub reconnect: ReconnectPolicy,
    pub test_mode_interval: Duration,
    pub settings_path: Option<PathBuf>,
    pub otel_endpoint: Option<String>,
    /// Present only when `MQTT_BROKER_HOST` is set.
    pub mqtt: Option<MqttConfig>,
}

/// Unset and blank both mean "not configured".
fn optional_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl MonitorConfig {
    pub fn from_env() -> Self {
        let reconnect_delay = env_duration_ms("MONITOR_RECONNECT_DELAY_MS", 5_000);
        let reconnect = match env_string("MONITOR_BACKOFF", "fixed").trim().to_lowercase().as_str() {
            "exponential" => ReconnectPolicy::CappedExponential {
                base: reconnect_delay,
                max: env_duration_ms("MONITOR_BACKOFF_MAX_MS", 60_000),
            },
            _ => ReconnectPolicy::Fixed {
                delay: reconnect_delay,
            },
        };

        let mqtt = optional_env("MQTT_BROKER_HOST").map(|broker_host| MqttConfig {
            broker_host,
            broker_port: env_or("MQTT_BROKER_PORT", 1883),
            topic: env_string("MQTT_TOPIC", "lifeguard/monitor/alerts"),
            device_id: env_string("MQTT_DEVICE_ID", "unknown"),
        });

        Self {
            environment: Environment::from_env(),
            heartbeat_interval: env_duration_ms("MONITOR_HEARTBEAT_INTERVAL_MS", 10_000),
            heartbeat_timeout: env_duration_ms("MONITOR_HEARTBEAT_TIMEOUT_MS", 10_000),
            connect_timeout: env_duration_ms("MONITOR_CONNECT_TIMEOUT_MS", 10_000),
            reconnect,
            test_mode_interval: env_duration_ms("MONITOR_TEST_MODE_INTERVAL_MS", 15_000),
            settings_path: optional_env("MONITOR_SETTINGS_PATH").map(PathBuf::from),
            otel_endpoint: optional_env("OTEL_EXPORTER_OTLP_ENDPOINT"),
            mqtt,
        }
    }

    pub fn transport(&self) -> TransportConfig {
        TransportConfig {
            heartbeat_interval: self.heartbeat_interval,
            heartbeat_timeout: self.heartbeat_timeout,
            connect_timeout: self.connect_timeout,
            reconnect: self.reconnect.clone(),
        }
    }
}
