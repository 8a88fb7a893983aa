//! Test mode: a fake detection server that lives in-process.

use crate::errors::TransportError;
use crate::transport::{Connector, Link};
use crate::types::Inbound;
use serde_json::json;
use std::collections::VecDeque;
use std::ops::RangeInclusive;
use std::time::Duration;
use tokio::time::{self, Interval, MissedTickBehavior};
use url::Url;

pub const SIMULATED_URL: &str = "simulated://local";

const COORDINATE_RANGE: RangeInclusive<i32> = 100..=500;

/// Connects instantly and emits one drowning detection at a random position
/// every `interval`.
#[derive(Debug, Clone)]
pub struct SimulatedConnector {
    interval: Duration,
}

impl SimulatedConnector {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    pub fn url() -> Url {
        Url::parse(SIMULATED_URL).expect("static simulator url is valid")
    }
}

impl Default for SimulatedConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(15))
    }
}

pub struct SimulatedLink {
    ticker: Interval,
    pongs: VecDeque<Vec<u8>>,
    rng: fastrand::Rng,
}

impl Connector for SimulatedConnector {
    type Link = SimulatedLink;

    async fn connect(&self, url: &Url) -> Result<SimulatedLink, TransportError> {
        tracing::info!(url = %url, interval_ms = self.interval.as_millis() as u64, "Test mode active");

        let mut ticker = time::interval_at(time::Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        Ok(SimulatedLink {
            ticker,
            pongs: VecDeque::new(),
            rng: fastrand::Rng::new(),
        })
    }
}

impl SimulatedLink {
    fn alert_message(&mut self) -> String {
        json!({
            "drowning_detected": true,
            "drowning_boxes": [{
                "center_x": self.rng.i32(COORDINATE_RANGE),
                "center_y": self.rng.i32(COORDINATE_RANGE),
            }],
            "image": "",
        })
        .to_string()
    }
}

impl Link for SimulatedLink {
    async fn recv(&mut self) -> Option<Result<Inbound, TransportError>> {
        if let Some(payload) = self.pongs.pop_front() {
            return Some(Ok(Inbound::Pong(payload)));
        }
        self.ticker.tick().await;
        Some(Ok(Inbound::Text(self.alert_message())))
    }

    async fn send_ping(&mut self, payload: Vec<u8>) -> Result<(), TransportError> {
        self.pongs.push_back(payload);
        Ok(())
    }

    async fn close(&mut self) {}
}
