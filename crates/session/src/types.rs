use crate::image_pipeline::PixelBuffer;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Reported hazard location, in source image pixels.
///
/// Boxes carry no identity across frames: each frame's list replaces the
/// previous one wholesale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DetectionBox {
    pub center_x: i32,
    pub center_y: i32,
}

impl DetectionBox {
    pub fn new(center_x: i32, center_y: i32) -> Self {
        Self { center_x, center_y }
    }
}

/// One decoded server message, before image decompression.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Frame {
    pub status_text: Option<String>,
    pub drowning_detected: bool,
    /// Compressed still image (JPEG/PNG) as received.
    pub image: Option<Vec<u8>>,
    /// In detection order.
    pub detections: Vec<DetectionBox>,
}

impl Frame {
    /// A frame that should drive the alert: flag set and at least one box.
    pub fn is_alerting(&self) -> bool {
        self.drowning_detected && !self.detections.is_empty()
    }
}

/// A frame after the image pipeline ran. This is what the state machine consumes.
#[derive(Debug, Clone, Default)]
pub struct SessionFrame {
    pub status_text: Option<String>,
    pub drowning_detected: bool,
    pub detections: Vec<DetectionBox>,
    pub image: Option<Arc<PixelBuffer>>,
}

impl SessionFrame {
    pub fn is_alerting(&self) -> bool {
        self.drowning_detected && !self.detections.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
        }
    }
}

/// Alert lifecycle. `Dismissed` only exists for the instant between a user
/// dismissal and the return to `Idle`; it is never observed at rest.
#[derive(Debug, Clone, Default)]
pub enum AlertState {
    #[default]
    Idle,
    Alerting {
        detections: Vec<DetectionBox>,
        image: Option<Arc<PixelBuffer>>,
    },
    Dismissed,
}

impl AlertState {
    pub fn is_alerting(&self) -> bool {
        matches!(self, AlertState::Alerting { .. })
    }

    pub fn name(&self) -> &'static str {
        match self {
            AlertState::Idle => "idle",
            AlertState::Alerting { .. } => "alerting",
            AlertState::Dismissed => "dismissed",
        }
    }
}

/// Outward events. The only thing presentation and notification layers see.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    ConnectionStatusChanged(ConnectionState, Option<String>),
    ImageUpdated(Arc<PixelBuffer>),
    AlertRaised(Vec<DetectionBox>),
    AlertCleared,
}

/// Raw message as delivered by a [`Link`](crate::transport::Link).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Text(String),
    Binary(Vec<u8>),
    Pong(Vec<u8>),
}

/// What the connection manager reports, in arrival order.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    Status {
        state: ConnectionState,
        error: Option<String>,
    },
    Frame(SessionFrame),
}
