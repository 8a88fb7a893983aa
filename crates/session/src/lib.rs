//! Session controller for a remote drowning-detection monitor.
//!
//! Data flow: socket message → [`decoder`] → [`image_pipeline`] →
//! [`state_machine`] → [`SessionEvent`] subscribers (presentation,
//! notifications).

pub mod decoder;
pub mod errors;
pub mod image_pipeline;
pub mod notify;
pub mod service;
pub mod simulator;
pub mod state_machine;
pub mod transport;
pub mod types;

pub use errors::{DecodeError, ImageError, TransportError};
pub use image_pipeline::{ImagePipeline, PixelBuffer};
pub use notify::{NotificationGateway, forward_notifications};
pub use service::{EventStream, SessionController};
pub use simulator::SimulatedConnector;
pub use state_machine::{Session, SessionInput};
pub use transport::{ConnectionManager, Connector, EventSink, Link, TransportConfig, WsConnector};
pub use types::{
    AlertState, ConnectionState, DetectionBox, Frame, Inbound, SessionEvent, SessionFrame,
    TransportEvent,
};
