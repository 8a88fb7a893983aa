use std::io;
use std::time::Duration;
use thiserror::Error;

/// A single message could not be turned into a frame. Never fatal.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Empty message")]
    Empty,

    #[error("Invalid base64 image: {0}")]
    InvalidBase64(#[from] base64::DecodeError),
}

/// Image bytes could not be turned into a pixel buffer. Never fatal.
#[derive(Error, Debug)]
pub enum ImageError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Image decode failed: {0}")]
    Decode(#[from] image::ImageError),

    #[error("Unsupported color type: {0}")]
    UnsupportedColor(String),

    #[error("Image has zero width or height")]
    EmptyImage,

    #[error("Image too large: {width}x{height}")]
    TooLarge { width: u32, height: u32 },
}

/// Connection-level failure. Always answered with a reconnect, never surfaced
/// as fatal.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Connection attempt timed out after {0:?}")]
    ConnectTimeout(Duration),

    #[error("Socket error: {0}")]
    Socket(String),

    #[error("Connection closed by server: {0}")]
    ClosedByPeer(String),

    #[error("No heartbeat acknowledgement within {0:?}")]
    HeartbeatTimeout(Duration),
}

impl From<tokio_tungstenite::tungstenite::Error> for TransportError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        TransportError::Socket(err.to_string())
    }
}
