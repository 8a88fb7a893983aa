#![allow(dead_code)]

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use image::{DynamicImage, ImageFormat, RgbImage};
use session::{Connector, Inbound, Link, TransportConfig, TransportError, TransportEvent};
use common::ReconnectPolicy;
use std::collections::VecDeque;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use url::Url;

pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);

pub fn test_url() -> Url {
    Url::parse("ws://pool.test:8765").unwrap()
}

pub fn test_config() -> TransportConfig {
    TransportConfig {
        heartbeat_interval: Duration::from_secs(2),
        heartbeat_timeout: Duration::from_secs(1),
        connect_timeout: Duration::from_secs(3),
        reconnect: ReconnectPolicy::Fixed {
            delay: RECONNECT_DELAY,
        },
    }
}

/// One scripted outcome for a connect attempt.
pub enum Attempt {
    Refuse(&'static str),
    Accept(ScriptedLink),
}

/// Connector that plays back a list of attempt outcomes, then refuses forever.
#[derive(Clone)]
pub struct ScriptedConnector {
    attempts: Arc<Mutex<VecDeque<Attempt>>>,
    connects: Arc<AtomicUsize>,
}

impl ScriptedConnector {
    pub fn new(attempts: Vec<Attempt>) -> Self {
        Self {
            attempts: Arc::new(Mutex::new(attempts.into())),
            connects: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

impl Connector for ScriptedConnector {
    type Link = ScriptedLink;

    async fn connect(&self, _url: &Url) -> Result<ScriptedLink, TransportError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let next = self.attempts.lock().unwrap().pop_front();
        match next {
            Some(Attempt::Accept(link)) => Ok(link),
            Some(Attempt::Refuse(reason)) => Err(TransportError::Connect(reason.to_string())),
            None => Err(TransportError::Connect("connection refused".to_string())),
        }
    }
}

/// In-memory link. The paired [`ServerHandle`] plays the server side.
pub struct ScriptedLink {
    inbound: mpsc::UnboundedReceiver<Result<Inbound, TransportError>>,
    pongs: VecDeque<Vec<u8>>,
    auto_pong: bool,
    pings: Arc<AtomicUsize>,
}

pub struct ServerHandle {
    tx: mpsc::UnboundedSender<Result<Inbound, TransportError>>,
    pings: Arc<AtomicUsize>,
}

impl ScriptedLink {
    /// A link whose server answers heartbeats.
    pub fn responsive() -> (Self, ServerHandle) {
        Self::build(true)
    }

    /// A link whose server never answers heartbeats.
    pub fn silent() -> (Self, ServerHandle) {
        Self::build(false)
    }

    fn build(auto_pong: bool) -> (Self, ServerHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let pings = Arc::new(AtomicUsize::new(0));
        (
            Self {
                inbound: rx,
                pongs: VecDeque::new(),
                auto_pong,
                pings: Arc::clone(&pings),
            },
            ServerHandle { tx, pings },
        )
    }
}

impl Link for ScriptedLink {
    async fn recv(&mut self) -> Option<Result<Inbound, TransportError>> {
        if let Some(payload) = self.pongs.pop_front() {
            return Some(Ok(Inbound::Pong(payload)));
        }
        self.inbound.recv().await
    }

    async fn send_ping(&mut self, payload: Vec<u8>) -> Result<(), TransportError> {
        self.pings.fetch_add(1, Ordering::SeqCst);
        if self.auto_pong {
            self.pongs.push_back(payload);
        }
        Ok(())
    }

    async fn close(&mut self) {
        self.inbound.close();
    }
}

impl ServerHandle {
    pub fn send_text(&self, text: &str) {
        let _ = self.tx.send(Ok(Inbound::Text(text.to_string())));
    }

    pub fn send_binary(&self, data: Vec<u8>) {
        let _ = self.tx.send(Ok(Inbound::Binary(data)));
    }

    pub fn fail(&self, error: TransportError) {
        let _ = self.tx.send(Err(error));
    }

    pub fn pings(&self) -> usize {
        self.pings.load(Ordering::SeqCst)
    }
}

pub async fn next_event<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    tokio::time::timeout(Duration::from_secs(120), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

pub fn status_of(event: &TransportEvent) -> Option<session::ConnectionState> {
    match event {
        TransportEvent::Status { state, .. } => Some(*state),
        TransportEvent::Frame(_) => None,
    }
}

/// Base64 of a black RGB PNG, as the detection server would send it.
pub fn png_base64(width: u32, height: u32) -> String {
    let mut png = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(RgbImage::new(width, height))
        .write_to(&mut png, ImageFormat::Png)
        .unwrap();
    STANDARD.encode(png.into_inner())
}
