//! Connection lifecycle: connect, heartbeat, reconnect forever, stop.
//!
//! One task per started connection. It owns the [`ConnectionState`], decodes
//! every inbound message (decoder + image pipeline) and reports everything,
//! in order, through an [`EventSink`].

use crate::decoder;
use crate::errors::TransportError;
use crate::image_pipeline::ImagePipeline;
use crate::types::{ConnectionState, Frame, Inbound, SessionFrame, TransportEvent};
use common::ReconnectPolicy;
use futures_util::{SinkExt, StreamExt};
use opentelemetry::{global, metrics::Counter};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use url::Url;

/// Opens links to a server.
pub trait Connector: Send + Sync + 'static {
    type Link: Link;

    fn connect(&self, url: &Url) -> impl Future<Output = Result<Self::Link, TransportError>> + Send;
}

/// An established bidirectional message connection.
pub trait Link: Send + 'static {
    /// Next message. `None` means the connection is gone. Must be cancel safe.
    fn recv(&mut self) -> impl Future<Output = Option<Result<Inbound, TransportError>>> + Send;

    fn send_ping(&mut self, payload: Vec<u8>) -> impl Future<Output = Result<(), TransportError>> + Send;

    fn close(&mut self) -> impl Future<Output = ()> + Send;
}

/// Receives transport events. Implementations must not drop or reorder.
pub trait EventSink: Clone + Send + 'static {
    fn emit(&self, event: TransportEvent);
}

impl EventSink for mpsc::UnboundedSender<TransportEvent> {
    fn emit(&self, event: TransportEvent) {
        if self.send(event).is_err() {
            tracing::debug!("Transport event receiver dropped");
        }
    }
}

#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub heartbeat_interval: Duration,
    /// How long a heartbeat may stay unacknowledged.
    pub heartbeat_timeout: Duration,
    pub connect_timeout: Duration,
    pub reconnect: ReconnectPolicy,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(10),
            heartbeat_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(10),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

/// WebSocket connector (`ws://` and `wss://`).
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

pub struct WsLink {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl Connector for WsConnector {
    type Link = WsLink;

    async fn connect(&self, url: &Url) -> Result<WsLink, TransportError> {
        let (stream, response) = connect_async(url.as_str())
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        tracing::debug!(status = %response.status(), url = %url, "WebSocket handshake complete");

        Ok(WsLink { stream })
    }
}

impl Link for WsLink {
    async fn recv(&mut self) -> Option<Result<Inbound, TransportError>> {
        loop {
            let message = match self.stream.next().await? {
                Ok(message) => message,
                Err(e) => return Some(Err(e.into())),
            };

            match message {
                Message::Text(text) => return Some(Ok(Inbound::Text(text))),
                Message::Binary(data) => return Some(Ok(Inbound::Binary(data))),
                Message::Pong(payload) => return Some(Ok(Inbound::Pong(payload))),
                Message::Close(frame) => {
                    let reason = match frame {
                        Some(frame) => format!("{} {}", u16::from(frame.code), frame.reason),
                        None => "no close frame".to_string(),
                    };
                    return Some(Err(TransportError::ClosedByPeer(reason)));
                }
                // Pongs to server pings are queued by tungstenite itself.
                Message::Ping(_) | Message::Frame(_) => continue,
            }
        }
    }

    async fn send_ping(&mut self, payload: Vec<u8>) -> Result<(), TransportError> {
        self.stream.send(Message::Ping(payload)).await?;
        Ok(())
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.close(None).await {
            tracing::debug!(error = %e, "WebSocket close failed");
        }
    }
}

/// Cooperative stop token shared between [`ConnectionManager::stop`] and the
/// connection task.
#[derive(Clone)]
struct StopSignal {
    rx: watch::Receiver<bool>,
}

impl StopSignal {
    fn is_stopped(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once stop was requested (or the manager is gone).
    async fn stopped(&mut self) {
        let _ = self.rx.wait_for(|stopped| *stopped).await;
    }
}

struct TransportMetrics {
    frames: Counter<u64>,
    decode_errors: Counter<u64>,
    image_errors: Counter<u64>,
    reconnects: Counter<u64>,
}

impl TransportMetrics {
    fn new() -> Self {
        let meter = global::meter("session.transport");
        Self {
            frames: meter
                .u64_counter("monitor_frames_total")
                .with_description("Frames received and decoded")
                .build(),
            decode_errors: meter
                .u64_counter("monitor_decode_errors_total")
                .with_description("Messages dropped because they could not be decoded")
                .build(),
            image_errors: meter
                .u64_counter("monitor_image_errors_total")
                .with_description("Images skipped because they could not be decompressed")
                .build(),
            reconnects: meter
                .u64_counter("monitor_reconnects_total")
                .with_description("Reconnect attempts scheduled")
                .build(),
        }
    }
}

/// Owns the connection state and reports every transition and frame.
struct Reporter<S: EventSink> {
    state: ConnectionState,
    sink: S,
    pipeline: ImagePipeline,
    metrics: TransportMetrics,
    frames_received: u64,
}

impl<S: EventSink> Reporter<S> {
    fn new(sink: S) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            sink,
            pipeline: ImagePipeline::new(),
            metrics: TransportMetrics::new(),
            frames_received: 0,
        }
    }

    fn transition(&mut self, state: ConnectionState, error: Option<String>) {
        tracing::info!(
            from = self.state.as_str(),
            to = state.as_str(),
            error = ?error,
            "Connection state change"
        );
        self.state = state;
        self.sink.emit(TransportEvent::Status { state, error });
    }

    fn message(&mut self, decoded: Result<Frame, crate::errors::DecodeError>) {
        let frame = match decoded {
            Ok(frame) => frame,
            Err(e) => {
                self.metrics.decode_errors.add(1, &[]);
                tracing::warn!(error = %e, "Dropping undecodable message");
                return;
            }
        };

        let image = frame.image.as_deref().and_then(|bytes| {
            match self.pipeline.to_pixel_buffer(bytes) {
                Ok(buffer) => Some(buffer),
                Err(e) => {
                    self.metrics.image_errors.add(1, &[]);
                    tracing::warn!(error = %e, bytes = bytes.len(), "Skipping image update");
                    None
                }
            }
        });

        self.frames_received += 1;
        self.metrics.frames.add(1, &[]);
        if self.frames_received.is_multiple_of(30) {
            tracing::debug!(
                frames_received = self.frames_received,
                detections = frame.detections.len(),
                buffer_allocations = self.pipeline.allocations(),
                "Transport status"
            );
        }

        self.sink.emit(TransportEvent::Frame(SessionFrame {
            status_text: frame.status_text,
            drowning_detected: frame.drowning_detected,
            detections: frame.detections,
            image,
        }));
    }
}

enum LinkExit {
    Stopped,
    Failed(TransportError),
}

struct PendingPing {
    token: u64,
    deadline: Instant,
}

struct Running {
    url: Url,
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Starts and stops the connection task.
pub struct ConnectionManager<C: Connector, S: EventSink> {
    connector: Arc<C>,
    config: TransportConfig,
    sink: S,
    running: Option<Running>,
}

impl<C: Connector, S: EventSink> ConnectionManager<C, S> {
    pub fn new(connector: C, config: TransportConfig, sink: S) -> Self {
        Self {
            connector: Arc::new(connector),
            config,
            sink,
            running: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    pub fn url(&self) -> Option<&Url> {
        self.running.as_ref().map(|r| &r.url)
    }

    /// Connect to `url`, replacing any current connection.
    pub async fn start(&mut self, url: Url) {
        self.stop().await;

        tracing::info!(url = %url, "Starting connection");

        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(run_connection(
            Arc::clone(&self.connector),
            url.clone(),
            self.config.clone(),
            self.sink.clone(),
            StopSignal { rx: stop_rx },
        ));

        self.running = Some(Running {
            url,
            stop: stop_tx,
            task,
        });
    }

    /// Close the connection and cancel any pending reconnect. Once this
    /// returns the task has finished; its last event is `Disconnected`.
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };

        let _ = running.stop.send(true);
        if let Err(e) = running.task.await {
            tracing::error!(error = %e, "Connection task failed");
        }
        tracing::info!(url = %running.url, "Connection stopped");
    }
}

async fn run_connection<C: Connector, S: EventSink>(
    connector: Arc<C>,
    url: Url,
    config: TransportConfig,
    sink: S,
    mut stop: StopSignal,
) {
    let mut reporter = Reporter::new(sink);
    let mut attempt: u32 = 0;

    loop {
        if stop.is_stopped() {
            break;
        }

        reporter.transition(ConnectionState::Connecting, None);

        let connected = tokio::select! {
            biased;
            _ = stop.stopped() => break,
            result = time::timeout(config.connect_timeout, connector.connect(&url)) => {
                result.unwrap_or(Err(TransportError::ConnectTimeout(config.connect_timeout)))
            }
        };

        let cause = match connected {
            Ok(link) => {
                attempt = 0;
                reporter.transition(ConnectionState::Connected, None);
                match drive_link(link, &config, &mut reporter, &mut stop).await {
                    LinkExit::Stopped => break,
                    LinkExit::Failed(e) => e,
                }
            }
            Err(e) => e,
        };

        let delay = config.reconnect.delay_for_attempt(attempt);
        attempt = attempt.saturating_add(1);
        reporter.metrics.reconnects.add(1, &[]);

        tracing::warn!(
            error = %cause,
            attempt,
            delay_ms = delay.as_millis() as u64,
            "Connection lost, reconnecting"
        );
        reporter.transition(ConnectionState::Reconnecting, Some(cause.to_string()));

        tokio::select! {
            biased;
            _ = stop.stopped() => break,
            _ = time::sleep(delay) => {}
        }
    }

    reporter.transition(ConnectionState::Disconnected, None);
}

/// Pump one established link until it fails or a stop is requested.
async fn drive_link<L: Link, S: EventSink>(
    mut link: L,
    config: &TransportConfig,
    reporter: &mut Reporter<S>,
    stop: &mut StopSignal,
) -> LinkExit {
    let mut heartbeat = time::interval_at(
        Instant::now() + config.heartbeat_interval,
        config.heartbeat_interval,
    );
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut pending_ping: Option<PendingPing> = None;
    let mut next_token: u64 = 0;

    loop {
        let deadline = pending_ping.as_ref().map(|p| p.deadline);

        tokio::select! {
            biased;
            _ = stop.stopped() => {
                link.close().await;
                return LinkExit::Stopped;
            }
            _ = time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                link.close().await;
                return LinkExit::Failed(TransportError::HeartbeatTimeout(config.heartbeat_timeout));
            }
            _ = heartbeat.tick() => {
                if pending_ping.is_none() {
                    next_token += 1;
                    if let Err(e) = link.send_ping(next_token.to_be_bytes().to_vec()).await {
                        return LinkExit::Failed(e);
                    }
                    pending_ping = Some(PendingPing {
                        token: next_token,
                        deadline: Instant::now() + config.heartbeat_timeout,
                    });
                }
            }
            inbound = link.recv() => match inbound {
                None => return LinkExit::Failed(TransportError::ClosedByPeer("connection ended".to_string())),
                Some(Err(e)) => return LinkExit::Failed(e),
                Some(Ok(Inbound::Pong(payload))) => {
                    if pending_ping
                        .as_ref()
                        .is_some_and(|p| payload == p.token.to_be_bytes())
                    {
                        pending_ping = None;
                    }
                }
                Some(Ok(Inbound::Text(text))) => reporter.message(decoder::decode(&text)),
                Some(Ok(Inbound::Binary(data))) => reporter.message(decoder::decode_binary(&data)),
            },
        }
    }
}
