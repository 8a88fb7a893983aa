use crate::state_machine::{Session, SessionInput};
use crate::transport::{ConnectionManager, Connector, EventSink, TransportConfig};
use crate::types::{SessionEvent, TransportEvent};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use url::Url;

/// Ordered stream of session events for one subscriber.
pub type EventStream = mpsc::UnboundedReceiver<SessionEvent>;

enum ActorMessage {
    Input(SessionInput),
    ServerUrl(Option<Url>),
    Subscribe(mpsc::UnboundedSender<SessionEvent>),
    Snapshot(oneshot::Sender<Session>),
}

/// Feeds transport events into the actor mailbox.
#[derive(Clone)]
struct MailboxSink {
    tx: mpsc::UnboundedSender<ActorMessage>,
}

impl EventSink for MailboxSink {
    fn emit(&self, event: TransportEvent) {
        if self.tx.send(ActorMessage::Input(event.into())).is_err() {
            tracing::debug!("Session actor gone, dropping transport event");
        }
    }
}

/// Public face of a monitoring session.
///
/// The [`Session`] lives inside a single actor task. Transport events, user
/// dismissals and subscriptions all travel through one mailbox, so they are
/// applied one at a time in arrival order and each transition is complete
/// before its events are published.
pub struct SessionController<C: Connector> {
    manager: ConnectionManager<C, MailboxSink>,
    mailbox: mpsc::UnboundedSender<ActorMessage>,
    actor: JoinHandle<Session>,
}

impl<C: Connector> SessionController<C> {
    pub fn spawn(connector: C, config: TransportConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let actor = tokio::spawn(run_actor(Session::new(None), rx));
        let manager = ConnectionManager::new(connector, config, MailboxSink { tx: tx.clone() });

        Self {
            manager,
            mailbox: tx,
            actor,
        }
    }

    fn send(&self, message: ActorMessage) {
        if self.mailbox.send(message).is_err() {
            tracing::error!("Session actor is not running");
        }
    }

    /// Receive every event produced after this call.
    pub fn subscribe(&self) -> EventStream {
        let (tx, rx) = mpsc::unbounded_channel();
        self.send(ActorMessage::Subscribe(tx));
        rx
    }

    pub async fn start(&mut self, url: Url) {
        self.send(ActorMessage::ServerUrl(Some(url.clone())));
        self.manager.start(url).await;
    }

    pub async fn stop(&mut self) {
        self.manager.stop().await;
    }

    /// User acknowledged the alert.
    pub fn dismiss(&self) {
        self.send(ActorMessage::Input(SessionInput::Dismiss));
    }

    /// Copy of the session after everything queued so far was applied.
    pub async fn snapshot(&self) -> Option<Session> {
        let (tx, rx) = oneshot::channel();
        self.send(ActorMessage::Snapshot(tx));
        rx.await.ok()
    }

    /// Stop the transport, drain the mailbox and return the final session.
    pub async fn shutdown(self) -> anyhow::Result<Session> {
        let Self {
            mut manager,
            mailbox,
            actor,
        } = self;

        manager.stop().await;
        drop(manager);
        drop(mailbox);

        Ok(actor.await?)
    }
}

async fn run_actor(
    mut session: Session,
    mut mailbox: mpsc::UnboundedReceiver<ActorMessage>,
) -> Session {
    let mut subscribers: Vec<mpsc::UnboundedSender<SessionEvent>> = Vec::new();

    while let Some(message) = mailbox.recv().await {
        match message {
            ActorMessage::Input(input) => {
                let events = session.apply(input);
                for event in events {
                    subscribers.retain(|s| s.send(event.clone()).is_ok());
                }
            }
            ActorMessage::ServerUrl(url) => session.set_server_url(url),
            ActorMessage::Subscribe(tx) => subscribers.push(tx),
            ActorMessage::Snapshot(reply) => {
                let _ = reply.send(session.clone());
            }
        }
    }

    tracing::debug!("Session actor finished");
    session
}
