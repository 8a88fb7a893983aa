mod commands;
mod config;
mod gateway;
mod mqtt_notifier;
mod presenter;
mod settings;

use anyhow::{Context, Result, bail};
use clap::Parser;
use commands::Command;
use common::{TelemetryGuard, setup_logging};
use config::MonitorConfig;
use gateway::ConsoleGateway;
use mqtt_notifier::MqttGateway;
use presenter::ConsolePresenter;
use session::{
    Connector, NotificationGateway, SessionController, SimulatedConnector, WsConnector,
    forward_notifications,
};
use settings::{SettingsStore, parse_server_url};
use std::path::PathBuf;
use tokio::sync::mpsc;
use url::Url;

#[derive(Parser, Debug)]
#[command(name = "monitor")]
#[command(about = "Remote monitor for a drowning detection server", long_about = None)]
struct Cli {
    /// Detection server address (ws:// or wss://). Remembered for next time.
    #[arg(long)]
    url: Option<String>,

    /// Use the built-in simulated server instead of a real connection
    #[arg(long)]
    test_mode: bool,

    /// Settings file holding the remembered server URL
    #[arg(long)]
    settings: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = MonitorConfig::from_env();

    // TelemetryGuard installs the tracing subscriber itself.
    let _telemetry = match config.otel_endpoint.as_deref() {
        Some(endpoint) => Some(TelemetryGuard::init("monitor", endpoint, config.environment)?),
        None => {
            setup_logging(config.environment);
            None
        }
    };

    tracing::info!(?config, "Monitor starting");

    let settings_path = match cli.settings.clone().or_else(|| config.settings_path.clone()) {
        Some(path) => path,
        None => SettingsStore::default_path()?,
    };
    let store = SettingsStore::new(settings_path);

    if cli.test_mode {
        let connector = SimulatedConnector::new(config.test_mode_interval);
        run(connector, SimulatedConnector::url(), store, &config, Mode::Simulated).await
    } else {
        let url = resolve_url(cli.url.as_deref(), &store)?;
        run(WsConnector, url, store, &config, Mode::Live).await
    }
}

/// Command line wins (and is remembered), then the settings file.
fn resolve_url(from_cli: Option<&str>, store: &SettingsStore) -> Result<Url> {
    if let Some(raw) = from_cli {
        let url = parse_server_url(raw)?;
        if let Err(e) = store.remember_url(&url) {
            tracing::warn!(error = %e, "Could not remember server URL");
        }
        return Ok(url);
    }

    match store.remembered_url()? {
        Some(url) => Ok(url),
        None => bail!(
            "No server URL configured in {}. Pass --url ws://<host>:<port> or use --test-mode",
            store.path().display()
        ),
    }
}

/// Which connector the session is driving.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Live,
    Simulated,
}

/// The simulated connector ignores the URL, so switching servers only makes
/// sense against a live connection.
fn connect_target(mode: Mode, url: Url) -> Result<Url> {
    match mode {
        Mode::Live => Ok(url),
        Mode::Simulated => bail!(
            "connect is not available in test mode. Restart without --test-mode to reach {url}"
        ),
    }
}

fn notification_gateway(config: &MonitorConfig) -> Result<Box<dyn NotificationGateway>> {
    let gateway: Box<dyn NotificationGateway> = match &config.mqtt {
        Some(mqtt) => Box::new(MqttGateway::new(mqtt)?),
        None => Box::new(ConsoleGateway),
    };
    Ok(gateway)
}

/// Stdin is read on a plain thread: a blocked read must not hold up runtime
/// shutdown.
fn spawn_stdin_reader() -> Result<mpsc::UnboundedReceiver<String>> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::Builder::new()
        .name("stdin-commands".to_string())
        .spawn(move || {
            for line in std::io::stdin().lines() {
                match line {
                    Ok(line) => {
                        if tx.send(line).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to read stdin");
                        break;
                    }
                }
            }
        })
        .context("Failed to spawn stdin reader")?;
    Ok(rx)
}

async fn run<C: Connector>(
    connector: C,
    url: Url,
    store: SettingsStore,
    config: &MonitorConfig,
    mode: Mode,
) -> Result<()> {
    let mut controller = SessionController::spawn(connector, config.transport());

    let presenter = tokio::spawn(ConsolePresenter::new(std::io::stdout()).run(controller.subscribe()));

    let gateway = notification_gateway(config)?;
    let notifications = controller.subscribe();
    let notifier = tokio::task::spawn_blocking(move || forward_notifications(notifications, gateway));

    controller.start(url).await;

    let mut lines = spawn_stdin_reader()?;
    let mut stdin_open = true;
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = &mut shutdown => {
                result.context("Failed to listen for Ctrl-C")?;
                tracing::info!("Ctrl-C received, shutting down");
                break;
            }
            line = lines.recv(), if stdin_open => match line {
                Some(line) => match Command::parse(&line) {
                    Ok(Some(Command::Dismiss)) => controller.dismiss(),
                    Ok(Some(Command::Connect(url))) => match connect_target(mode, url) {
                        Ok(url) => {
                            if let Err(e) = store.remember_url(&url) {
                                tracing::warn!(error = %e, "Could not remember server URL");
                            }
                            controller.start(url).await;
                        }
                        Err(e) => println!("{e}"),
                    },
                    Ok(Some(Command::Quit)) => break,
                    Ok(None) => {}
                    Err(e) => println!("{e}"),
                },
                None => {
                    tracing::debug!("stdin closed, waiting for Ctrl-C");
                    stdin_open = false;
                }
            },
        }
    }

    let session = controller.shutdown().await?;
    tracing::info!(
        alert = session.alert_state().name(),
        server = ?session.server_url().map(Url::as_str),
        "Session closed"
    );

    if let Err(e) = presenter.await.context("Presenter task panicked")? {
        tracing::warn!(error = %e, "Console output failed");
    }
    notifier.await.context("Notification task panicked")?;

    Ok(())
}
