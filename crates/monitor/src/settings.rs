use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use url::Url;

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub websocket: WebsocketSettings,
    /// Keys written by other clients, preserved on save.
    #[serde(flatten)]
    extra: Map<String, Value>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct WebsocketSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

/// Parse a user supplied server address. Only `ws` and `wss` are accepted.
pub fn parse_server_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw.trim()).with_context(|| format!("Invalid server URL: {raw}"))?;
    match url.scheme() {
        "ws" | "wss" => Ok(url),
        other => bail!("Unsupported URL scheme '{other}', expected ws:// or wss://"),
    }
}

/// JSON file holding the remembered server URL.
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// `$HOME/.drowningdetection/settings.json`
    pub fn default_path() -> Result<PathBuf> {
        let home = dirs::home_dir().context("Cannot determine home directory")?;
        Ok(home.join(".drowningdetection").join("settings.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A missing file is an empty configuration, not an error.
    pub fn load(&self) -> Result<Settings> {
        if !self.path.exists() {
            return Ok(Settings::default());
        }

        let raw = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read {}", self.path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("Failed to parse {}", self.path.display()))
    }

    pub fn save(&self, settings: &Settings) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let json = serde_json::to_string_pretty(settings).context("Failed to serialize settings")?;
        fs::write(&self.path, json)
            .with_context(|| format!("Failed to write {}", self.path.display()))?;

        tracing::debug!(path = %self.path.display(), "Settings saved");
        Ok(())
    }

    pub fn remembered_url(&self) -> Result<Option<Url>> {
        match self.load()?.websocket.url {
            Some(raw) if !raw.trim().is_empty() => parse_server_url(&raw).map(Some),
            _ => Ok(None),
        }
    }

    pub fn remember_url(&self, url: &Url) -> Result<()> {
        let mut settings = self.load()?;
        settings.websocket.url = Some(url.to_string());
        self.save(&settings)
    }
}
