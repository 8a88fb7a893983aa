use crate::settings::parse_server_url;
use anyhow::{Result, bail};
use url::Url;

/// A line typed on stdin.
#[derive(Debug, PartialEq, Eq)]
pub enum Command {
    Dismiss,
    Connect(Url),
    Quit,
}

impl Command {
    /// Blank lines parse to `None`.
    pub fn parse(line: &str) -> Result<Option<Self>> {
        let mut words = line.split_whitespace();
        let Some(verb) = words.next() else {
            return Ok(None);
        };

        let command = match (verb.to_lowercase().as_str(), words.next()) {
            ("dismiss" | "d", None) => Command::Dismiss,
            ("quit" | "exit" | "q", None) => Command::Quit,
            ("connect", Some(url)) => Command::Connect(parse_server_url(url)?),
            ("connect", None) => bail!("Usage: connect <ws://host:port>"),
            _ => bail!("Unknown command '{}'. Commands: dismiss, connect <url>, quit", line.trim()),
        };

        if words.next().is_some() {
            bail!("Unexpected arguments in '{}'", line.trim());
        }
        Ok(Some(command))
    }
}
