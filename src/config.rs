// Client configuration: backend location, timeouts and live channel options

use std::path::PathBuf;
use std::time::Duration;
use url::Url;

use crate::error::{ChatError, Result};
use crate::live::ReconnectPolicy;

pub const DEFAULT_SERVER: &str = "http://localhost:8001";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Backend origin; REST endpoints live under `<server>/api`
    pub server: Url,
    /// Explicit live channel base; derived from `server` when absent
    pub live_base: Option<Url>,
    /// Directory holding the persisted session keys
    pub data_dir: Option<PathBuf>,
    /// Applied to every REST call and to the live channel handshake
    pub request_timeout: Duration,
    pub reconnect: ReconnectPolicy,
    pub heartbeat: Option<Duration>,
}

impl ClientConfig {
    pub fn new(server: &str) -> Result<Self> {
        Ok(ClientConfig {
            server: parse_base(server)?,
            live_base: None,
            data_dir: None,
            request_timeout: DEFAULT_TIMEOUT,
            reconnect: ReconnectPolicy::disabled(),
            heartbeat: None,
        })
    }

    pub fn with_live_base(mut self, live_base: &str) -> Result<Self> {
        self.live_base = Some(parse_base(live_base)?);
        Ok(self)
    }

    /// Full URL of a REST endpoint, e.g. `api_url("/users")`
    pub fn api_url(&self, path: &str) -> String {
        format!(
            "{}/api/{}",
            self.server.as_str().trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    /// Live channel URL for a given identity: `<ws base>/ws/<identity_id>`
    pub fn live_url(&self, identity_id: &str) -> Result<Url> {
        let mut url = match &self.live_base {
            Some(base) => base.clone(),
            None => {
                let mut url = self.server.clone();
                let scheme = match url.scheme() {
                    "https" | "wss" => "wss",
                    _ => "ws",
                };
                url.set_scheme(scheme)
                    .map_err(|_| ChatError::InvalidUrl(format!("cannot derive socket url from {}", self.server)))?;
                url
            }
        };
        let display = url.to_string();
        url.path_segments_mut()
            .map_err(|_| ChatError::InvalidUrl(format!("{} cannot be a base", display)))?
            .pop_if_empty()
            .push("ws")
            .push(identity_id);
        Ok(url)
    }

    /// Data directory for persisted session keys, falling back to the
    /// platform config directory
    pub fn resolve_data_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.data_dir {
            return Ok(dir.clone());
        }
        dirs::config_dir()
            .map(|dir| dir.join("chatz"))
            .ok_or_else(|| {
                ChatError::Storage(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "could not determine config directory",
                ))
            })
    }
}

fn parse_base(raw: &str) -> Result<Url> {
    let url = Url::parse(raw.trim())?;
    if url.cannot_be_a_base() {
        return Err(ChatError::InvalidUrl(format!("{} cannot be a base", raw)));
    }
    Ok(url)
}
