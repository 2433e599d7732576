//! Client configuration
//!
//! Defaults match a backend started locally on port 5000. Every value can be
//! overridden from the environment, and the terminal front-end layers its
//! command line flags on top.

use std::path::PathBuf;

/// Default REST base URL
pub const DEFAULT_API_URL: &str = "http://localhost:5000";

/// Default location of the persisted session
pub const DEFAULT_SESSION_FILE: &str = ".equipment-desk/session.json";

pub const API_URL_ENV: &str = "EQUIPMENT_API_URL";
pub const REALTIME_URL_ENV: &str = "EQUIPMENT_REALTIME_URL";
pub const SESSION_FILE_ENV: &str = "EQUIPMENT_SESSION_FILE";

/// Connection settings shared by the API client and the realtime channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Base URL of the REST API, without trailing slash
    pub api_url: String,

    /// Explicit realtime endpoint; derived from `api_url` when absent
    pub realtime_url: Option<String>,

    /// File holding the persisted session token
    pub session_file: PathBuf,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            realtime_url: None,
            session_file: PathBuf::from(DEFAULT_SESSION_FILE),
        }
    }
}

impl ClientConfig {
    pub fn new(api_url: impl Into<String>) -> Self {
        Self {
            api_url: trim_base(api_url.into()),
            ..Default::default()
        }
    }

    /// Build a configuration from `EQUIPMENT_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`ClientConfig::from_env`] with an injectable lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(url) = lookup(API_URL_ENV).filter(|v| !v.trim().is_empty()) {
            config.api_url = trim_base(url);
        }
        config.realtime_url = lookup(REALTIME_URL_ENV).filter(|v| !v.trim().is_empty());
        if let Some(path) = lookup(SESSION_FILE_ENV).filter(|v| !v.trim().is_empty()) {
            config.session_file = PathBuf::from(path);
        }
        config
    }

    /// WebSocket URL of the Socket.IO endpoint.
    ///
    /// `http` becomes `ws` and `https` becomes `wss`.
    pub fn realtime_endpoint(&self) -> String {
        if let Some(url) = &self.realtime_url {
            return url.clone();
        }
        let base = if let Some(rest) = self.api_url.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = self.api_url.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            self.api_url.clone()
        };
        format!("{}/socket.io/?EIO=4&transport=websocket", base)
    }
}

fn trim_base(url: String) -> String {
    url.trim().trim_end_matches('/').to_string()
}
