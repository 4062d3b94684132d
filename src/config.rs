use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::constants::{DEFAULT_CTRL_PORT, DEFAULT_TIMEOUT_SECS, REPLY_BUFFER_SIZE};
use crate::session::SessionOptions;

fn default_port() -> u16 {
    DEFAULT_CTRL_PORT
}

fn default_user() -> String {
    String::from("anonymous")
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_reply_buffer_size() -> usize {
    REPLY_BUFFER_SIZE
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClientConfig {
    pub server: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_user")]
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    /// Explicit FTPS (AUTH TLS).
    #[serde(default)]
    pub secure: bool,
    /// PEM file with the certificate(s) to trust.
    #[serde(default)]
    pub ca_file: Option<PathBuf>,
    #[serde(default)]
    pub insecure_skip_verify: bool,
    #[serde(default)]
    pub strict_replies: bool,
    #[serde(default = "default_reply_buffer_size")]
    pub reply_buffer_size: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub client: ClientConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server: String::from("localhost"),
            port: default_port(),
            user: default_user(),
            password: String::new(),
            timeout_secs: default_timeout(),
            secure: false,
            ca_file: None,
            insecure_skip_verify: false,
            strict_replies: false,
            reply_buffer_size: default_reply_buffer_size(),
        }
    }
}

impl Drop for ClientConfig {
    fn drop(&mut self) {
        self.password.zeroize();
    }
}

impl Config {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file: {}", path.display()))?;
        let config: Config = toml::from_str(&config_str)
            .with_context(|| format!("Failed to parse configuration file: {}", path.display()))?;
        Ok(config)
    }
}

impl From<&ClientConfig> for SessionOptions {
    fn from(config: &ClientConfig) -> Self {
        let mut options =
            SessionOptions::new(&config.server, config.port, &config.user, &config.password);
        options.timeout_secs = config.timeout_secs;
        options.strict_replies = config.strict_replies;
        options.reply_buffer_size = config.reply_buffer_size;
        options
    }
}
