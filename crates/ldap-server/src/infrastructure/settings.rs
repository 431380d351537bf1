//! TOML file settings for embedding applications that configure the server
//! from disk.
//!
//! # What is TOML? (for beginners)
//!
//! TOML is a small configuration format with sections and typed values:
//!
//! ```toml
//! bind_address = "0.0.0.0:1389"
//! read_timeout_ms = 30000
//! write_timeout_ms = 10000
//!
//! [tls]
//! cert_path = "/etc/ldap/server.pem"
//! key_path = "/etc/ldap/server.key"
//! start_tls = true
//! ```
//!
//! `serde` maps it onto [`ServerSettings`].  Every field has a default, so an
//! empty file (or no file at all) is a valid configuration.  A timeout of `0`
//! disables that deadline.
//!
//! # Plain, LDAPS or StartTLS
//!
//! Without a `[tls]` section the server listens in plaintext.  With one, the
//! key pair either makes the listener LDAPS (`start_tls = false`, the
//! default) or backs in-band StartTLS upgrades on a plain listener
//! (`start_tls = true`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use ldap_core::DEFAULT_MAX_MESSAGE_SIZE;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::options::{ServerOptions, DEFAULT_OUTBOUND_QUEUE_CAPACITY};
use crate::infrastructure::tls::{self, TlsError};

/// Error type for settings files.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error accessing settings at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse settings TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize settings: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error(transparent)]
    Tls(#[from] TlsError),
}

// ── Schema ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServerSettings {
    /// `host:port`; empty selects the default port for the listener kind.
    #[serde(default)]
    pub bind_address: String,

    #[serde(default)]
    pub read_timeout_ms: u64,

    #[serde(default)]
    pub write_timeout_ms: u64,

    #[serde(default = "default_outbound_queue_capacity")]
    pub outbound_queue_capacity: usize,

    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsSettings>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TlsSettings {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
    /// Use the key pair for in-band upgrades instead of LDAPS.
    #[serde(default)]
    pub start_tls: bool,
}

fn default_outbound_queue_capacity() -> usize {
    DEFAULT_OUTBOUND_QUEUE_CAPACITY
}

fn default_max_message_size() -> usize {
    DEFAULT_MAX_MESSAGE_SIZE
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_address: String::new(),
            read_timeout_ms: 0,
            write_timeout_ms: 0,
            outbound_queue_capacity: default_outbound_queue_capacity(),
            max_message_size: default_max_message_size(),
            tls: None,
        }
    }
}

impl ServerSettings {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Loads settings from `path`, returning the defaults if the file does
    /// not exist.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] for file-system errors other than "not
    /// found", and [`ConfigError::Parse`] if the TOML is malformed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(content) => Self::from_toml_str(&content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(source) => Err(ConfigError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// `true` when the listener itself should be LDAPS.
    pub fn listens_tls(&self) -> bool {
        self.tls.as_ref().is_some_and(|t| !t.start_tls)
    }

    /// Builds runtime options.  With `start_tls` set, the key pair is loaded
    /// here so a bad certificate is reported before the server starts.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Tls`] if the StartTLS key pair cannot be loaded.
    pub fn to_options(&self) -> Result<ServerOptions, ConfigError> {
        let mut options = ServerOptions::default()
            .with_read_timeout(Duration::from_millis(self.read_timeout_ms))
            .with_write_timeout(Duration::from_millis(self.write_timeout_ms))
            .with_outbound_queue_capacity(self.outbound_queue_capacity)
            .with_max_message_size(self.max_message_size);

        if let Some(tls_settings) = self.tls.as_ref().filter(|t| t.start_tls) {
            let acceptor = tls::load_acceptor(&tls_settings.cert_path, &tls_settings.key_path)?;
            options = options.with_start_tls(acceptor);
        }
        Ok(options)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
