//! Process-wide server configuration.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

/// Default port when serving plain HTTP
pub const DEFAULT_HTTP_PORT: u16 = 7777;

/// Default port when TLS material is configured
pub const DEFAULT_HTTPS_PORT: u16 = 443;

/// Default bound on concurrent evaluator children
pub const DEFAULT_MAX_WORKERS: usize = 16;

/// Server configuration, assembled from CLI flags and their environment
/// fallbacks by the binary.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Root directory containing one subdirectory per app
    pub dir: PathBuf,
    /// Apex domain; requests for exactly this host redirect to `www.`
    pub domain: String,
    /// Bind address
    pub host: String,
    /// Explicit port; `None` selects 443 with TLS, 7777 without
    pub port: Option<u16>,
    /// TLS certificate chain (PEM)
    pub cert: Option<PathBuf>,
    /// TLS private key (PEM)
    pub key: Option<PathBuf>,
    /// Account allowed to log in via the session flow; empty disables
    /// session auth entirely (token credentials only)
    pub email: String,
    /// Shell handed to the CLI builtin handler
    pub shell: String,
    /// Server-level env vars, the base layer of per-request env composition
    pub env: HashMap<String, String>,
    /// Bound on concurrent evaluator children
    pub max_workers: usize,
}

impl ServerConfig {
    /// Whether this server terminates TLS
    pub fn tls_enabled(&self) -> bool {
        self.cert.is_some() || self.key.is_some()
    }

    /// The port to bind, applying the TLS-sensitive default
    pub fn effective_port(&self) -> u16 {
        self.port.unwrap_or(if self.tls_enabled() {
            DEFAULT_HTTPS_PORT
        } else {
            DEFAULT_HTTP_PORT
        })
    }

    /// The socket address string to bind
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.effective_port())
    }

    /// Validate invariants that cannot be expressed per-field.
    ///
    /// # Errors
    ///
    /// Fails when the root directory is missing or only one half of the TLS
    /// material is configured.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.dir.is_dir() {
            return Err(ConfigError::RootDirMissing(self.dir.clone()));
        }

        match (&self.cert, &self.key) {
            (Some(_), None) => return Err(ConfigError::MissingTlsKey),
            (None, Some(_)) => return Err(ConfigError::MissingTlsCert),
            _ => {}
        }

        Ok(())
    }
}

/// Expand a leading `~/` to the user's home directory.
///
/// Paths without the prefix are returned unchanged, as is everything when
/// no home directory can be determined.
pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    Path::new(path).to_path_buf()
}
