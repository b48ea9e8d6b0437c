//! Configuration types for the smallweb server.
//!
//! Two configuration surfaces live here:
//!
//! - [`ServerConfig`]: process-wide settings (root directory, apex domain,
//!   bind address, TLS material, the account allowed to log in).
//! - [`AppConfig`]: per-app settings loaded from `smallweb.json` inside the
//!   app directory (privacy flag, route globs, cron entries, an optional
//!   entrypoint override).

pub mod app;
pub mod error;
pub mod server;

pub use app::{AppConfig, CronJob, RoutePolicy, APP_CONFIG_FILE};
pub use error::ConfigError;
pub use server::{
    expand_tilde, ServerConfig, DEFAULT_HTTPS_PORT, DEFAULT_HTTP_PORT, DEFAULT_MAX_WORKERS,
};
