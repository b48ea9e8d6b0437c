//! Per-app configuration.
//!
//! Each app may carry a `smallweb.json` at its root. Every field is
//! optional; a missing file yields the default configuration. Route globs
//! and cron schedules are validated at load time, so a broken config
//! surfaces as a load error instead of a per-request panic.

use std::path::Path;

use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::ConfigError;

/// Name of the per-app configuration file
pub const APP_CONFIG_FILE: &str = "smallweb.json";

/// A scheduled invocation of the app's entrypoint in command mode
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CronJob {
    /// 5-field cron expression, `@descriptor` forms accepted
    pub schedule: String,
    /// Arguments handed to the evaluator
    #[serde(default)]
    pub args: Vec<String>,
}

/// Per-app configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AppConfig {
    /// Whether the app requires authentication by default
    pub private: bool,
    /// Route globs that are always public, overriding `private`
    pub public_routes: Vec<String>,
    /// Route globs that are always private, overriding `public_routes`
    pub private_routes: Vec<String>,
    /// Scheduled command-mode invocations
    pub crons: Vec<CronJob>,
    /// Entrypoint override: a path relative to the app directory, or a
    /// `reserved:<name>` identifier routed to an in-process handler
    pub entrypoint: Option<String>,
}

impl AppConfig {
    /// Load the configuration for the app rooted at `app_dir`.
    ///
    /// A missing config file is not an error; an unreadable or unparsable
    /// one is, as are invalid route globs or cron schedules.
    pub fn load(app_dir: &Path) -> Result<Self, ConfigError> {
        let path = app_dir.join(APP_CONFIG_FILE);
        if !path.exists() {
            trace!(app_dir = %app_dir.display(), "No app config, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        let config: Self = serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.clone(),
            source,
        })?;

        // Surface bad globs and schedules now rather than at match time.
        config.route_policy()?;
        for job in &config.crons {
            croner::Cron::new(&job.schedule).parse().map_err(|e| {
                ConfigError::InvalidSchedule {
                    schedule: job.schedule.clone(),
                    reason: e.to_string(),
                }
            })?;
        }

        trace!(
            app_dir = %app_dir.display(),
            private = config.private,
            public_routes = config.public_routes.len(),
            private_routes = config.private_routes.len(),
            crons = config.crons.len(),
            "Loaded app config"
        );
        Ok(config)
    }

    /// Compile the route globs into a matchable policy.
    pub fn route_policy(&self) -> Result<RoutePolicy, ConfigError> {
        Ok(RoutePolicy {
            public: compile_globs(&self.public_routes)?,
            private: compile_globs(&self.private_routes)?,
        })
    }
}

fn compile_globs(patterns: &[String]) -> Result<GlobSet, ConfigError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|e| ConfigError::InvalidGlob {
            pattern: pattern.clone(),
            reason: e.to_string(),
        })?;
        builder.add(glob);
    }
    builder.build().map_err(|e| ConfigError::InvalidGlob {
        pattern: String::new(),
        reason: e.to_string(),
    })
}

/// Compiled privacy policy for an app's routes.
///
/// Rules apply in order: the app default, then public globs (clear), then
/// private globs (set). A path matched by both a public and a private glob
/// is therefore private.
#[derive(Debug)]
pub struct RoutePolicy {
    public: GlobSet,
    private: GlobSet,
}

impl RoutePolicy {
    /// Resolve the effective privacy of a request path.
    pub fn is_private(&self, default_private: bool, path: &str) -> bool {
        let mut private = default_private;
        if self.public.is_match(path) {
            private = false;
        }
        if self.private.is_match(path) {
            private = true;
        }
        private
    }
}
