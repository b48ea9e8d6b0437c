//! App loading and entrypoint resolution.
//!
//! An app is a subdirectory of the root directory, addressed by the
//! leftmost label of the request host. Its entrypoint is either configured
//! explicitly (a path or a `reserved:<name>` identifier) or inferred from
//! the filesystem by convention.

use std::path::{Path, PathBuf};

use tracing::warn;

use smallweb_config::{AppConfig, RoutePolicy};

use crate::errors::ServerError;

/// Entrypoint extensions, tried in this order
const EXTENSIONS: [&str; 4] = ["js", "ts", "jsx", "tsx"];

/// Reserved entrypoint identifiers routed to in-process handlers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reserved {
    Webdav,
    Cli,
    Docs,
    Static,
    Editor,
}

impl Reserved {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "webdav" => Some(Self::Webdav),
            "cli" => Some(Self::Cli),
            "docs" => Some(Self::Docs),
            "static" => Some(Self::Static),
            "editor" => Some(Self::Editor),
            _ => None,
        }
    }
}

/// A resolved entrypoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entrypoint {
    /// A file handed to the evaluator, or served statically for
    /// `index.html`
    File(PathBuf),
    /// An in-process handler bypassing the evaluator
    Reserved(Reserved),
}

/// Derive the app alias from a request host.
///
/// The alias is the leftmost host label; a host with no dot yields the
/// full host. Any port suffix is ignored.
pub fn alias_from_host(host: &str) -> &str {
    let host = host.rsplit_once(':').map_or(host, |(h, _)| h);
    host.split('.').next().unwrap_or(host)
}

/// Resolve an app's entrypoint by filesystem convention.
///
/// Candidates are probed in strict order, first hit wins:
/// `<root>/<alias>.{js,ts,jsx,tsx}`, `<root>/<alias>/mod.{ext}`,
/// `<root>/<alias>/<alias>.{ext}`, `<root>/<alias>/index.html`.
pub fn resolve_entrypoint(root_dir: &Path, alias: &str) -> Option<PathBuf> {
    for ext in EXTENSIONS {
        let candidate = root_dir.join(format!("{alias}.{ext}"));
        if candidate.is_file() {
            return Some(candidate);
        }
    }

    for ext in EXTENSIONS {
        let candidate = root_dir.join(alias).join(format!("mod.{ext}"));
        if candidate.is_file() {
            return Some(candidate);
        }
    }

    for ext in EXTENSIONS {
        let candidate = root_dir.join(alias).join(format!("{alias}.{ext}"));
        if candidate.is_file() {
            return Some(candidate);
        }
    }

    let candidate = root_dir.join(alias).join("index.html");
    if candidate.is_file() {
        return Some(candidate);
    }

    None
}

/// A loaded app: its directory, configuration and compiled route policy.
#[derive(Debug)]
pub struct App {
    name: String,
    root_dir: PathBuf,
    root: PathBuf,
    pub config: AppConfig,
    policy: RoutePolicy,
}

impl App {
    /// Load the app named `name` under `root_dir`.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::AppNotFound`] when the app directory is
    /// missing or its configuration fails to load; the dispatch boundary
    /// maps this to 404.
    pub fn load(root_dir: &Path, name: &str) -> Result<Self, ServerError> {
        let root = root_dir.join(name);
        if !root.is_dir() {
            return Err(ServerError::AppNotFound(name.to_string()));
        }

        let config = AppConfig::load(&root).map_err(|e| {
            warn!(app = %name, error = %e, "Failed to load app config");
            ServerError::AppNotFound(name.to_string())
        })?;
        let policy = config.route_policy().map_err(|e| {
            warn!(app = %name, error = %e, "Failed to compile route policy");
            ServerError::AppNotFound(name.to_string())
        })?;

        Ok(Self {
            name: name.to_string(),
            root_dir: root_dir.to_path_buf(),
            root,
            config,
            policy,
        })
    }

    /// The app name (host alias)
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The app directory (`<root_dir>/<name>`)
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve this app's entrypoint.
    ///
    /// An explicit config entrypoint takes precedence: `reserved:<name>`
    /// selects an in-process handler, anything else is a path relative to
    /// the app directory. Without an override the filesystem convention
    /// applies.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::EntrypointNotFound`] when nothing resolves;
    /// under an already-loaded app this maps to 500.
    pub fn entrypoint(&self) -> Result<Entrypoint, ServerError> {
        if let Some(configured) = &self.config.entrypoint {
            if let Some(name) = configured.strip_prefix("reserved:") {
                return Reserved::from_name(name)
                    .map(Entrypoint::Reserved)
                    .ok_or(ServerError::EntrypointNotFound);
            }

            let path = if Path::new(configured).is_absolute() {
                PathBuf::from(configured)
            } else {
                self.root.join(configured)
            };
            if path.is_file() {
                return Ok(Entrypoint::File(path));
            }
            return Err(ServerError::EntrypointNotFound);
        }

        resolve_entrypoint(&self.root_dir, &self.name)
            .map(Entrypoint::File)
            .ok_or(ServerError::EntrypointNotFound)
    }

    /// Effective privacy of a request path under this app's policy.
    pub fn is_private(&self, path: &str) -> bool {
        self.policy.is_private(self.config.private, path)
    }
}

/// Enumerate app names under the root directory.
///
/// Only plain subdirectories count; dot-prefixed entries (`.logs`, `.env`)
/// are skipped.
pub fn list_apps(root_dir: &Path) -> std::io::Result<Vec<String>> {
    let mut apps = Vec::new();
    for entry in std::fs::read_dir(root_dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if name.starts_with('.') {
            continue;
        }
        apps.push(name.to_string());
    }
    apps.sort();
    Ok(apps)
}
