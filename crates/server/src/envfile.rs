//! Per-request environment composition from layered `.env` files.
//!
//! The composed map is pure: it is built from the server-level env map and
//! the `.env` files on disk, and never reads the process environment.

use std::collections::HashMap;
use std::path::Path;

use crate::errors::ServerError;

/// Compose the environment for an entrypoint.
///
/// Layers, later wins:
/// 1. the server-level env map (`--env` flags),
/// 2. `<root_dir>/.env` if present,
/// 3. `<entrypoint dir>/.env` if present and distinct from the root file.
///
/// Static entrypoints (`index.html`) get an empty map; static serving needs
/// no env. Absent files are not errors; parse failures of existing files
/// are.
pub fn compose(
    root_dir: &Path,
    entrypoint: &Path,
    base: &HashMap<String, String>,
) -> Result<HashMap<String, String>, ServerError> {
    if entrypoint.extension().is_some_and(|ext| ext == "html") {
        return Ok(HashMap::new());
    }

    let mut env = base.clone();

    let root_env_path = root_dir.join(".env");
    if root_env_path.exists() {
        merge_env_file(&mut env, &root_env_path)?;
    }

    let dir_env_path = match entrypoint.parent() {
        Some(dir) => dir.join(".env"),
        None => return Ok(env),
    };
    if dir_env_path != root_env_path && dir_env_path.exists() {
        merge_env_file(&mut env, &dir_env_path)?;
    }

    Ok(env)
}

fn merge_env_file(env: &mut HashMap<String, String>, path: &Path) -> Result<(), ServerError> {
    let iter = dotenvy::from_path_iter(path).map_err(|e| ServerError::EnvParse {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    for item in iter {
        let (key, value) = item.map_err(|e| ServerError::EnvParse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        env.insert(key, value);
    }

    Ok(())
}
