//! Evaluator subprocess invocation.
//!
//! Every dynamic request spawns one short-lived child of the external
//! evaluator. The child receives one line of JSON on stdin, runs with the
//! entrypoint's directory as its working directory, and must write the
//! response record to the output path named in its input before exiting 0.
//! Stdout and stderr are captured into a single buffer that becomes the
//! error body on failure and the `logs` field of the access log always.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::Semaphore;
use tracing::{debug, info};

use crate::codec::{CommandInput, EvaluatorInput, SerializedRequest, SerializedResponse};
use crate::errors::ServerError;

/// Name of the materialized support file
pub const SUPPORT_FILE: &str = "sandbox.ts";

/// Environment variable overriding evaluator binary lookup
pub const EXEC_ENV_OVERRIDE: &str = "DENO_EXEC_PATH";

/// Conventional evaluator binary name for PATH lookup
const EXEC_NAME: &str = "deno";

/// Flag granting the support file full permissions
const PERMISSION_FLAG: &str = "-A";

/// The evaluator support file, embedded at build time and rewritten
/// verbatim into the data directory at every server start.
static SUPPORT_FILE_BYTES: &[u8] = include_bytes!("../assets/sandbox.ts");

/// A successful evaluator invocation.
#[derive(Debug)]
pub struct Invocation {
    pub response: SerializedResponse,
    /// Combined stdout/stderr of the child
    pub logs: Vec<u8>,
}

/// Spawns evaluator children, bounded by a worker semaphore.
#[derive(Debug)]
pub struct Evaluator {
    exec_path: PathBuf,
    support_path: PathBuf,
    workers: Arc<Semaphore>,
}

/// Write the embedded support file into the data directory.
///
/// The file is rewritten verbatim on every start and treated as read-only
/// afterwards.
pub fn write_support_file(data_home: &Path) -> Result<PathBuf, ServerError> {
    std::fs::create_dir_all(data_home)?;
    let path = data_home.join(SUPPORT_FILE);
    std::fs::write(&path, SUPPORT_FILE_BYTES)?;
    debug!(path = %path.display(), "Materialized evaluator support file");
    Ok(path)
}

/// Resolve the evaluator executable: env override first, PATH lookup of
/// the conventional name otherwise.
pub fn resolve_executable() -> Result<PathBuf, ServerError> {
    if let Ok(path) = std::env::var(EXEC_ENV_OVERRIDE) {
        return Ok(PathBuf::from(path));
    }
    which::which(EXEC_NAME).map_err(|_| ServerError::EvaluatorMissing(EXEC_NAME.to_string()))
}

impl Evaluator {
    /// Materialize the support file and resolve the executable.
    pub fn new(data_home: &Path, max_workers: usize) -> Result<Self, ServerError> {
        let support_path = write_support_file(data_home)?;
        let exec_path = resolve_executable()?;
        info!(
            exec = %exec_path.display(),
            max_workers,
            "Evaluator ready"
        );
        Ok(Self::with_executable(exec_path, support_path, max_workers))
    }

    /// Build an evaluator around an explicit executable.
    pub fn with_executable(
        exec_path: PathBuf,
        support_path: PathBuf,
        max_workers: usize,
    ) -> Self {
        Self {
            exec_path,
            support_path,
            workers: Arc::new(Semaphore::new(max_workers)),
        }
    }

    /// Run one request through the evaluator.
    ///
    /// The per-invocation temp directory holding the response artifact is
    /// removed on every exit path, including cancellation; the child is
    /// killed if the handling task is dropped.
    ///
    /// # Errors
    ///
    /// Non-zero exit, a missing artifact and an undecodable artifact all
    /// yield [`ServerError::Evaluator`] carrying the combined output.
    pub async fn invoke_request(
        &self,
        entrypoint: &Path,
        env: HashMap<String, String>,
        req: SerializedRequest,
    ) -> Result<Invocation, ServerError> {
        let _permit = self
            .workers
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| std::io::Error::other(e.to_string()))?;

        let tempdir = tempfile::tempdir()?;
        let output = tempdir.path().join("response.json");

        let input = EvaluatorInput {
            req,
            entrypoint: entrypoint.display().to_string(),
            env,
            output: output.display().to_string(),
        };

        let record = serde_json::to_vec(&input).map_err(ServerError::Serialize)?;
        let (status, logs) = self.run_child(entrypoint, &record, false).await?;

        if !status.success() {
            return Err(ServerError::Evaluator { output: logs });
        }

        let artifact = match std::fs::read(&output) {
            Ok(bytes) => bytes,
            Err(_) => return Err(ServerError::Evaluator { output: logs }),
        };
        let response: SerializedResponse = match serde_json::from_slice(&artifact) {
            Ok(response) => response,
            Err(_) => return Err(ServerError::Evaluator { output: logs }),
        };

        Ok(Invocation { response, logs })
    }

    /// Run the evaluator in command mode (cron), stdio discarded.
    pub async fn invoke_command(
        &self,
        entrypoint: &Path,
        env: HashMap<String, String>,
        args: &[String],
    ) -> Result<ExitStatus, ServerError> {
        let _permit = self
            .workers
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| std::io::Error::other(e.to_string()))?;

        let input = CommandInput {
            entrypoint: entrypoint.display().to_string(),
            env,
            args: args.to_vec(),
        };

        let record = serde_json::to_vec(&input).map_err(ServerError::Serialize)?;
        let (status, _) = self.run_child(entrypoint, &record, true).await?;
        Ok(status)
    }

    /// Spawn one child, feed it `stdin_record` as a single line, and wait.
    async fn run_child(
        &self,
        entrypoint: &Path,
        stdin_record: &[u8],
        discard_stdio: bool,
    ) -> Result<(ExitStatus, Vec<u8>), ServerError> {
        let cwd = entrypoint.parent().unwrap_or_else(|| Path::new("."));

        let mut command = Command::new(&self.exec_path);
        command
            .arg("run")
            .arg(PERMISSION_FLAG)
            .arg(&self.support_path)
            .current_dir(cwd)
            .stdin(Stdio::piped())
            .kill_on_drop(true);
        if discard_stdio {
            command.stdout(Stdio::null()).stderr(Stdio::null());
        } else {
            command.stdout(Stdio::piped()).stderr(Stdio::piped());
        }

        let mut child = command.spawn()?;

        let mut line = stdin_record.to_vec();
        line.push(b'\n');
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(&line).await?;
            stdin.flush().await?;
        }

        let output = child.wait_with_output().await?;
        let mut logs = output.stdout;
        logs.extend_from_slice(&output.stderr);

        Ok((output.status, logs))
    }
}
