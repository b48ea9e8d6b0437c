//! Per-tenant access log.
//!
//! One JSON record per request, appended to `<root>/.logs/<alias>.jsonl`.
//! Records are newline-delimited and written under a per-file lock so
//! concurrent requests to the same app interleave at record granularity.
//! Log writes never fail the request.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::codec::{base64_bytes, SerializedRequest, SerializedResponse};
use crate::errors::ServerError;

/// Directory under the root holding the per-app log files
const LOG_DIR: &str = ".logs";

/// One access-log record.
///
/// `response` is absent iff the evaluator failed; `logs` carries the
/// child's combined stdout/stderr and is always present, possibly empty.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRecord {
    /// RFC3339 request start time
    pub timestamp: String,
    pub entrypoint: String,
    pub request: SerializedRequest,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<SerializedResponse>,
    /// Wall-clock duration in nanoseconds
    pub duration: u64,
    #[serde(with = "base64_bytes")]
    pub logs: Vec<u8>,
}

/// Append-only structured log, one file per app.
#[derive(Debug)]
pub struct AccessLog {
    root_dir: PathBuf,
    locks: DashMap<PathBuf, Arc<Mutex<()>>>,
}

impl AccessLog {
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            locks: DashMap::new(),
        }
    }

    /// Append a record to the app's log file.
    ///
    /// Best-effort: failures are reported and swallowed so a full disk or
    /// an unwritable log directory never breaks request serving.
    pub fn append(&self, alias: &str, record: &LogRecord) {
        if let Err(e) = self.try_append(alias, record) {
            warn!(alias = %alias, error = %e, "Failed to write access log record");
        }
    }

    fn try_append(&self, alias: &str, record: &LogRecord) -> Result<(), ServerError> {
        let dir = self.root_dir.join(LOG_DIR);
        std::fs::create_dir_all(&dir)?;
        let path = dir.join(format!("{alias}.jsonl"));

        let mut line = serde_json::to_vec(record).map_err(ServerError::Serialize)?;
        line.push(b'\n');

        let lock = self
            .locks
            .entry(path.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock();

        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(&path)?;
        file.write_all(&line)?;
        file.flush()?;

        Ok(())
    }
}
