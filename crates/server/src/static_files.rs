//! Static file serving for `index.html` apps and the reserved static
//! handler.
//!
//! Deliberately small: GET/HEAD only, traversal-safe path resolution,
//! directory index files, mime type inference and conditional requests
//! (ETag / If-Modified-Since). The evaluator is never involved.

use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;

use bytes::Bytes;
use http::{header, Method, Request, Response, StatusCode};
use http_body_util::Full;
use mime_guess::from_path;
use tokio::fs;
use tracing::error;

use crate::errors::ServerError;
use crate::http_helpers::{empty_response, HandlerResponse};

/// Index file served for directory requests
const INDEX_FILE: &str = "index.html";

/// Static file server rooted at a single directory.
#[derive(Debug, Clone)]
pub struct StaticFileServer {
    root: PathBuf,
}

impl StaticFileServer {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Serve a request against the root directory.
    pub async fn serve<B>(&self, req: &Request<B>) -> Result<HandlerResponse, ServerError> {
        match *req.method() {
            Method::GET | Method::HEAD => {}
            _ => {
                return Ok(Response::builder()
                    .status(StatusCode::METHOD_NOT_ALLOWED)
                    .header(header::ALLOW, "GET, HEAD")
                    .body(Full::new(Bytes::new()))?);
            }
        }

        let Some(file_path) = self.resolve_path(req.uri().path()) else {
            return Ok(empty_response(StatusCode::NOT_FOUND));
        };

        let metadata = match fs::metadata(&file_path).await {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(empty_response(StatusCode::NOT_FOUND));
            }
            Err(e) => {
                error!(path = %file_path.display(), error = %e, "Failed to stat file");
                return Ok(empty_response(StatusCode::INTERNAL_SERVER_ERROR));
            }
        };

        if metadata.is_dir() {
            let index_path = file_path.join(INDEX_FILE);
            if fs::metadata(&index_path).await.is_ok() {
                return self.serve_file(req, &index_path).await;
            }
            return Ok(empty_response(StatusCode::NOT_FOUND));
        }

        self.serve_file(req, &file_path).await
    }

    /// Resolve a request path under the root, rejecting traversal.
    fn resolve_path(&self, path: &str) -> Option<PathBuf> {
        let mut resolved = self.root.clone();
        for component in Path::new(path.trim_start_matches('/')).components() {
            match component {
                Component::Normal(c) => resolved.push(c),
                Component::ParentDir => return None,
                _ => {}
            }
        }
        Some(resolved)
    }

    async fn serve_file<B>(
        &self,
        req: &Request<B>,
        file_path: &Path,
    ) -> Result<HandlerResponse, ServerError> {
        let metadata = fs::metadata(file_path).await?;
        let modified = metadata.modified()?;
        let etag = etag_from_metadata(metadata.len(), modified);

        if check_conditional_headers(req, &etag, modified) {
            return Ok(Response::builder()
                .status(StatusCode::NOT_MODIFIED)
                .header(header::ETAG, &etag)
                .body(Full::new(Bytes::new()))?);
        }

        let content_type = from_path(file_path).first_or_octet_stream();
        let builder = Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, content_type.as_ref())
            .header(header::CONTENT_LENGTH, metadata.len())
            .header(header::ETAG, &etag)
            .header(header::LAST_MODIFIED, httpdate::fmt_http_date(modified));

        if req.method() == Method::HEAD {
            return Ok(builder.body(Full::new(Bytes::new()))?);
        }

        let content = fs::read(file_path).await?;
        Ok(builder.body(Full::new(Bytes::from(content)))?)
    }
}

fn etag_from_metadata(len: u64, modified: SystemTime) -> String {
    let mtime = modified
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default();
    format!("\"{:x}-{:x}\"", len, mtime.as_secs())
}

/// Whether the request's conditional headers allow a 304.
fn check_conditional_headers<B>(req: &Request<B>, etag: &str, modified: SystemTime) -> bool {
    if let Some(if_none_match) = req.headers().get(header::IF_NONE_MATCH) {
        if let Ok(value) = if_none_match.to_str() {
            return value == "*"
                || value
                    .split(',')
                    .any(|tag| tag.trim().trim_matches('"') == etag.trim_matches('"'));
        }
    }

    if let Some(if_modified) = req.headers().get(header::IF_MODIFIED_SINCE) {
        if let Some(threshold) = if_modified
            .to_str()
            .ok()
            .and_then(|v| httpdate::parse_http_date(v).ok())
        {
            // HTTP dates have second precision.
            let modified_secs = modified
                .duration_since(SystemTime::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs();
            let threshold_secs = threshold
                .duration_since(SystemTime::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs();
            return modified_secs <= threshold_secs;
        }
    }

    false
}
