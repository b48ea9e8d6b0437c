//! Reserved entrypoint handlers.
//!
//! Apps may route to in-process handlers instead of the evaluator via
//! `reserved:<name>` entrypoints. The WebDAV, CLI, docs and editor
//! implementations live outside this crate; this module defines the seam
//! they plug into and ships 501 placeholders so the dispatch surface is
//! complete without them. The reserved `static` handler is served by
//! [`crate::static_files`] directly and never goes through this registry.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use http::{Request, StatusCode};

use crate::app::Reserved;
use crate::http_helpers::{text_response, HandlerResponse};

/// An in-process handler behind a reserved entrypoint.
///
/// The request body arrives fully buffered; the dispatch pipeline does not
/// stream.
#[async_trait]
pub trait BuiltinHandler: Send + Sync {
    async fn handle(&self, req: Request<Bytes>) -> HandlerResponse;
}

/// Placeholder responding 501 until the real handler is registered.
struct NotImplemented {
    name: &'static str,
    detail: Option<String>,
}

#[async_trait]
impl BuiltinHandler for NotImplemented {
    async fn handle(&self, _req: Request<Bytes>) -> HandlerResponse {
        let body = match &self.detail {
            Some(detail) => format!("{} handler not configured ({detail})", self.name),
            None => format!("{} handler not configured", self.name),
        };
        text_response(StatusCode::NOT_IMPLEMENTED, body)
    }
}

/// Registry of reserved entrypoint handlers.
pub struct BuiltinHandlerState {
    webdav: Arc<dyn BuiltinHandler>,
    cli: Arc<dyn BuiltinHandler>,
    docs: Arc<dyn BuiltinHandler>,
    editor: Arc<dyn BuiltinHandler>,
}

impl BuiltinHandlerState {
    /// Build a registry of placeholders.
    ///
    /// `shell` is the shell the CLI handler will run once registered; it is
    /// surfaced in the placeholder response for operability.
    pub fn with_placeholders(shell: &str) -> Self {
        Self {
            webdav: Arc::new(NotImplemented {
                name: "webdav",
                detail: None,
            }),
            cli: Arc::new(NotImplemented {
                name: "cli",
                detail: Some(format!("shell: {shell}")),
            }),
            docs: Arc::new(NotImplemented {
                name: "docs",
                detail: None,
            }),
            editor: Arc::new(NotImplemented {
                name: "editor",
                detail: None,
            }),
        }
    }

    /// Register the externally supplied WebDAV handler.
    pub fn set_webdav(&mut self, handler: Arc<dyn BuiltinHandler>) {
        self.webdav = handler;
    }

    pub fn set_cli(&mut self, handler: Arc<dyn BuiltinHandler>) {
        self.cli = handler;
    }

    pub fn set_docs(&mut self, handler: Arc<dyn BuiltinHandler>) {
        self.docs = handler;
    }

    pub fn set_editor(&mut self, handler: Arc<dyn BuiltinHandler>) {
        self.editor = handler;
    }

    /// The handler for a reserved entrypoint, if it routes through this
    /// registry (`static` does not).
    pub fn get(&self, reserved: Reserved) -> Option<Arc<dyn BuiltinHandler>> {
        match reserved {
            Reserved::Webdav => Some(self.webdav.clone()),
            Reserved::Cli => Some(self.cli.clone()),
            Reserved::Docs => Some(self.docs.clone()),
            Reserved::Editor => Some(self.editor.clone()),
            Reserved::Static => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> Request<Bytes> {
        Request::builder()
            .uri("/")
            .body(Bytes::new())
            .unwrap()
    }

    #[tokio::test]
    async fn test_placeholders_respond_501() {
        let state = BuiltinHandlerState::with_placeholders("/bin/sh");
        for reserved in [Reserved::Webdav, Reserved::Cli, Reserved::Docs, Reserved::Editor] {
            let handler = state.get(reserved).unwrap();
            let resp = handler.handle(request()).await;
            assert_eq!(resp.status(), StatusCode::NOT_IMPLEMENTED);
        }
    }

    #[test]
    fn test_static_does_not_route_here() {
        let state = BuiltinHandlerState::with_placeholders("/bin/sh");
        assert!(state.get(Reserved::Static).is_none());
    }

    #[tokio::test]
    async fn test_registered_handler_wins() {
        struct Ok200;

        #[async_trait]
        impl BuiltinHandler for Ok200 {
            async fn handle(&self, _req: Request<Bytes>) -> HandlerResponse {
                text_response(StatusCode::OK, "dav")
            }
        }

        let mut state = BuiltinHandlerState::with_placeholders("/bin/sh");
        state.set_webdav(Arc::new(Ok200));

        let handler = state.get(Reserved::Webdav).unwrap();
        let resp = handler.handle(request()).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
