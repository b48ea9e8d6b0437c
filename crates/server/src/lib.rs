//! Smallweb server library.
//!
//! A multi-tenant HTTP front-end mapping each request host to an app
//! directory and dispatching into a short-lived external evaluator
//! process. The core components:
//!
//! - **Dispatch**: host → app → handler selection, privacy, auth, logging
//! - **Evaluator**: one child process per request over a JSON stdio
//!   contract
//! - **Auth**: token credentials and an OAuth2-backed cookie session flow
//! - **Cron**: minute-ticked command-mode invocations per app
//! - **Access log**: per-app append-only JSONL records

// ============================================================================
// Module Declarations
// ============================================================================

pub mod access_log;
pub mod app;
pub mod auth;
pub mod builtin_handlers;
pub mod codec;
pub mod cron;
pub mod dispatch;
pub mod envfile;
pub mod errors;
pub mod evaluator;
pub mod http_helpers;
pub mod session;
pub mod static_files;
pub mod token;

// ============================================================================
// Public API Re-exports
// ============================================================================

// Dispatch core
pub use dispatch::Dispatcher;

// Evaluator boundary
pub use evaluator::{Evaluator, Invocation};

// Request/response codec
pub use codec::{serialize_request, write_response, EvaluatorInput, SerializedRequest, SerializedResponse};

// Auth
pub use auth::{AuthMiddleware, AuthOutcome, OauthProvider};

// Stores
pub use session::{Session, SessionStore};
pub use token::{parse_token, Token, TokenStore};

// App model
pub use app::{alias_from_host, resolve_entrypoint, App, Entrypoint, Reserved};

// Cron
pub use cron::CronDriver;

// Logging
pub use access_log::{AccessLog, LogRecord};

// Built-in handlers
pub use builtin_handlers::{BuiltinHandler, BuiltinHandlerState};

// Static files
pub use static_files::StaticFileServer;

// Errors
pub use errors::ServerError;
