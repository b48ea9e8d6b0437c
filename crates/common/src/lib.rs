//! Shared types for the smallweb server.

pub mod ids;

pub use ids::{random_alphanumeric, RequestId, SessionId};
