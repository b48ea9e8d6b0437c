//! Small helpers for building outbound responses.

use bytes::Bytes;
use http::{header, Response, StatusCode};
use http_body_util::Full;

use crate::errors::ServerError;

/// The response body type used throughout the dispatch pipeline
pub type ResponseBody = Full<Bytes>;

/// A fully materialized response
pub type HandlerResponse = Response<ResponseBody>;

/// Build a plain-text response with the given status.
pub fn text_response(status: StatusCode, body: impl Into<Bytes>) -> HandlerResponse {
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(Full::new(body.into()))
        .unwrap_or_else(|_| empty_response(StatusCode::INTERNAL_SERVER_ERROR))
}

/// Build an empty response with the given status.
pub fn empty_response(status: StatusCode) -> HandlerResponse {
    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = status;
    response
}

/// Build a redirect response.
pub fn redirect(status: StatusCode, location: &str) -> HandlerResponse {
    Response::builder()
        .status(status)
        .header(header::LOCATION, location)
        .body(Full::new(Bytes::new()))
        .unwrap_or_else(|_| empty_response(StatusCode::INTERNAL_SERVER_ERROR))
}

/// Render a pipeline error as a response.
///
/// Evaluator failures carry the child's combined output as the body; all
/// other errors render their display form.
pub fn error_response(err: &ServerError) -> HandlerResponse {
    match err {
        ServerError::Evaluator { output } => {
            text_response(err.status_code(), Bytes::from(output.clone()))
        }
        ServerError::AppNotFound(_) => empty_response(err.status_code()),
        other => text_response(other.status_code(), other.to_string()),
    }
}
