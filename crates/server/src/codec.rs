//! Request/response codec for the evaluator boundary.
//!
//! Inbound requests are buffered fully and serialized into a JSON record;
//! the evaluator's response artifact is decoded back into an outbound
//! response. Binary fields travel as base64 strings. `serde_json` never
//! escapes HTML metacharacters, so bodies and URLs containing `<`, `>` and
//! `&` round-trip byte-for-byte.

use std::collections::HashMap;

use bytes::Bytes;
use http::{header, HeaderName, HeaderValue, Request, Response, StatusCode};
use http_body_util::{BodyExt, Full};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::errors::ServerError;
use crate::http_helpers::HandlerResponse;

/// Serde adapter encoding byte fields as base64 strings.
pub(crate) mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        match Option::<String>::deserialize(deserializer)? {
            Some(s) => STANDARD.decode(s.as_bytes()).map_err(serde::de::Error::custom),
            None => Ok(Vec::new()),
        }
    }
}

/// An inbound HTTP request, flattened for the evaluator.
///
/// Only the first value of each header is carried; multi-valued headers
/// (`Accept`, `Cookie` repeats) lose their remaining values at this
/// boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerializedRequest {
    /// Absolute URL, `https` scheme iff the transport was TLS
    pub url: String,
    pub method: String,
    /// `[name, first value]` pairs in encounter order
    pub headers: Vec<[String; 2]>,
    #[serde(
        with = "base64_bytes",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub body: Vec<u8>,
}

/// The response record the evaluator writes to its output artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerializedResponse {
    pub status: u16,
    /// `[name, value]` pairs; names may repeat, later entries win
    pub headers: Vec<[String; 2]>,
    #[serde(with = "base64_bytes", default)]
    pub body: Vec<u8>,
}

/// The single line of JSON handed to the evaluator on stdin in request mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluatorInput {
    pub req: SerializedRequest,
    /// Absolute path of the app entrypoint
    pub entrypoint: String,
    pub env: HashMap<String, String>,
    /// Path the evaluator must write its [`SerializedResponse`] to
    pub output: String,
}

/// The stdin record for command-mode (cron) invocations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandInput {
    pub entrypoint: String,
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub args: Vec<String>,
}

/// The `Host` header value as presented by the client.
pub fn raw_host<B>(req: &Request<B>) -> String {
    req.headers()
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or_else(|| req.uri().host().map(str::to_string))
        .unwrap_or_default()
}

/// Buffer the request body and flatten the request for the evaluator.
///
/// The URL is reconstructed as `<scheme>://<host><path>?<query>`; the body
/// is read fully into memory (the evaluator boundary is not streaming).
pub async fn serialize_request<B>(req: Request<B>, tls: bool) -> Result<SerializedRequest, ServerError>
where
    B: hyper::body::Body,
    B::Error: std::fmt::Display,
{
    let host = raw_host(&req);
    let (parts, body) = req.into_parts();

    let scheme = if tls { "https" } else { "http" };
    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let url = format!("{scheme}://{host}{path_and_query}");

    let mut headers = Vec::with_capacity(parts.headers.keys_len());
    for name in parts.headers.keys() {
        if let Some(value) = parts.headers.get(name) {
            headers.push([
                name.as_str().to_string(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            ]);
        }
    }

    let body = body
        .collect()
        .await
        .map_err(|e| ServerError::BodyRead(e.to_string()))?
        .to_bytes()
        .to_vec();

    Ok(SerializedRequest {
        url,
        method: parts.method.as_str().to_string(),
        headers,
        body,
    })
}

/// Materialize an outbound response from the evaluator's record.
///
/// Headers are applied in order with last-write-wins on repeats; the body
/// is emitted verbatim.
pub fn write_response(res: &SerializedResponse) -> Result<HandlerResponse, ServerError> {
    let status =
        StatusCode::from_u16(res.status).map_err(|_| ServerError::InvalidStatus(res.status))?;

    let mut response = Response::new(Full::new(Bytes::from(res.body.clone())));
    *response.status_mut() = status;

    for [name, value] in &res.headers {
        let name = match HeaderName::from_bytes(name.as_bytes()) {
            Ok(n) => n,
            Err(_) => {
                warn!(header = %name, "Dropping invalid response header name");
                continue;
            }
        };
        let value = match HeaderValue::from_str(value) {
            Ok(v) => v,
            Err(_) => {
                warn!(header = %name, "Dropping invalid response header value");
                continue;
            }
        };
        response.headers_mut().insert(name, value);
    }

    Ok(response)
}
