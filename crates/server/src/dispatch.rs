//! Request dispatch.
//!
//! Per request: derive the app alias from the host, load the app, select a
//! handler from its entrypoint (reserved in-process handlers, static
//! serving, or the evaluator), compute route privacy, wrap with the auth
//! guard where private, and record the outcome. Handler composition
//! happens here, per request; privacy depends on the path, so there is no
//! global middleware registry.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use chrono::{SecondsFormat, Utc};
use http::{header, HeaderValue, Method, Request, StatusCode};
use http_body_util::BodyExt;
use tracing::info;

use smallweb_common::RequestId;
use smallweb_config::ServerConfig;

use crate::access_log::{AccessLog, LogRecord};
use crate::app::{alias_from_host, App, Entrypoint, Reserved};
use crate::auth::{AuthMiddleware, AuthOutcome};
use crate::builtin_handlers::BuiltinHandlerState;
use crate::codec::{raw_host, serialize_request, write_response};
use crate::envfile;
use crate::errors::ServerError;
use crate::evaluator::Evaluator;
use crate::http_helpers::{empty_response, error_response, redirect, HandlerResponse};
use crate::static_files::StaticFileServer;

/// CORS preface applied to reserved handlers.
#[derive(Debug, Clone, Copy)]
enum CorsPreface {
    /// Wildcard origin, methods and headers (WebDAV)
    Permissive,
    /// Wildcard origin, read-only methods (reserved static)
    ReadOnly,
}

impl CorsPreface {
    fn apply(self, mut response: HandlerResponse) -> HandlerResponse {
        let headers = response.headers_mut();
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_ORIGIN,
            HeaderValue::from_static("*"),
        );
        match self {
            Self::Permissive => {
                headers.insert(
                    header::ACCESS_CONTROL_ALLOW_METHODS,
                    HeaderValue::from_static("*"),
                );
                headers.insert(
                    header::ACCESS_CONTROL_ALLOW_HEADERS,
                    HeaderValue::from_static("*"),
                );
            }
            Self::ReadOnly => {
                headers.insert(
                    header::ACCESS_CONTROL_ALLOW_METHODS,
                    HeaderValue::from_static("GET, OPTIONS"),
                );
                headers.insert(
                    header::ACCESS_CONTROL_ALLOW_HEADERS,
                    HeaderValue::from_static("Content-Type, Authorization"),
                );
            }
        }
        response
    }
}

/// The request dispatch engine, shared across connections.
pub struct Dispatcher {
    config: ServerConfig,
    auth: AuthMiddleware,
    evaluator: Arc<Evaluator>,
    builtins: BuiltinHandlerState,
    access_log: AccessLog,
    tls: bool,
}

impl Dispatcher {
    pub fn new(
        config: ServerConfig,
        auth: AuthMiddleware,
        evaluator: Arc<Evaluator>,
        builtins: BuiltinHandlerState,
        access_log: AccessLog,
    ) -> Self {
        let tls = config.tls_enabled();
        Self {
            config,
            auth,
            evaluator,
            builtins,
            access_log,
            tls,
        }
    }

    /// Handle one request, recording method, host, path, status and
    /// duration.
    pub async fn serve<B>(&self, req: Request<B>) -> HandlerResponse
    where
        B: hyper::body::Body,
        B::Error: std::fmt::Display,
    {
        let start = Instant::now();
        let request_id = RequestId::new();
        let method = req.method().clone();
        let host = raw_host(&req);
        let path = req.uri().path().to_string();

        let response = match self.route(req, &host).await {
            Ok(response) => response,
            Err(e) => error_response(&e),
        };

        info!(
            request_id = %request_id,
            method = %method,
            host = %host,
            path = %path,
            status = response.status().as_u16(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Request completed"
        );
        response
    }

    async fn route<B>(&self, req: Request<B>, host: &str) -> Result<HandlerResponse, ServerError>
    where
        B: hyper::body::Body,
        B::Error: std::fmt::Display,
    {
        // The apex itself is not an app; send it to www.
        let bare_host = host.rsplit_once(':').map_or(host, |(h, _)| h);
        if bare_host == self.config.domain {
            let path_and_query = req
                .uri()
                .path_and_query()
                .map(|pq| pq.as_str())
                .unwrap_or("/");
            let target = format!("https://www.{}{}", self.config.domain, path_and_query);
            return Ok(redirect(StatusCode::TEMPORARY_REDIRECT, &target));
        }

        let alias = alias_from_host(host).to_string();
        let app = App::load(&self.config.dir, &alias)?;
        let entrypoint = app.entrypoint()?;

        let path = req.uri().path().to_string();
        let private = app.is_private(&path) || path.starts_with("/_auth");

        let req = if private {
            match self.auth.guard(req, host).await {
                AuthOutcome::Forward(req) => req,
                AuthOutcome::Respond(response) => return Ok(response),
            }
        } else {
            req
        };

        match entrypoint {
            Entrypoint::Reserved(Reserved::Static) => {
                if req.method() == Method::OPTIONS {
                    return Ok(CorsPreface::ReadOnly.apply(empty_response(StatusCode::OK)));
                }
                let response = StaticFileServer::new(app.root()).serve(&req).await?;
                Ok(CorsPreface::ReadOnly.apply(response))
            }
            Entrypoint::Reserved(Reserved::Webdav) => {
                if req.method() == Method::OPTIONS {
                    return Ok(CorsPreface::Permissive.apply(empty_response(StatusCode::OK)));
                }
                let handler = self
                    .builtins
                    .get(Reserved::Webdav)
                    .ok_or(ServerError::EntrypointNotFound)?;
                let req = buffer_request(req).await?;
                Ok(CorsPreface::Permissive.apply(handler.handle(req).await))
            }
            Entrypoint::Reserved(reserved) => {
                let handler = self
                    .builtins
                    .get(reserved)
                    .ok_or(ServerError::EntrypointNotFound)?;
                let req = buffer_request(req).await?;
                Ok(handler.handle(req).await)
            }
            Entrypoint::File(path) if path.file_name().is_some_and(|n| n == "index.html") => {
                let root = path.parent().unwrap_or_else(|| Path::new("."));
                StaticFileServer::new(root).serve(&req).await
            }
            Entrypoint::File(path) => self.invoke_evaluator(req, &alias, &path).await,
        }
    }

    /// Run a request through the evaluator, recording the invocation in
    /// the app's access log on both outcomes.
    async fn invoke_evaluator<B>(
        &self,
        req: Request<B>,
        alias: &str,
        entrypoint: &Path,
    ) -> Result<HandlerResponse, ServerError>
    where
        B: hyper::body::Body,
        B::Error: std::fmt::Display,
    {
        let env = envfile::compose(&self.config.dir, entrypoint, &self.config.env)?;
        let serialized = serialize_request(req, self.tls).await?;

        let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        let start = Instant::now();
        let result = self
            .evaluator
            .invoke_request(entrypoint, env, serialized.clone())
            .await;
        let duration = start.elapsed().as_nanos() as u64;

        match result {
            Ok(invocation) => {
                self.access_log.append(
                    alias,
                    &LogRecord {
                        timestamp,
                        entrypoint: entrypoint.display().to_string(),
                        request: serialized,
                        response: Some(invocation.response.clone()),
                        duration,
                        logs: invocation.logs,
                    },
                );
                write_response(&invocation.response)
            }
            Err(ServerError::Evaluator { output }) => {
                self.access_log.append(
                    alias,
                    &LogRecord {
                        timestamp,
                        entrypoint: entrypoint.display().to_string(),
                        request: serialized,
                        response: None,
                        duration,
                        logs: output.clone(),
                    },
                );
                Err(ServerError::Evaluator { output })
            }
            Err(e) => Err(e),
        }
    }
}

/// Buffer a request body so in-process handlers see a complete request.
async fn buffer_request<B>(req: Request<B>) -> Result<Request<Bytes>, ServerError>
where
    B: hyper::body::Body,
    B::Error: std::fmt::Display,
{
    let (parts, body) = req.into_parts();
    let bytes = body
        .collect()
        .await
        .map_err(|e| ServerError::BodyRead(e.to_string()))?
        .to_bytes();
    Ok(Request::from_parts(parts, bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::OauthProvider;
    use crate::evaluator::write_support_file;
    use crate::session::SessionStore;
    use crate::token::TokenStore;
    use http_body_util::Full;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[cfg(unix)]
    fn stub_evaluator(dir: &Path) -> std::path::PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("stub-evaluator.sh");
        std::fs::write(
            &path,
            concat!(
                "#!/bin/sh\n",
                "read line\n",
                "out=$(printf '%s' \"$line\" | sed -n 's/.*\"output\":\"\\([^\"]*\\)\".*/\\1/p')\n",
                "printf '%s' '{\"status\":200,\"headers\":[[\"x-served-by\",\"evaluator\"]],\"body\":\"aGVsbG8=\"}' > \"$out\"\n",
            ),
        )
        .unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn dispatcher(tmp: &TempDir, email: &str) -> Dispatcher {
        let root = tmp.path().join("root");
        std::fs::create_dir_all(&root).unwrap();
        let data = tmp.path().join("data");

        let config = ServerConfig {
            dir: root.clone(),
            domain: "example.test".to_string(),
            host: "127.0.0.1".to_string(),
            port: None,
            cert: None,
            key: None,
            email: email.to_string(),
            shell: "/bin/sh".to_string(),
            env: HashMap::new(),
            max_workers: 4,
        };

        let sessions = Arc::new(SessionStore::open(data.join("sessions.json")).unwrap());
        let mut tokens = TokenStore::default();
        tokens.insert(crate::token::Token {
            public_id: "pub".to_string(),
            hash: bcrypt::hash("secret", 4).unwrap(),
            description: None,
            created_at: None,
        });
        let tokens = Arc::new(tokens);
        let auth = AuthMiddleware::new(
            sessions,
            tokens,
            OauthProvider::default(),
            email.to_string(),
        );

        let support = write_support_file(&data).unwrap();
        #[cfg(unix)]
        let exec = stub_evaluator(tmp.path());
        #[cfg(not(unix))]
        let exec = std::path::PathBuf::from("evaluator");
        let evaluator = Arc::new(Evaluator::with_executable(exec, support, 4));

        let builtins = BuiltinHandlerState::with_placeholders("/bin/sh");
        let access_log = AccessLog::new(&root);

        Dispatcher::new(config, auth, evaluator, builtins, access_log)
    }

    fn request(host: &str, path_and_query: &str) -> Request<Full<Bytes>> {
        Request::builder()
            .uri(path_and_query)
            .header(header::HOST, host)
            .body(Full::new(Bytes::new()))
            .unwrap()
    }

    fn root_of(dispatcher: &Dispatcher) -> std::path::PathBuf {
        dispatcher.config.dir.clone()
    }

    #[tokio::test]
    async fn test_apex_redirects_to_www() {
        let tmp = TempDir::new().unwrap();
        let d = dispatcher(&tmp, "");

        let resp = d.serve(request("example.test", "/x?q=1")).await;
        assert_eq!(resp.status(), StatusCode::TEMPORARY_REDIRECT);
        assert_eq!(
            resp.headers().get(header::LOCATION).unwrap(),
            "https://www.example.test/x?q=1"
        );
    }

    #[tokio::test]
    async fn test_unknown_app_is_404() {
        let tmp = TempDir::new().unwrap();
        let d = dispatcher(&tmp, "");

        let resp = d.serve(request("ghost.example.test", "/")).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_missing_entrypoint_under_valid_app_is_500() {
        let tmp = TempDir::new().unwrap();
        let d = dispatcher(&tmp, "");
        std::fs::create_dir(root_of(&d).join("empty")).unwrap();

        let resp = d.serve(request("empty.example.test", "/")).await;
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_index_html_app_served_statically() {
        let tmp = TempDir::new().unwrap();
        let d = dispatcher(&tmp, "");
        let site = root_of(&d).join("docs");
        std::fs::create_dir(&site).unwrap();
        std::fs::write(site.join("index.html"), "<h1>docs</h1>").unwrap();

        let resp = d.serve(request("docs.example.test", "/")).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers().get(header::CONTENT_TYPE).unwrap(),
            "text/html"
        );
        // The plain static path carries no CORS preface.
        assert!(!resp
            .headers()
            .contains_key(header::ACCESS_CONTROL_ALLOW_ORIGIN));
    }

    #[tokio::test]
    async fn test_private_app_redirects_to_login() {
        let tmp = TempDir::new().unwrap();
        let d = dispatcher(&tmp, "a@example.test");
        let site = root_of(&d).join("secret");
        std::fs::create_dir(&site).unwrap();
        std::fs::write(site.join("index.html"), "hidden").unwrap();
        std::fs::write(site.join("smallweb.json"), r#"{"private": true}"#).unwrap();

        let resp = d.serve(request("secret.example.test", "/page")).await;
        assert_eq!(resp.status(), StatusCode::SEE_OTHER);
        assert_eq!(
            resp.headers().get(header::LOCATION).unwrap(),
            "/_auth/login?redirect=%2Fpage"
        );
    }

    #[tokio::test]
    async fn test_public_route_overrides_private_default() {
        let tmp = TempDir::new().unwrap();
        let d = dispatcher(&tmp, "a@example.test");
        let site = root_of(&d).join("secret");
        std::fs::create_dir(&site).unwrap();
        std::fs::write(site.join("index.html"), "shared").unwrap();
        std::fs::write(
            site.join("smallweb.json"),
            r#"{"private": true, "publicRoutes": ["/index.html"]}"#,
        )
        .unwrap();

        let resp = d.serve(request("secret.example.test", "/index.html")).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_auth_paths_always_private() {
        let tmp = TempDir::new().unwrap();
        let d = dispatcher(&tmp, "a@example.test");
        let site = root_of(&d).join("open");
        std::fs::create_dir(&site).unwrap();
        std::fs::write(site.join("index.html"), "open").unwrap();

        // The login flow is mounted even on a public app.
        let resp = d.serve(request("open.example.test", "/_auth/login")).await;
        assert_eq!(resp.status(), StatusCode::SEE_OTHER);
        let location = resp
            .headers()
            .get(header::LOCATION)
            .unwrap()
            .to_str()
            .unwrap();
        assert!(location.starts_with("https://lastlogin.net/auth?"));
    }

    #[tokio::test]
    async fn test_reserved_static_cors_preflight() {
        let tmp = TempDir::new().unwrap();
        let d = dispatcher(&tmp, "");
        let site = root_of(&d).join("assets");
        std::fs::create_dir(&site).unwrap();
        std::fs::write(
            site.join("smallweb.json"),
            r#"{"entrypoint": "reserved:static"}"#,
        )
        .unwrap();

        let mut req = request("assets.example.test", "/");
        *req.method_mut() = Method::OPTIONS;
        let resp = d.serve(req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers()
                .get(header::ACCESS_CONTROL_ALLOW_METHODS)
                .unwrap(),
            "GET, OPTIONS"
        );
    }

    #[tokio::test]
    async fn test_reserved_webdav_placeholder_with_cors() {
        let tmp = TempDir::new().unwrap();
        let d = dispatcher(&tmp, "");
        let site = root_of(&d).join("files");
        std::fs::create_dir(&site).unwrap();
        std::fs::write(
            site.join("smallweb.json"),
            r#"{"entrypoint": "reserved:webdav"}"#,
        )
        .unwrap();

        let resp = d.serve(request("files.example.test", "/")).await;
        assert_eq!(resp.status(), StatusCode::NOT_IMPLEMENTED);
        assert_eq!(
            resp.headers()
                .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
                .unwrap(),
            "*"
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_evaluator_request_end_to_end() {
        let tmp = TempDir::new().unwrap();
        let d = dispatcher(&tmp, "");
        let site = root_of(&d).join("blog");
        std::fs::create_dir(&site).unwrap();
        std::fs::write(site.join("mod.ts"), "export default {}").unwrap();

        let resp = d.serve(request("blog.example.test", "/hello")).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers().get("x-served-by").unwrap(), "evaluator");

        // One access-log record with the response present.
        let log = std::fs::read_to_string(root_of(&d).join(".logs/blog.jsonl")).unwrap();
        let record: crate::access_log::LogRecord =
            serde_json::from_str(log.lines().next().unwrap()).unwrap();
        assert_eq!(record.request.url, "http://blog.example.test/hello");
        assert!(record.response.is_some());
        assert!(record.entrypoint.ends_with("blog/mod.ts"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_basic_token_reaches_evaluator_on_private_app() {
        use base64::engine::general_purpose::STANDARD as BASE64;
        use base64::Engine;

        let tmp = TempDir::new().unwrap();
        let d = dispatcher(&tmp, "a@example.test");
        let site = root_of(&d).join("blog");
        std::fs::create_dir(&site).unwrap();
        std::fs::write(site.join("mod.ts"), "export default {}").unwrap();
        std::fs::write(site.join("smallweb.json"), r#"{"private": true}"#).unwrap();

        let mut req = request("blog.example.test", "/hello");
        req.headers_mut().insert(
            header::AUTHORIZATION,
            format!("Basic {}", BASE64.encode("pub.secret:"))
                .parse()
                .unwrap(),
        );

        let resp = d.serve(req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers().get("x-served-by").unwrap(), "evaluator");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_evaluator_failure_logs_without_response() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = TempDir::new().unwrap();
        let mut d = dispatcher(&tmp, "");

        let failing = tmp.path().join("failing.sh");
        std::fs::write(&failing, "#!/bin/sh\nread line\necho boom\nexit 1\n").unwrap();
        std::fs::set_permissions(&failing, std::fs::Permissions::from_mode(0o755)).unwrap();
        let support = write_support_file(&tmp.path().join("data2")).unwrap();
        d.evaluator = Arc::new(Evaluator::with_executable(failing, support, 4));

        let site = root_of(&d).join("blog");
        std::fs::create_dir(&site).unwrap();
        std::fs::write(site.join("mod.ts"), "export default {}").unwrap();

        let resp = d.serve(request("blog.example.test", "/hello")).await;
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let log = std::fs::read_to_string(root_of(&d).join(".logs/blog.jsonl")).unwrap();
        let record: crate::access_log::LogRecord =
            serde_json::from_str(log.lines().next().unwrap()).unwrap();
        assert!(record.response.is_none());
        assert_eq!(record.logs, b"boom\n");
    }
}
