//! Authentication middleware.
//!
//! Requests to private routes pass through here. The middleware dispatches
//! on the shape of the presented credential: Basic and Bearer headers carry
//! API tokens, everything else goes through the cookie-session flow backed
//! by an OAuth2 authorization-code login at `/_auth/login`,
//! `/_auth/callback` and `/_auth/logout`.

use chrono::Utc;
use cookie::time::Duration as CookieDuration;
use cookie::{Cookie, SameSite};
use http::{header, Request, Response, StatusCode};
use http_body_util::Full;
use percent_encoding::{percent_decode_str, utf8_percent_encode, NON_ALPHANUMERIC};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;

use smallweb_common::{random_alphanumeric, SessionId};

use crate::http_helpers::{redirect, text_response, HandlerResponse};
use crate::session::{session_ttl, SessionStore};
use crate::token::TokenStore;

/// Session cookie name
pub const SESSION_COOKIE: &str = "smallweb-session";

/// Short-lived cookie carrying OAuth2 login state
pub const OAUTH_COOKIE: &str = "smallweb-oauth-store";

/// Authentication realm presented in challenges
const REALM: &str = "smallweb";

/// Length of the OAuth2 `state` parameter
const STATE_LEN: usize = 16;

/// Lifetime of the oauth-store cookie
const OAUTH_COOKIE_TTL: CookieDuration = CookieDuration::minutes(5);

/// Lifetime of the session cookie (matches the session TTL)
const SESSION_COOKIE_TTL: CookieDuration = CookieDuration::days(14);

/// OAuth2 provider endpoints.
///
/// The authorization-code flow per RFC 6749: the authorize endpoint
/// receives the state-carrying redirect, the token endpoint exchanges the
/// code, and userinfo returns JSON with at least an `email` field.
#[derive(Debug, Clone)]
pub struct OauthProvider {
    pub auth_url: String,
    pub token_url: String,
    pub userinfo_url: String,
}

impl Default for OauthProvider {
    fn default() -> Self {
        Self {
            auth_url: "https://lastlogin.net/auth".to_string(),
            token_url: "https://lastlogin.net/token".to_string(),
            userinfo_url: "https://lastlogin.net/userinfo".to_string(),
        }
    }
}

/// State stored in the oauth cookie between login and callback
#[derive(Debug, Serialize, Deserialize)]
struct OauthStore {
    state: String,
    redirect: String,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Deserialize)]
struct UserInfo {
    email: String,
}

/// The presented credential, classified once per request
enum Credential {
    /// Token carried in the username of a Basic header
    Basic(String),
    /// Token carried in a Bearer header
    Bearer(String),
    None,
}

/// Result of the auth guard: either the request proceeds to the inner
/// handler or the middleware answers it directly.
pub enum AuthOutcome<B> {
    Forward(Request<B>),
    Respond(HandlerResponse),
}

/// Authentication middleware shared across requests.
pub struct AuthMiddleware {
    sessions: Arc<SessionStore>,
    tokens: Arc<TokenStore>,
    provider: OauthProvider,
    http: reqwest::Client,
    /// Account allowed to hold a session; empty disables session login
    required_email: String,
}

impl AuthMiddleware {
    pub fn new(
        sessions: Arc<SessionStore>,
        tokens: Arc<TokenStore>,
        provider: OauthProvider,
        required_email: String,
    ) -> Self {
        Self {
            sessions,
            tokens,
            provider,
            http: reqwest::Client::new(),
            required_email,
        }
    }

    /// Run the auth state machine for one request.
    pub async fn guard<B>(&self, req: Request<B>, host: &str) -> AuthOutcome<B> {
        match classify(&req) {
            Credential::Basic(credential) => {
                if self.tokens.verify(&credential) {
                    AuthOutcome::Forward(req)
                } else {
                    AuthOutcome::Respond(challenge("Basic"))
                }
            }
            Credential::Bearer(credential) => {
                if self.tokens.verify(&credential) {
                    AuthOutcome::Forward(req)
                } else {
                    AuthOutcome::Respond(challenge("Bearer"))
                }
            }
            Credential::None => {
                if self.required_email.is_empty() {
                    return AuthOutcome::Respond(challenge("Basic"));
                }

                match req.uri().path() {
                    "/_auth/login" => AuthOutcome::Respond(self.login(&req, host)),
                    "/_auth/callback" => AuthOutcome::Respond(self.callback(&req, host).await),
                    "/_auth/logout" => AuthOutcome::Respond(self.logout(&req, host)),
                    _ => self.session_branch(req, host),
                }
            }
        }
    }

    /// Start the OAuth2 dance: remember state + redirect in a short-lived
    /// cookie and send the client to the provider's authorize endpoint.
    fn login<B>(&self, req: &Request<B>, host: &str) -> HandlerResponse {
        let redirect_target = query_param(req, "redirect").unwrap_or_else(|| "/".to_string());
        let state = random_alphanumeric(STATE_LEN);

        let store = OauthStore {
            state: state.clone(),
            redirect: redirect_target,
        };
        let store_json = match serde_json::to_string(&store) {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "Failed to encode oauth store");
                return text_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error");
            }
        };
        let cookie_value = utf8_percent_encode(&store_json, NON_ALPHANUMERIC).to_string();

        let oauth_cookie = Cookie::build((OAUTH_COOKIE, cookie_value))
            .path("/")
            .http_only(true)
            .secure(true)
            .same_site(SameSite::Lax)
            .max_age(OAUTH_COOKIE_TTL)
            .build();

        let authorize_url = match url::Url::parse_with_params(
            &self.provider.auth_url,
            &[
                ("client_id", format!("https://{host}/")),
                ("redirect_uri", format!("https://{host}/_auth/callback")),
                ("response_type", "code".to_string()),
                ("scope", "email".to_string()),
                ("state", state),
            ],
        ) {
            Ok(url) => url,
            Err(e) => {
                warn!(error = %e, "Failed to build authorize URL");
                return text_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error");
            }
        };

        with_cookie(
            redirect(StatusCode::SEE_OTHER, authorize_url.as_str()),
            &oauth_cookie,
        )
    }

    /// Finish the OAuth2 dance: verify state, exchange the code, fetch the
    /// account email and mint a session.
    async fn callback<B>(&self, req: &Request<B>, host: &str) -> HandlerResponse {
        let Some(raw_cookie) = get_cookie(req, OAUTH_COOKIE) else {
            warn!("OAuth callback without oauth cookie");
            return unauthorized();
        };
        let store: OauthStore = match percent_decode_str(&raw_cookie)
            .decode_utf8()
            .ok()
            .and_then(|json| serde_json::from_str(&json).ok())
        {
            Some(store) => store,
            None => {
                warn!("Failed to decode oauth cookie");
                return unauthorized();
            }
        };

        let presented_state = query_param(req, "state").unwrap_or_default();
        if presented_state != store.state {
            warn!("OAuth state mismatch");
            return unauthorized();
        }

        let Some(code) = query_param(req, "code").filter(|c| !c.is_empty()) else {
            warn!("OAuth callback without code");
            return text_response(StatusCode::BAD_REQUEST, "Bad Request");
        };

        let access_token = match self.exchange_code(&code, host).await {
            Ok(token) => token,
            Err(e) => {
                warn!(token_url = %self.provider.token_url, error = %e, "Code exchange failed");
                return unauthorized();
            }
        };

        let email = match self.fetch_email(&access_token).await {
            Ok(email) => email,
            Err(e) => {
                warn!(userinfo_url = %self.provider.userinfo_url, error = %e, "Userinfo request failed");
                return unauthorized();
            }
        };

        let session_id = match self.sessions.create(&email, host) {
            Ok(id) => id,
            Err(e) => {
                warn!(error = %e, "Failed to create session");
                return unauthorized();
            }
        };

        info!(email = %email, host = %host, "Session login completed");

        let clear_oauth = removal_cookie(OAUTH_COOKIE);
        let session_cookie = Cookie::build((SESSION_COOKIE, session_id.into_string()))
            .path("/")
            .http_only(true)
            .secure(true)
            .same_site(SameSite::Lax)
            .max_age(SESSION_COOKIE_TTL)
            .build();

        let target = if store.redirect.is_empty() {
            "/".to_string()
        } else {
            store.redirect
        };
        with_cookie(
            with_cookie(redirect(StatusCode::SEE_OTHER, &target), &clear_oauth),
            &session_cookie,
        )
    }

    /// Delete the session row and expire the cookie.
    fn logout<B>(&self, req: &Request<B>, host: &str) -> HandlerResponse {
        let Some(raw_session) = get_cookie(req, SESSION_COOKIE) else {
            warn!("Logout without session cookie");
            return unauthorized();
        };

        if let Err(e) = self.sessions.delete(&SessionId::from_string(raw_session)) {
            warn!(error = %e, "Failed to delete session");
            return unauthorized();
        }

        let target = query_param(req, "redirect")
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| format!("https://{host}/"));

        with_cookie(
            redirect(StatusCode::SEE_OTHER, &target),
            &removal_cookie(SESSION_COOKIE),
        )
    }

    /// The cookie-session branch for ordinary private paths.
    fn session_branch<B>(&self, req: Request<B>, host: &str) -> AuthOutcome<B> {
        let login_target = login_redirect(req.uri().path());

        let Some(raw_session) = get_cookie(&req, SESSION_COOKIE) else {
            return AuthOutcome::Respond(redirect(StatusCode::SEE_OTHER, &login_target));
        };
        let session_id = SessionId::from_string(raw_session);

        let Some(session) = self.sessions.get(&session_id, host) else {
            return AuthOutcome::Respond(with_cookie(
                redirect(StatusCode::SEE_OTHER, &login_target),
                &removal_cookie(SESSION_COOKIE),
            ));
        };

        let now = Utc::now();
        if session.expired(now) {
            if let Err(e) = self.sessions.delete(&session_id) {
                warn!(error = %e, "Failed to delete expired session");
                return AuthOutcome::Respond(text_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal Server Error",
                ));
            }
            return AuthOutcome::Respond(with_cookie(
                redirect(StatusCode::SEE_OTHER, &login_target),
                &removal_cookie(SESSION_COOKIE),
            ));
        }

        if session.email != self.required_email {
            warn!(session_email = %session.email, "Session email mismatch");
            return AuthOutcome::Respond(unauthorized());
        }

        // Sliding expiry: sessions in their final week are renewed for a
        // full TTL, then the request proceeds to the inner handler.
        if session.near_expiry(now) {
            if let Err(e) = self.sessions.extend(&session_id, now + session_ttl()) {
                warn!(error = %e, "Failed to extend session");
                return AuthOutcome::Respond(text_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal Server Error",
                ));
            }
        }

        AuthOutcome::Forward(req)
    }

    async fn exchange_code(&self, code: &str, host: &str) -> Result<String, reqwest::Error> {
        let client_id = format!("https://{host}/");
        let redirect_uri = format!("https://{host}/_auth/callback");
        let response = self
            .http
            .post(&self.provider.token_url)
            .form(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("client_id", client_id.as_str()),
                ("redirect_uri", redirect_uri.as_str()),
            ])
            .send()
            .await?
            .error_for_status()?;

        let token: TokenResponse = response.json().await?;
        Ok(token.access_token)
    }

    async fn fetch_email(&self, access_token: &str) -> Result<String, reqwest::Error> {
        let response = self
            .http
            .get(&self.provider.userinfo_url)
            .bearer_auth(access_token)
            .send()
            .await?
            .error_for_status()?;

        let userinfo: UserInfo = response.json().await?;
        Ok(userinfo.email)
    }
}

/// Classify the presented credential.
///
/// Malformed Basic headers are treated as no credential at all, letting
/// the request fall through to the session flow.
fn classify<B>(req: &Request<B>) -> Credential {
    let Some(authorization) = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
    else {
        return Credential::None;
    };

    if let Some(encoded) = authorization.strip_prefix("Basic ") {
        let decoded = BASE64
            .decode(encoded.trim())
            .ok()
            .and_then(|bytes| String::from_utf8(bytes).ok());
        if let Some(userpass) = decoded {
            if let Some((user, _pass)) = userpass.split_once(':') {
                return Credential::Basic(user.to_string());
            }
        }
        return Credential::None;
    }

    if let Some(token) = authorization.strip_prefix("Bearer ") {
        return Credential::Bearer(token.to_string());
    }

    Credential::None
}

fn challenge(scheme: &str) -> HandlerResponse {
    let mut response = Response::new(Full::new(Bytes::from_static(b"Unauthorized")));
    *response.status_mut() = StatusCode::UNAUTHORIZED;
    if let Ok(value) = format!("{scheme} realm=\"{REALM}\"").parse() {
        response
            .headers_mut()
            .insert(header::WWW_AUTHENTICATE, value);
    }
    response
}

fn unauthorized() -> HandlerResponse {
    text_response(StatusCode::UNAUTHORIZED, "Unauthorized")
}

fn login_redirect(path: &str) -> String {
    format!(
        "/_auth/login?redirect={}",
        utf8_percent_encode(path, NON_ALPHANUMERIC)
    )
}

fn removal_cookie(name: &str) -> Cookie<'static> {
    Cookie::build((name.to_string(), ""))
        .path("/")
        .http_only(true)
        .secure(true)
        .same_site(SameSite::Lax)
        .max_age(CookieDuration::ZERO)
        .build()
}

fn with_cookie(mut response: HandlerResponse, cookie: &Cookie<'_>) -> HandlerResponse {
    if let Ok(value) = cookie.to_string().parse() {
        response.headers_mut().append(header::SET_COOKIE, value);
    }
    response
}

fn get_cookie<B>(req: &Request<B>, name: &str) -> Option<String> {
    for header_value in req.headers().get_all(header::COOKIE) {
        let Ok(raw) = header_value.to_str() else {
            continue;
        };
        for parsed in Cookie::split_parse(raw.to_string()) {
            if let Ok(cookie) = parsed {
                if cookie.name() == name {
                    return Some(cookie.value().to_string());
                }
            }
        }
    }
    None
}

fn query_param<B>(req: &Request<B>, key: &str) -> Option<String> {
    let query = req.uri().query()?;
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::Token;
    use chrono::Duration;
    use tempfile::TempDir;

    fn middleware(tmp: &TempDir, email: &str) -> AuthMiddleware {
        let sessions =
            Arc::new(SessionStore::open(tmp.path().join("sessions.json")).unwrap());
        let mut tokens = TokenStore::default();
        tokens.insert(Token {
            public_id: "pub".to_string(),
            hash: bcrypt::hash("secret", 4).unwrap(),
            description: None,
            created_at: None,
        });
        AuthMiddleware::new(
            sessions,
            Arc::new(tokens),
            OauthProvider::default(),
            email.to_string(),
        )
    }

    fn request(path: &str) -> Request<Bytes> {
        Request::builder().uri(path).body(Bytes::new()).unwrap()
    }

    fn request_with_header(path: &str, name: header::HeaderName, value: &str) -> Request<Bytes> {
        Request::builder()
            .uri(path)
            .header(name, value)
            .body(Bytes::new())
            .unwrap()
    }

    fn basic_auth(credential: &str) -> String {
        format!("Basic {}", BASE64.encode(format!("{credential}:")))
    }

    #[tokio::test]
    async fn test_valid_basic_token_forwards() {
        let tmp = TempDir::new().unwrap();
        let auth = middleware(&tmp, "a@example.test");

        let req = request_with_header(
            "/page",
            header::AUTHORIZATION,
            &basic_auth("pub.secret"),
        );
        assert!(matches!(
            auth.guard(req, "blog.example.test").await,
            AuthOutcome::Forward(_)
        ));
    }

    #[tokio::test]
    async fn test_bad_basic_token_challenges() {
        let tmp = TempDir::new().unwrap();
        let auth = middleware(&tmp, "a@example.test");

        let req = request_with_header(
            "/page",
            header::AUTHORIZATION,
            &basic_auth("pub.wrong"),
        );
        let AuthOutcome::Respond(resp) = auth.guard(req, "blog.example.test").await else {
            panic!("expected response");
        };
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert!(resp
            .headers()
            .get(header::WWW_AUTHENTICATE)
            .unwrap()
            .to_str()
            .unwrap()
            .starts_with("Basic"));
    }

    #[tokio::test]
    async fn test_valid_bearer_token_forwards() {
        let tmp = TempDir::new().unwrap();
        let auth = middleware(&tmp, "a@example.test");

        let req = request_with_header("/page", header::AUTHORIZATION, "Bearer pub.secret");
        assert!(matches!(
            auth.guard(req, "blog.example.test").await,
            AuthOutcome::Forward(_)
        ));
    }

    #[tokio::test]
    async fn test_bad_bearer_token_challenges() {
        let tmp = TempDir::new().unwrap();
        let auth = middleware(&tmp, "a@example.test");

        let req = request_with_header("/page", header::AUTHORIZATION, "Bearer nope");
        let AuthOutcome::Respond(resp) = auth.guard(req, "blog.example.test").await else {
            panic!("expected response");
        };
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert!(resp
            .headers()
            .get(header::WWW_AUTHENTICATE)
            .unwrap()
            .to_str()
            .unwrap()
            .starts_with("Bearer"));
    }

    #[tokio::test]
    async fn test_empty_email_disables_session_login() {
        let tmp = TempDir::new().unwrap();
        let auth = middleware(&tmp, "");

        let AuthOutcome::Respond(resp) = auth.guard(request("/page"), "blog.example.test").await
        else {
            panic!("expected response");
        };
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert!(resp.headers().contains_key(header::WWW_AUTHENTICATE));
    }

    #[tokio::test]
    async fn test_no_session_redirects_to_login() {
        let tmp = TempDir::new().unwrap();
        let auth = middleware(&tmp, "a@example.test");

        let AuthOutcome::Respond(resp) = auth.guard(request("/page"), "blog.example.test").await
        else {
            panic!("expected response");
        };
        assert_eq!(resp.status(), StatusCode::SEE_OTHER);
        assert_eq!(
            resp.headers().get(header::LOCATION).unwrap(),
            "/_auth/login?redirect=%2Fpage"
        );
    }

    #[tokio::test]
    async fn test_login_sets_state_cookie_and_redirects() {
        let tmp = TempDir::new().unwrap();
        let auth = middleware(&tmp, "a@example.test");

        let AuthOutcome::Respond(resp) = auth
            .guard(request("/_auth/login?redirect=/page"), "blog.example.test")
            .await
        else {
            panic!("expected response");
        };
        assert_eq!(resp.status(), StatusCode::SEE_OTHER);

        let location = resp.headers().get(header::LOCATION).unwrap().to_str().unwrap();
        assert!(location.starts_with("https://lastlogin.net/auth?"));
        assert!(location.contains("state="));
        assert!(location.contains("scope=email"));
        assert!(location.contains("response_type=code"));

        let set_cookie = resp.headers().get(header::SET_COOKIE).unwrap().to_str().unwrap();
        assert!(set_cookie.starts_with(OAUTH_COOKIE));
        assert!(set_cookie.contains("HttpOnly"));
        assert!(set_cookie.contains("Secure"));
        assert!(set_cookie.contains("SameSite=Lax"));
    }

    #[tokio::test]
    async fn test_callback_state_mismatch_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let auth = middleware(&tmp, "a@example.test");

        let store_json = r#"{"state":"expected","redirect":"/page"}"#;
        let cookie_value = utf8_percent_encode(store_json, NON_ALPHANUMERIC).to_string();
        let req = request_with_header(
            "/_auth/callback?state=tampered&code=abc",
            header::COOKIE,
            &format!("{OAUTH_COOKIE}={cookie_value}"),
        );

        let AuthOutcome::Respond(resp) = auth.guard(req, "blog.example.test").await else {
            panic!("expected response");
        };
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_callback_without_cookie_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let auth = middleware(&tmp, "a@example.test");

        let AuthOutcome::Respond(resp) = auth
            .guard(request("/_auth/callback?state=x&code=y"), "blog.example.test")
            .await
        else {
            panic!("expected response");
        };
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_valid_session_forwards() {
        let tmp = TempDir::new().unwrap();
        let auth = middleware(&tmp, "a@example.test");
        let id = auth
            .sessions
            .create("a@example.test", "blog.example.test")
            .unwrap();

        let req = request_with_header(
            "/page",
            header::COOKIE,
            &format!("{SESSION_COOKIE}={id}"),
        );
        assert!(matches!(
            auth.guard(req, "blog.example.test").await,
            AuthOutcome::Forward(_)
        ));
    }

    #[tokio::test]
    async fn test_session_wrong_host_redirects_to_login() {
        let tmp = TempDir::new().unwrap();
        let auth = middleware(&tmp, "a@example.test");
        let id = auth
            .sessions
            .create("a@example.test", "blog.example.test")
            .unwrap();

        let req = request_with_header(
            "/page",
            header::COOKIE,
            &format!("{SESSION_COOKIE}={id}"),
        );
        let AuthOutcome::Respond(resp) = auth.guard(req, "docs.example.test").await else {
            panic!("expected response");
        };
        assert_eq!(resp.status(), StatusCode::SEE_OTHER);
        // The stale cookie is expired on the way out.
        assert!(resp.headers().contains_key(header::SET_COOKIE));
    }

    #[tokio::test]
    async fn test_expired_session_is_deleted_and_redirected() {
        let tmp = TempDir::new().unwrap();
        let auth = middleware(&tmp, "a@example.test");
        let id = auth
            .sessions
            .create("a@example.test", "blog.example.test")
            .unwrap();
        auth.sessions
            .extend(&id, Utc::now() - Duration::hours(1))
            .unwrap();

        let req = request_with_header(
            "/page",
            header::COOKIE,
            &format!("{SESSION_COOKIE}={id}"),
        );
        let AuthOutcome::Respond(resp) = auth.guard(req, "blog.example.test").await else {
            panic!("expected response");
        };
        assert_eq!(resp.status(), StatusCode::SEE_OTHER);
        assert!(auth.sessions.get(&id, "blog.example.test").is_none());
    }

    #[tokio::test]
    async fn test_session_email_mismatch_is_unauthorized() {
        let tmp = TempDir::new().unwrap();
        let auth = middleware(&tmp, "owner@example.test");
        let id = auth
            .sessions
            .create("intruder@example.test", "blog.example.test")
            .unwrap();

        let req = request_with_header(
            "/page",
            header::COOKIE,
            &format!("{SESSION_COOKIE}={id}"),
        );
        let AuthOutcome::Respond(resp) = auth.guard(req, "blog.example.test").await else {
            panic!("expected response");
        };
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_near_expiry_session_is_extended_and_forwarded() {
        let tmp = TempDir::new().unwrap();
        let auth = middleware(&tmp, "a@example.test");
        let id = auth
            .sessions
            .create("a@example.test", "blog.example.test")
            .unwrap();
        auth.sessions
            .extend(&id, Utc::now() + Duration::days(3))
            .unwrap();

        let req = request_with_header(
            "/page",
            header::COOKIE,
            &format!("{SESSION_COOKIE}={id}"),
        );
        assert!(matches!(
            auth.guard(req, "blog.example.test").await,
            AuthOutcome::Forward(_)
        ));

        let session = auth.sessions.get(&id, "blog.example.test").unwrap();
        assert!(session.expires_at > Utc::now() + Duration::days(13));
    }

    #[tokio::test]
    async fn test_logout_deletes_session() {
        let tmp = TempDir::new().unwrap();
        let auth = middleware(&tmp, "a@example.test");
        let id = auth
            .sessions
            .create("a@example.test", "blog.example.test")
            .unwrap();

        let req = request_with_header(
            "/_auth/logout",
            header::COOKIE,
            &format!("{SESSION_COOKIE}={id}"),
        );
        let AuthOutcome::Respond(resp) = auth.guard(req, "blog.example.test").await else {
            panic!("expected response");
        };
        assert_eq!(resp.status(), StatusCode::SEE_OTHER);
        assert_eq!(
            resp.headers().get(header::LOCATION).unwrap(),
            "https://blog.example.test/"
        );
        assert!(auth.sessions.get(&id, "blog.example.test").is_none());
    }
}
