//! API token credentials.
//!
//! A presented credential has the shape `<publicId>.<secret>`. The store
//! holds only the public half and a salted hash of the secret; lookup is
//! by public id, verification is a bcrypt comparison.

use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::errors::ServerError;

/// A stored token record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Token {
    pub public_id: String,
    /// bcrypt hash of the secret half
    pub hash: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// Split a presented credential into its public and secret halves.
///
/// The split is on the first `.`; both halves must be non-empty.
pub fn parse_token(credential: &str) -> Option<(&str, &str)> {
    let (public, secret) = credential.split_once('.')?;
    if public.is_empty() || secret.is_empty() {
        return None;
    }
    Some((public, secret))
}

/// Read-only token store keyed by public id.
#[derive(Debug, Default)]
pub struct TokenStore {
    tokens: HashMap<String, Token>,
}

impl TokenStore {
    /// Open the store at `path`. A missing file yields an empty store.
    pub fn open(path: &Path) -> Result<Self, ServerError> {
        if !path.exists() {
            debug!(path = %path.display(), "No token store file, starting empty");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        let tokens: HashMap<String, Token> =
            serde_json::from_str(&content).map_err(ServerError::Serialize)?;

        debug!(path = %path.display(), count = tokens.len(), "Opened token store");
        Ok(Self { tokens })
    }

    /// Look up a token by its public id.
    pub fn get(&self, public_id: &str) -> Option<&Token> {
        self.tokens.get(public_id)
    }

    /// Verify a full `<publicId>.<secret>` credential.
    ///
    /// Returns `false` on malformed credentials, unknown public ids and
    /// hash mismatches alike; callers never learn which.
    pub fn verify(&self, credential: &str) -> bool {
        let Some((public, secret)) = parse_token(credential) else {
            return false;
        };
        let Some(token) = self.get(public) else {
            return false;
        };
        match bcrypt::verify(secret, &token.hash) {
            Ok(ok) => ok,
            Err(e) => {
                warn!(public_id = %public, error = %e, "Token hash verification errored");
                false
            }
        }
    }

    #[cfg(test)]
    pub fn insert(&mut self, token: Token) {
        self.tokens.insert(token.public_id.clone(), token);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with(public: &str, secret: &str) -> TokenStore {
        let mut store = TokenStore::default();
        store.insert(Token {
            public_id: public.to_string(),
            hash: bcrypt::hash(secret, 4).unwrap(),
            description: None,
            created_at: None,
        });
        store
    }

    #[test]
    fn test_parse_token() {
        assert_eq!(parse_token("pub.secret"), Some(("pub", "secret")));
        // Split is on the first dot only.
        assert_eq!(parse_token("pub.sec.ret"), Some(("pub", "sec.ret")));
        assert_eq!(parse_token("nodot"), None);
        assert_eq!(parse_token(".secret"), None);
        assert_eq!(parse_token("pub."), None);
        assert_eq!(parse_token(""), None);
    }

    #[test]
    fn test_verify_valid_credential() {
        let store = store_with("pub", "secret");
        assert!(store.verify("pub.secret"));
    }

    #[test]
    fn test_verify_rejects_wrong_secret() {
        let store = store_with("pub", "secret");
        assert!(!store.verify("pub.wrong"));
    }

    #[test]
    fn test_verify_rejects_unknown_public_id() {
        let store = store_with("pub", "secret");
        assert!(!store.verify("other.secret"));
    }

    #[test]
    fn test_verify_rejects_malformed() {
        let store = store_with("pub", "secret");
        assert!(!store.verify("pubsecret"));
        assert!(!store.verify(""));
    }

    #[test]
    fn test_open_missing_file_is_empty() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = TokenStore::open(&tmp.path().join("tokens.json")).unwrap();
        assert!(store.get("anything").is_none());
    }

    #[test]
    fn test_open_round_trip() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("tokens.json");
        std::fs::write(
            &path,
            r#"{"pub": {"public_id": "pub", "hash": "$2b$04$abcdefghijklmnopqrstuv"}}"#,
        )
        .unwrap();

        let store = TokenStore::open(&path).unwrap();
        assert!(store.get("pub").is_some());
    }
}
