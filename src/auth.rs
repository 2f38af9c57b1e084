// 🔐 Identity verification
//
// Every operation is gated on a verified bearer token. Verification itself
// sits behind `TokenVerifier`; the allow-list and local bypass live here.

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::error::{IntakeError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    pub uid: String,
    pub email: String,
}

impl Identity {
    /// Identity used when authentication is bypassed for local testing
    pub fn local() -> Self {
        Identity {
            uid: "local-operator".to_string(),
            email: "test@example.com".to_string(),
        }
    }
}

pub trait TokenVerifier: Send + Sync {
    fn verify(&self, token: &str) -> Result<Identity>;
}

fn token_digest(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Verifies against a fixed set of issued tokens. Only digests are kept.
#[derive(Debug, Default, Clone)]
pub struct StaticTokenVerifier {
    digests: HashMap<String, Identity>,
}

impl StaticTokenVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(mut self, token: &str, email: &str) -> Self {
        self.add_token(token, email);
        self
    }

    pub fn add_token(&mut self, token: &str, email: &str) {
        let digest = token_digest(token);
        let identity = Identity {
            uid: digest.chars().take(16).collect(),
            email: email.to_string(),
        };
        self.digests.insert(digest, identity);
    }

    pub fn token_count(&self) -> usize {
        self.digests.len()
    }
}

impl TokenVerifier for StaticTokenVerifier {
    fn verify(&self, token: &str) -> Result<Identity> {
        self.digests
            .get(&token_digest(token))
            .cloned()
            .ok_or_else(|| IntakeError::Unauthorized("Invalid authentication token".to_string()))
    }
}

// ============================================================================
// AUTHENTICATOR
// ============================================================================

pub struct Authenticator {
    verifier: Box<dyn TokenVerifier>,
    allowed_emails: Vec<String>,
    bypass: bool,
}

impl Authenticator {
    pub fn new(verifier: Box<dyn TokenVerifier>, allowed_emails: Vec<String>, bypass: bool) -> Self {
        Authenticator {
            verifier,
            allowed_emails: allowed_emails.into_iter().map(|e| e.to_lowercase()).collect(),
            bypass,
        }
    }

    pub fn is_bypassed(&self) -> bool {
        self.bypass
    }

    /// Authorize an `Authorization` header value (`Bearer <token>`)
    pub fn authorize_header(&self, header: Option<&str>) -> Result<Identity> {
        if self.bypass {
            debug!("bypassing authentication for local testing");
            return Ok(Identity::local());
        }

        let token = header
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or_else(|| IntakeError::Unauthorized("Missing or invalid auth token".to_string()))?;

        self.authorize_token(token)
    }

    /// Authorize a raw token (CLI and TUI)
    pub fn authorize_token(&self, token: &str) -> Result<Identity> {
        if self.bypass {
            return Ok(Identity::local());
        }

        let identity = self.verifier.verify(token).map_err(|err| {
            warn!("token verification failed");
            err
        })?;

        if !self.allowed_emails.is_empty() && !self.allowed_emails.contains(&identity.email.to_lowercase()) {
            warn!(email = %identity.email, "email not on allow-list");
            return Err(IntakeError::Unauthorized(
                "Access denied. Your email is not allowed.".to_string(),
            ));
        }

        debug!(email = %identity.email, "token verified");
        Ok(identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn authenticator(allowed: &[&str], bypass: bool) -> Authenticator {
        let verifier = StaticTokenVerifier::new()
            .with_token("s3cret", "packer@example.com")
            .with_token("other", "stranger@example.com");
        Authenticator::new(
            Box::new(verifier),
            allowed.iter().map(|s| s.to_string()).collect(),
            bypass,
        )
    }

    #[test]
    fn test_valid_bearer_token() {
        let auth = authenticator(&["packer@example.com"], false);
        let identity = auth.authorize_header(Some("Bearer s3cret")).unwrap();
        assert_eq!(identity.email, "packer@example.com");
    }

    #[test]
    fn test_missing_or_malformed_header() {
        let auth = authenticator(&[], false);
        assert!(matches!(auth.authorize_header(None), Err(IntakeError::Unauthorized(_))));
        assert!(matches!(auth.authorize_header(Some("s3cret")), Err(IntakeError::Unauthorized(_))));
        assert!(matches!(auth.authorize_header(Some("Bearer ")), Err(IntakeError::Unauthorized(_))));
    }

    #[test]
    fn test_unknown_token() {
        let auth = authenticator(&[], false);
        let err = auth.authorize_header(Some("Bearer guess")).unwrap_err();
        assert_eq!(err.to_string(), "Unauthorized: Invalid authentication token");
    }

    #[test]
    fn test_allow_list_is_enforced() {
        let auth = authenticator(&["Packer@Example.com"], false);
        assert!(auth.authorize_token("s3cret").is_ok());
        assert!(matches!(auth.authorize_token("other"), Err(IntakeError::Unauthorized(_))));
    }

    #[test]
    fn test_empty_allow_list_admits_any_verified_token() {
        let auth = authenticator(&[], false);
        assert!(auth.authorize_token("other").is_ok());
    }

    #[test]
    fn test_bypass() {
        let auth = authenticator(&["packer@example.com"], true);
        assert_eq!(auth.authorize_header(None).unwrap(), Identity::local());
        assert!(auth.is_bypassed());
    }

    #[test]
    fn test_tokens_stored_as_digests() {
        let verifier = StaticTokenVerifier::new().with_token("s3cret", "packer@example.com");
        assert_eq!(verifier.token_count(), 1);
        assert!(!verifier.digests.contains_key("s3cret"));
    }
}
