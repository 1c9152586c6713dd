//! Bearer token verification seam.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::SandrunError;

/// Who a verified token belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
    pub tier: String,
}

impl Identity {
    pub fn new(user_id: impl Into<String>, tier: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            tier: tier.into(),
        }
    }
}

/// Validates bearer tokens issued by an external identity provider.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<Identity, SandrunError>;
}

pub const DEFAULT_TIER: &str = "standard";

/// Fixed token table, for development and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticTokenVerifier {
    tokens: HashMap<String, Identity>,
}

impl StaticTokenVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(mut self, token: impl Into<String>, identity: Identity) -> Self {
        self.tokens.insert(token.into(), identity);
        self
    }

    /// Parse `token:user_id[:tier]` entries separated by commas.
    pub fn parse(spec: &str) -> Result<Self, SandrunError> {
        let mut verifier = Self::new();
        for entry in spec.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let mut parts = entry.splitn(3, ':');
            let token = parts.next().unwrap_or_default().trim();
            let user_id = parts.next().map(str::trim).unwrap_or_default();
            let tier = parts.next().map(str::trim).filter(|t| !t.is_empty()).unwrap_or(DEFAULT_TIER);
            if token.is_empty() || user_id.is_empty() {
                return Err(SandrunError::Configuration(format!(
                    "auth token entry must be token:user_id[:tier], got {entry:?}"
                )));
            }
            verifier = verifier.with_token(token, Identity::new(user_id, tier));
        }
        Ok(verifier)
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

#[async_trait]
impl TokenVerifier for StaticTokenVerifier {
    async fn verify(&self, token: &str) -> Result<Identity, SandrunError> {
        if token.trim().is_empty() {
            return Err(SandrunError::Authentication("missing token".into()));
        }
        self.tokens
            .get(token)
            .cloned()
            .ok_or_else(|| SandrunError::Authentication("invalid token".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn known_token_resolves_identity() {
        let verifier = StaticTokenVerifier::new().with_token("t1", Identity::new("alice", "pro"));
        assert_eq!(verifier.verify("t1").await.unwrap(), Identity::new("alice", "pro"));
    }

    #[tokio::test]
    async fn unknown_or_blank_token_is_authentication_error() {
        let verifier = StaticTokenVerifier::new().with_token("t1", Identity::new("alice", "pro"));
        assert!(matches!(verifier.verify("nope").await, Err(SandrunError::Authentication(_))));
        assert!(matches!(verifier.verify("  ").await, Err(SandrunError::Authentication(_))));
    }

    #[tokio::test]
    async fn parses_token_table() {
        let verifier = StaticTokenVerifier::parse("abc:alice:pro, def:bob").unwrap();
        assert_eq!(verifier.len(), 2);
        assert_eq!(verifier.verify("def").await.unwrap(), Identity::new("bob", DEFAULT_TIER));
    }

    #[test]
    fn rejects_entries_without_user() {
        assert!(matches!(
            StaticTokenVerifier::parse("abc"),
            Err(SandrunError::Configuration(_))
        ));
        assert!(StaticTokenVerifier::parse("").unwrap().is_empty());
    }
}
