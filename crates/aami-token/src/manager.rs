//! Token lifecycle manager.

use std::collections::BTreeMap;
use std::sync::Arc;

use aami_core::{BootstrapToken, BootstrapTokenRepository, ConsumeOutcome, TokenId, TokenState};
use chrono::{Duration, Utc};
use tracing::{debug, info, warn};

use crate::error::{Result, TokenError};
use crate::secret::{TokenSecret, hash_secret};

/// Usage limit applied when a request does not set one.
pub const DEFAULT_USAGE_LIMIT: u32 = 10;

/// Lifetime, in days, applied when a request does not set one.
pub const DEFAULT_TTL_DAYS: i64 = 30;

/// Parameters for issuing a token.
#[derive(Debug, Clone)]
pub struct TokenRequest {
    /// Human-readable name.
    pub name: String,
    /// Maximum successful uses.
    pub usage_limit: u32,
    /// Lifetime from the moment of issue. May be negative.
    pub ttl: Duration,
    /// Labels applied to targets registered with the token.
    pub labels: BTreeMap<String, String>,
}

impl TokenRequest {
    /// Creates a request with the default limit and lifetime.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            usage_limit: DEFAULT_USAGE_LIMIT,
            ttl: Duration::days(DEFAULT_TTL_DAYS),
            labels: BTreeMap::new(),
        }
    }

    /// Sets the usage limit.
    #[must_use]
    pub const fn with_usage_limit(mut self, usage_limit: u32) -> Self {
        self.usage_limit = usage_limit;
        self
    }

    /// Sets the lifetime.
    #[must_use]
    pub const fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Adds a label.
    #[must_use]
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }
}

/// A freshly issued token: the stored record plus the one-time plaintext.
#[derive(Debug)]
pub struct IssuedToken {
    /// The stored record.
    pub token: BootstrapToken,
    /// The plaintext secret. Not recoverable after this point.
    pub secret: TokenSecret,
}

/// Issues and enforces bootstrap tokens.
///
/// The check-then-increment of [`consume`](Self::consume) is delegated to
/// [`BootstrapTokenRepository::consume_if_usable`], which performs it as one
/// atomic step.
pub struct TokenManager<R> {
    repo: Arc<R>,
}

impl<R> Clone for TokenManager<R> {
    fn clone(&self) -> Self {
        Self {
            repo: Arc::clone(&self.repo),
        }
    }
}

impl<R: BootstrapTokenRepository> TokenManager<R> {
    /// Creates a manager over the given repository.
    pub const fn new(repo: Arc<R>) -> Self {
        Self { repo }
    }

    /// Returns the underlying repository.
    #[must_use]
    pub fn repository(&self) -> &Arc<R> {
        &self.repo
    }

    /// Issues a new token with counter 0 and expiry `now + ttl`.
    ///
    /// # Errors
    ///
    /// Returns `TokenError::InvalidRequest` if the usage limit is zero, or a
    /// storage error if the record cannot be stored.
    pub fn issue(&self, request: TokenRequest) -> Result<IssuedToken> {
        if request.usage_limit == 0 {
            return Err(TokenError::InvalidRequest {
                reason: "usage limit must be at least 1".to_string(),
            });
        }

        let secret = TokenSecret::generate();
        let now = Utc::now();
        let token = BootstrapToken {
            id: TokenId::new(),
            name: request.name,
            secret_hash: secret.hash(),
            usage_count: 0,
            usage_limit: request.usage_limit,
            created_at: now,
            expires_at: now + request.ttl,
            labels: request.labels,
            revoked: false,
        };
        self.repo.insert_token(token.clone())?;

        info!(
            token_id = %token.id,
            name = %token.name,
            usage_limit = token.usage_limit,
            expires_at = %token.expires_at,
            "bootstrap token issued"
        );
        Ok(IssuedToken { token, secret })
    }

    /// Checks a plaintext token without consuming a use.
    ///
    /// Checks run in a fixed order: unknown or revoked, then expired, then
    /// exhausted.
    ///
    /// # Errors
    ///
    /// Returns `TokenError::Invalid`, `TokenError::Expired` or
    /// `TokenError::Exhausted`.
    pub fn validate(&self, secret: &str) -> Result<BootstrapToken> {
        let token = self
            .repo
            .find_token_by_hash(&hash_secret(secret))?
            .ok_or_else(|| TokenError::invalid("unknown token"))?;

        match token.state_at(Utc::now()) {
            TokenState::Active => Ok(token),
            TokenState::Revoked => Err(TokenError::invalid("token revoked")),
            TokenState::Expired => Err(TokenError::Expired { token_id: token.id }),
            TokenState::Exhausted => Err(TokenError::Exhausted {
                token_id: token.id,
                usage_limit: token.usage_limit,
            }),
        }
    }

    /// Validates and consumes one use of a token.
    ///
    /// Returns the updated record.
    ///
    /// # Errors
    ///
    /// Same as [`validate`](Self::validate).
    pub fn consume(&self, secret: &str) -> Result<BootstrapToken> {
        let outcome = self
            .repo
            .consume_if_usable(&hash_secret(secret), Utc::now())?;

        let err = match outcome {
            ConsumeOutcome::Consumed(token) => {
                info!(
                    token_id = %token.id,
                    usage_count = token.usage_count,
                    remaining = token.remaining_uses(),
                    "bootstrap token consumed"
                );
                return Ok(token);
            }
            ConsumeOutcome::NotFound => TokenError::invalid("unknown token"),
            ConsumeOutcome::Revoked(_) => TokenError::invalid("token revoked"),
            ConsumeOutcome::Expired(token) => TokenError::Expired { token_id: token.id },
            ConsumeOutcome::Exhausted(token) => TokenError::Exhausted {
                token_id: token.id,
                usage_limit: token.usage_limit,
            },
        };
        warn!(error = %err, "bootstrap token rejected");
        Err(err)
    }

    /// Gives back one use taken by [`consume`](Self::consume) when the work
    /// it paid for did not complete.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the token does not exist.
    pub fn refund(&self, id: &TokenId) -> Result<BootstrapToken> {
        let token = self.repo.release_use(id)?;
        info!(
            token_id = %id,
            usage_count = token.usage_count,
            "bootstrap token use refunded"
        );
        Ok(token)
    }

    /// Revokes a token. Revoked tokens report `InvalidToken` from then on.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the token does not exist.
    pub fn revoke(&self, id: &TokenId) -> Result<BootstrapToken> {
        let token = self.repo.revoke_token(id)?;
        info!(token_id = %id, "bootstrap token revoked");
        Ok(token)
    }

    /// Lists every token, oldest first.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the repository fails.
    pub fn list(&self) -> Result<Vec<BootstrapToken>> {
        Ok(self.repo.list_tokens()?)
    }

    /// Returns the current state of a token.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the token does not exist.
    pub fn state(&self, id: &TokenId) -> Result<TokenState> {
        let token = self.repo.get_token(id)?;
        let state = token.state_at(Utc::now());
        debug!(token_id = %id, state = %state, "token state");
        Ok(state)
    }

    /// Returns the number of uses a token has left.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the token does not exist.
    pub fn remaining_uses(&self, id: &TokenId) -> Result<u32> {
        Ok(self.repo.get_token(id)?.remaining_uses())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aami_core::{ErrorKind, InMemoryStore};
    use std::sync::Barrier;
    use std::thread;
    use test_case::test_case;

    fn manager() -> TokenManager<InMemoryStore> {
        TokenManager::new(Arc::new(InMemoryStore::new()))
    }

    #[test]
    fn refund_restores_an_exhausted_token() {
        let m = manager();
        let issued = m
            .issue(TokenRequest::new("once").with_usage_limit(1))
            .unwrap();
        m.consume(issued.secret.as_str()).unwrap();
        assert_eq!(m.state(&issued.token.id).unwrap(), TokenState::Exhausted);

        m.refund(&issued.token.id).unwrap();
        assert_eq!(m.remaining_uses(&issued.token.id).unwrap(), 1);
        assert!(m.consume(issued.secret.as_str()).is_ok());
    }

    #[test]
    fn issue_applies_defaults() {
        let m = manager();
        let issued = m.issue(TokenRequest::new("default")).unwrap();
        assert_eq!(issued.token.usage_limit, DEFAULT_USAGE_LIMIT);
        assert_eq!(issued.token.usage_count, 0);
        assert_eq!(
            issued.token.expires_at - issued.token.created_at,
            Duration::days(DEFAULT_TTL_DAYS)
        );
        assert_eq!(issued.token.secret_hash, issued.secret.hash());
    }

    #[test]
    fn stored_record_never_holds_plaintext() {
        let m = manager();
        let issued = m.issue(TokenRequest::new("x")).unwrap();
        let stored = m.repository().get_token(&issued.token.id).unwrap();
        assert_ne!(stored.secret_hash, issued.secret.as_str());
    }

    #[test]
    fn zero_usage_limit_rejected() {
        let err = manager()
            .issue(TokenRequest::new("x").with_usage_limit(0))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn unknown_token_is_invalid() {
        let err = manager().validate("nope").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidToken);
    }

    #[test]
    fn already_expired_token_reports_expired_not_invalid() {
        let m = manager();
        let issued = m
            .issue(TokenRequest::new("past").with_ttl(Duration::seconds(-1)))
            .unwrap();

        let err = m.consume(issued.secret.as_str()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TokenExpired);
        assert_eq!(m.remaining_uses(&issued.token.id).unwrap(), DEFAULT_USAGE_LIMIT);
    }

    #[test]
    fn expiry_reported_before_exhaustion() {
        let store = Arc::new(InMemoryStore::new());
        let m = TokenManager::new(Arc::clone(&store));
        let secret = TokenSecret::generate();
        let now = Utc::now();
        store
            .insert_token(BootstrapToken {
                id: TokenId::new(),
                name: "both".to_string(),
                secret_hash: secret.hash(),
                usage_count: 1,
                usage_limit: 1,
                created_at: now - Duration::hours(2),
                expires_at: now - Duration::hours(1),
                labels: BTreeMap::new(),
                revoked: false,
            })
            .unwrap();

        assert_eq!(
            m.validate(secret.as_str()).unwrap_err().kind(),
            ErrorKind::TokenExpired
        );
        assert_eq!(
            m.consume(secret.as_str()).unwrap_err().kind(),
            ErrorKind::TokenExpired
        );
    }

    #[test_case(1 ; "single use")]
    #[test_case(3 ; "three uses")]
    #[test_case(10 ; "default limit")]
    fn exactly_limit_uses_succeed(limit: u32) {
        let m = manager();
        let issued = m
            .issue(TokenRequest::new("n").with_usage_limit(limit))
            .unwrap();
        for _ in 0..limit {
            m.consume(issued.secret.as_str()).unwrap();
        }
        let err = m.consume(issued.secret.as_str()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TokenExhausted);
        assert_eq!(m.state(&issued.token.id).unwrap(), TokenState::Exhausted);
        assert_eq!(m.remaining_uses(&issued.token.id).unwrap(), 0);
    }

    #[test]
    fn concurrent_consumers_never_exceed_limit() {
        const LIMIT: u32 = 8;
        const CALLERS: usize = LIMIT as usize + 1;

        for _ in 0..20 {
            let m = manager();
            let issued = m
                .issue(TokenRequest::new("race").with_usage_limit(LIMIT))
                .unwrap();
            let secret = issued.secret.as_str().to_string();
            let barrier = Arc::new(Barrier::new(CALLERS));

            let handles: Vec<_> = (0..CALLERS)
                .map(|_| {
                    let m = m.clone();
                    let secret = secret.clone();
                    let barrier = Arc::clone(&barrier);
                    thread::spawn(move || {
                        barrier.wait();
                        m.consume(&secret).map_err(|e| e.kind())
                    })
                })
                .collect();

            let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
            let ok = results.iter().filter(|r| r.is_ok()).count();
            let exhausted = results
                .iter()
                .filter(|r| matches!(r, Err(ErrorKind::TokenExhausted)))
                .count();
            assert_eq!(ok, LIMIT as usize);
            assert_eq!(exhausted, 1);

            let stored = m.repository().get_token(&issued.token.id).unwrap();
            assert_eq!(stored.usage_count, LIMIT);
        }
    }

    #[test]
    fn revoked_token_is_invalid() {
        let m = manager();
        let issued = m.issue(TokenRequest::new("r")).unwrap();
        m.revoke(&issued.token.id).unwrap();

        assert_eq!(
            m.consume(issued.secret.as_str()).unwrap_err().kind(),
            ErrorKind::InvalidToken
        );
        assert_eq!(m.state(&issued.token.id).unwrap(), TokenState::Revoked);
    }

    #[test]
    fn list_returns_issued_tokens() {
        let m = manager();
        m.issue(TokenRequest::new("a")).unwrap();
        m.issue(TokenRequest::new("b").with_label("rack", "r1")).unwrap();
        let tokens = m.list().unwrap();
        assert_eq!(tokens.len(), 2);
        assert!(tokens.iter().any(|t| t.labels.get("rack").map(String::as_str) == Some("r1")));
    }
}
