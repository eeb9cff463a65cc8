//! The composed gate in front of protected operations

use std::{future::Future, sync::Arc};

use crate::{
    cache::KeyCache,
    config::AuthConfig,
    error::AuthError,
    extract::extract,
    jwt::{BearerTokenRef, DecodedClaims, TokenVerifier},
    permission::{self, PermissionRef},
    source::{KeySource, RemoteKeySource},
};

#[derive(Debug)]
struct Inner {
    verifier: TokenVerifier,
    cache: Arc<KeyCache>,
}

/// Authorizes callers of protected operations
///
/// Each call runs, in order, header extraction, token verification and the
/// permission check, and stops at the first failure. The guard holds no
/// per-request state; clones share one key cache and may be used from any
/// number of concurrent requests.
#[derive(Debug, Clone)]
#[must_use]
pub struct AuthorizationGuard {
    inner: Arc<Inner>,
}

impl AuthorizationGuard {
    /// Constructs a guard whose key cache starts empty and fills from
    /// `source` on first use
    pub fn new(verifier: TokenVerifier, source: Arc<dyn KeySource>) -> Self {
        Self::with_cache(verifier, Arc::new(KeyCache::new(source)))
    }

    /// Constructs a guard over an existing key cache
    pub fn with_cache(verifier: TokenVerifier, cache: Arc<KeyCache>) -> Self {
        Self {
            inner: Arc::new(Inner { verifier, cache }),
        }
    }

    /// Constructs a guard that fetches keys from the configured JWKS
    /// endpoint
    ///
    /// When a refresh interval is configured, a background refresh is
    /// started.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be initialized.
    ///
    /// # Panics
    ///
    /// Panics if a refresh interval is configured and this is called outside
    /// of a Tokio runtime.
    pub fn from_config(config: &AuthConfig) -> Result<Self, reqwest::Error> {
        let jwks_url = config.jwks_url();
        let source = RemoteKeySource::with_timeout(&jwks_url, config.fetch_timeout())?;
        let cache = Arc::new(KeyCache::new(Arc::new(source)));

        if let Some(interval) = config.refresh_interval() {
            cache.spawn_refresh(interval);
        }

        tracing::debug!(
            issuer = %config.issuer(),
            audience = %config.audience(),
            jwks.url = %jwks_url,
            "authorization guard configured"
        );

        Ok(Self::with_cache(config.verifier(), cache))
    }

    /// The token verifier
    pub fn verifier(&self) -> &TokenVerifier {
        &self.inner.verifier
    }

    /// The shared key cache
    #[must_use]
    pub fn key_cache(&self) -> &Arc<KeyCache> {
        &self.inner.cache
    }

    /// Verifies a token against the cached keys
    ///
    /// If the token names a key that is not cached, the key set is refreshed
    /// once and verification is retried.
    ///
    /// # Errors
    ///
    /// Returns the verification failure, or a key source failure if the
    /// refresh could not be completed.
    pub async fn verify_token(&self, token: &BearerTokenRef) -> Result<DecodedClaims, AuthError> {
        let snapshot = self.inner.cache.snapshot();

        match self.inner.verifier.verify(token, snapshot.keys()) {
            Err(AuthError::SigningKeyNotFound) => {
                tracing::debug!(
                    generation = snapshot.generation(),
                    "signing key not cached; refreshing key set"
                );
                let refreshed = self
                    .inner
                    .cache
                    .refresh_after_miss(snapshot.generation())
                    .await?;
                self.inner.verifier.verify(token, refreshed.keys())
            }
            result => result,
        }
    }

    /// Extracts and verifies the token in an `Authorization` header value
    ///
    /// # Errors
    ///
    /// Returns the first extraction or verification failure.
    pub async fn authenticate(&self, header: Option<&str>) -> Result<DecodedClaims, AuthError> {
        let token = extract(header)?;
        self.verify_token(&token).await
    }

    /// Extracts and verifies the token, then checks that it grants
    /// `required`
    ///
    /// # Errors
    ///
    /// Returns the first failure encountered.
    #[tracing::instrument(skip(self, required, header), fields(permission = %required))]
    pub async fn check(
        &self,
        required: &PermissionRef,
        header: Option<&str>,
    ) -> Result<DecodedClaims, AuthError> {
        let result = self.run_checks(required, header).await;

        match &result {
            Ok(claims) => tracing::trace!(subject = %claims.subject(), "request authorized"),
            Err(err) => {
                let error: &dyn std::error::Error = err;
                tracing::debug!(kind = ?err.kind(), error, "request rejected");
            }
        }

        result
    }

    async fn run_checks(
        &self,
        required: &PermissionRef,
        header: Option<&str>,
    ) -> Result<DecodedClaims, AuthError> {
        let claims = self.authenticate(header).await?;
        permission::check(&claims, required)?;
        Ok(claims)
    }

    /// Runs `operation` with the verified claims only if the caller holds
    /// `required`
    ///
    /// The operation's output is returned unchanged. It is not started
    /// until every check has passed, and it is never started if this
    /// future is dropped before that point.
    ///
    /// # Errors
    ///
    /// Returns the first failure encountered; `operation` is not run.
    pub async fn authorize<F, Fut, T>(
        &self,
        required: &PermissionRef,
        header: Option<&str>,
        operation: F,
    ) -> Result<T, AuthError>
    where
        F: FnOnce(DecodedClaims) -> Fut,
        Fut: Future<Output = T>,
    {
        let claims = self.check(required, header).await?;
        Ok(operation(claims).await)
    }
}
