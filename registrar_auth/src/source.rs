//! Where signing keys come from

use std::{fmt, sync::Arc, time::Duration};

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use reqwest::{
    header::{self, HeaderValue},
    Client, StatusCode,
};

use crate::{error::KeySourceError, jwk::SigningKeySet};

/// The timeout applied to each key set request unless configured otherwise
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(5);

/// The shortest timeout a key set request is given
pub const MIN_FETCH_TIMEOUT: Duration = Duration::from_millis(100);

/// Supplies the trusted issuer's current signing keys
#[async_trait]
pub trait KeySource: fmt::Debug + Send + Sync {
    /// Retrieves the currently published key set
    ///
    /// # Errors
    ///
    /// * [`KeySourceError::Unavailable`] if the keys could not be retrieved
    /// * [`KeySourceError::Malformed`] if what was retrieved is not a key set
    async fn fetch_keys(&self) -> Result<SigningKeySet, KeySourceError>;
}

#[async_trait]
impl<T: KeySource + ?Sized> KeySource for Arc<T> {
    async fn fetch_keys(&self) -> Result<SigningKeySet, KeySourceError> {
        T::fetch_keys(self).await
    }
}

/// A fixed key set, for tests and for issuers whose keys are provisioned
/// out of band
#[derive(Clone, Debug, Default)]
pub struct StaticKeySource {
    keys: SigningKeySet,
}

impl StaticKeySource {
    /// Serves `keys` on every fetch
    pub fn new(keys: SigningKeySet) -> Self {
        Self { keys }
    }
}

#[async_trait]
impl KeySource for StaticKeySource {
    async fn fetch_keys(&self) -> Result<SigningKeySet, KeySourceError> {
        Ok(self.keys.clone())
    }
}

#[derive(Debug)]
struct LastResponse {
    keys: SigningKeySet,
    etag: Option<HeaderValue>,
    last_modified: Option<HeaderValue>,
}

/// Fetches a JWKS document over HTTP(S)
///
/// Each successful response's `ETag` or `Last-Modified` validator is sent
/// back on the next fetch, and a `304 Not Modified` re-serves the key set
/// from that response.
#[derive(Debug)]
pub struct RemoteKeySource {
    jwks_url: String,
    client: Client,
    last: ArcSwapOption<LastResponse>,
}

impl RemoteKeySource {
    /// Constructs a source for `jwks_url` with the default timeout
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be initialized.
    pub fn new(jwks_url: impl Into<String>) -> Result<Self, reqwest::Error> {
        Self::with_timeout(jwks_url, DEFAULT_FETCH_TIMEOUT)
    }

    /// Constructs a source for `jwks_url` that gives up on a request after
    /// `timeout`, or after [`MIN_FETCH_TIMEOUT`] if `timeout` is shorter
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be initialized.
    pub fn with_timeout(
        jwks_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .user_agent(concat!("registrar_auth/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout.max(MIN_FETCH_TIMEOUT))
            .build()?;

        Ok(Self::with_client(jwks_url, client))
    }

    /// Constructs a source for `jwks_url` using a preconfigured client
    pub fn with_client(jwks_url: impl Into<String>, client: Client) -> Self {
        Self {
            jwks_url: jwks_url.into(),
            client,
            last: ArcSwapOption::empty(),
        }
    }

    /// The endpoint keys are fetched from
    #[must_use]
    pub fn jwks_url(&self) -> &str {
        &self.jwks_url
    }
}

#[async_trait]
impl KeySource for RemoteKeySource {
    #[tracing::instrument(skip(self), fields(jwks.url = %self.jwks_url))]
    async fn fetch_keys(&self) -> Result<SigningKeySet, KeySourceError> {
        tracing::debug!("fetching JWKS");
        let mut request = self.client.get(&self.jwks_url);

        let last = self.last.load_full();
        if let Some(last) = &last {
            if let Some(etag) = &last.etag {
                request = request.header(header::IF_NONE_MATCH, etag);
            } else if let Some(last_modified) = &last.last_modified {
                request = request.header(header::IF_MODIFIED_SINCE, last_modified);
            }
        }

        let response = request.send().await.map_err(|err| {
            let error: &dyn std::error::Error = &err;
            tracing::warn!(error, "JWKS fetch failed; endpoint unreachable");
            KeySourceError::unavailable(err)
        })?;

        let status = response.status();
        if status == StatusCode::NOT_MODIFIED {
            if let Some(last) = last {
                tracing::debug!("JWKS not modified");
                return Ok(last.keys.clone());
            }
        }

        if !status.is_success() {
            tracing::warn!(
                http.status_code = status.as_u16(),
                "JWKS fetch failed; unexpected response status",
            );
            return Err(KeySourceError::unavailable(format!(
                "unexpected response status: {status}"
            )));
        }

        let etag = response.headers().get(header::ETAG).map(ToOwned::to_owned);
        let last_modified = response
            .headers()
            .get(header::LAST_MODIFIED)
            .map(ToOwned::to_owned);

        let body = response.bytes().await.map_err(|err| {
            let error: &dyn std::error::Error = &err;
            tracing::warn!(error, "JWKS fetch failed; body interrupted");
            KeySourceError::unavailable(err)
        })?;

        let keys = SigningKeySet::from_json_slice(&body).map_err(|err| {
            let error: &dyn std::error::Error = &err;
            tracing::warn!(error, "JWKS fetch failed; body is not a key set");
            KeySourceError::malformed(err)
        })?;

        self.last.store(Some(Arc::new(LastResponse {
            keys: keys.clone(),
            etag,
            last_modified,
        })));

        Ok(keys)
    }
}
