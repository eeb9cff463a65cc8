//! Settings for the authorization guard

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{
    cache::MIN_REFRESH_INTERVAL,
    jwt::{Audience, AudienceRef, Issuer, IssuerRef, TokenVerifier},
    source::{DEFAULT_FETCH_TIMEOUT, MIN_FETCH_TIMEOUT},
};

const WELL_KNOWN_JWKS: &str = ".well-known/jwks.json";

/// Who to trust and where to find their keys
///
/// Durations are given in whole seconds when deserialized. A fetch timeout
/// or refresh interval below its minimum is raised to that minimum.
///
/// ```
/// use registrar_auth::AuthConfig;
///
/// let config: AuthConfig = serde_json::from_str(r#"{
///     "issuer": "https://registrar.example.auth0.com/",
///     "audience": "registrar-api",
///     "refresh_interval": 3600
/// }"#).unwrap();
///
/// assert_eq!(config.jwks_url(), "https://registrar.example.auth0.com/.well-known/jwks.json");
/// assert_eq!(config.fetch_timeout().as_secs(), 5);
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[must_use]
pub struct AuthConfig {
    issuer: Issuer,
    audience: Audience,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    jwks_url: Option<String>,
    #[serde(default = "default_fetch_timeout", with = "secs")]
    fetch_timeout: Duration,
    #[serde(default, with = "secs")]
    leeway: Duration,
    #[serde(default, with = "opt_secs", skip_serializing_if = "Option::is_none")]
    refresh_interval: Option<Duration>,
}

fn default_fetch_timeout() -> Duration {
    DEFAULT_FETCH_TIMEOUT
}

mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}

mod opt_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_some(&d.as_secs()),
            None => s.serialize_none(),
        }
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(
        d: D,
    ) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_secs))
    }
}

impl AuthConfig {
    /// Trusts `issuer` for tokens addressed to `audience`
    pub fn new(issuer: impl Into<Issuer>, audience: impl Into<Audience>) -> Self {
        Self {
            issuer: issuer.into(),
            audience: audience.into(),
            jwks_url: None,
            fetch_timeout: default_fetch_timeout(),
            leeway: Duration::ZERO,
            refresh_interval: None,
        }
    }

    /// Trusts an Auth0 tenant, whose issuer is `https://<domain>/`
    pub fn for_auth0_domain(domain: &str, audience: impl Into<Audience>) -> Self {
        let domain = domain
            .trim_start_matches("https://")
            .trim_end_matches('/');
        Self::new(format!("https://{domain}/"), audience)
    }

    /// Fetches keys from `url` instead of the issuer's well-known location
    pub fn with_jwks_url(self, url: impl Into<String>) -> Self {
        Self {
            jwks_url: Some(url.into()),
            ..self
        }
    }

    /// Bounds each key set request by `timeout`
    pub fn with_fetch_timeout(self, timeout: Duration) -> Self {
        Self {
            fetch_timeout: timeout,
            ..self
        }
    }

    /// Accepts tokens up to `leeway` past their expiry
    pub fn with_leeway(self, leeway: Duration) -> Self {
        Self {
            leeway,
            ..self
        }
    }

    /// Refreshes the key set in the background every `interval`
    pub fn with_refresh_interval(self, interval: Duration) -> Self {
        Self {
            refresh_interval: Some(interval),
            ..self
        }
    }

    /// The trusted issuer
    #[must_use]
    pub fn issuer(&self) -> &IssuerRef {
        &self.issuer
    }

    /// The expected audience
    #[must_use]
    pub fn audience(&self) -> &AudienceRef {
        &self.audience
    }

    /// The JWKS endpoint, defaulting to `<issuer>/.well-known/jwks.json`
    #[must_use]
    pub fn jwks_url(&self) -> String {
        match &self.jwks_url {
            Some(url) => url.clone(),
            None => {
                let base = self.issuer.as_str().trim_end_matches('/');
                format!("{base}/{WELL_KNOWN_JWKS}")
            }
        }
    }

    /// The bound on each key set request, at least [`MIN_FETCH_TIMEOUT`]
    #[must_use]
    pub fn fetch_timeout(&self) -> Duration {
        self.fetch_timeout.max(MIN_FETCH_TIMEOUT)
    }

    /// The tolerated clock skew when checking expiry
    #[must_use]
    pub fn leeway(&self) -> Duration {
        self.leeway
    }

    /// The background refresh period, if any, at least
    /// [`MIN_REFRESH_INTERVAL`]
    #[must_use]
    pub fn refresh_interval(&self) -> Option<Duration> {
        self.refresh_interval
            .map(|interval| interval.max(MIN_REFRESH_INTERVAL))
    }

    /// A verifier for this issuer and audience
    pub fn verifier(&self) -> TokenVerifier {
        TokenVerifier::new(self.issuer.clone(), self.audience.clone()).with_leeway(self.leeway())
    }
}

#[cfg(test)]
mod tests {
    use color_eyre::Result;

    use super::*;

    #[test]
    fn auth0_domain_becomes_issuer() {
        for domain in [
            "registrar.us.auth0.com",
            "registrar.us.auth0.com/",
            "https://registrar.us.auth0.com/",
        ] {
            let config = AuthConfig::for_auth0_domain(domain, "registrar-api");
            assert_eq!(config.issuer().as_str(), "https://registrar.us.auth0.com/");
            assert_eq!(
                config.jwks_url(),
                "https://registrar.us.auth0.com/.well-known/jwks.json"
            );
        }
    }

    #[test]
    fn explicit_jwks_url_wins() {
        let config = AuthConfig::new("https://issuer.example", "api")
            .with_jwks_url("http://127.0.0.1:8080/keys");
        assert_eq!(config.jwks_url(), "http://127.0.0.1:8080/keys");
    }

    #[test]
    fn issuer_without_trailing_slash_joins_cleanly() {
        let config = AuthConfig::new("https://issuer.example", "api");
        assert_eq!(config.jwks_url(), "https://issuer.example/.well-known/jwks.json");
    }

    #[test]
    fn deserializes_with_defaults() -> Result<()> {
        let config: AuthConfig = serde_json::from_value(serde_json::json!({
            "issuer": "https://issuer.example/",
            "audience": "api",
        }))?;

        assert_eq!(config.fetch_timeout(), Duration::from_secs(5));
        assert_eq!(config.leeway(), Duration::ZERO);
        assert_eq!(config.refresh_interval(), None);
        assert_eq!(config, AuthConfig::new("https://issuer.example/", "api"));
        Ok(())
    }

    #[test]
    fn deserializes_overrides() -> Result<()> {
        let config: AuthConfig = serde_json::from_value(serde_json::json!({
            "issuer": "https://issuer.example/",
            "audience": "api",
            "jwks_url": "https://keys.example/jwks",
            "fetch_timeout": 2,
            "leeway": 30,
            "refresh_interval": 600,
        }))?;

        assert_eq!(config.jwks_url(), "https://keys.example/jwks");
        assert_eq!(config.fetch_timeout(), Duration::from_secs(2));
        assert_eq!(config.leeway(), Duration::from_secs(30));
        assert_eq!(config.refresh_interval(), Some(Duration::from_secs(600)));
        assert_eq!(config.verifier().audience().as_str(), "api");
        Ok(())
    }

    #[test]
    fn sub_second_durations_are_kept() {
        let config = AuthConfig::new("https://issuer.example/", "api")
            .with_fetch_timeout(Duration::from_millis(500))
            .with_leeway(Duration::from_millis(1500))
            .with_refresh_interval(Duration::from_millis(2500));

        assert_eq!(config.fetch_timeout(), Duration::from_millis(500));
        assert_eq!(config.leeway(), Duration::from_millis(1500));
        assert_eq!(config.refresh_interval(), Some(Duration::from_millis(2500)));
    }

    #[test]
    fn zero_durations_are_raised_to_minimums() -> Result<()> {
        let built = AuthConfig::new("https://issuer.example/", "api")
            .with_fetch_timeout(Duration::ZERO)
            .with_refresh_interval(Duration::ZERO);
        let parsed: AuthConfig = serde_json::from_value(serde_json::json!({
            "issuer": "https://issuer.example/",
            "audience": "api",
            "fetch_timeout": 0,
            "refresh_interval": 0,
        }))?;

        for config in [built, parsed] {
            assert_eq!(config.fetch_timeout(), MIN_FETCH_TIMEOUT);
            assert_eq!(config.refresh_interval(), Some(MIN_REFRESH_INTERVAL));
        }
        Ok(())
    }

    #[test]
    fn serializes_whole_seconds() -> Result<()> {
        let config = AuthConfig::new("https://issuer.example/", "api")
            .with_fetch_timeout(Duration::from_secs(3))
            .with_refresh_interval(Duration::from_secs(60));

        let value = serde_json::to_value(&config)?;
        assert_eq!(value["fetch_timeout"], 3);
        assert_eq!(value["leeway"], 0);
        assert_eq!(value["refresh_interval"], 60);
        assert_eq!(serde_json::from_value::<AuthConfig>(value)?, config);
        Ok(())
    }
}
