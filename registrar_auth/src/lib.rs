//! Bearer token authorization for the registrar course API
//!
//! Requests carry an `RS256`-signed access token issued by a single trusted
//! identity provider. Before a protected operation runs, the
//! [`AuthorizationGuard`]:
//!
//! 1. [extracts][extract()] the token from the `Authorization` header
//! 2. [verifies][TokenVerifier] its signature against the provider's
//!    published keys, then its expiry, issuer and audience
//! 3. [checks][permission::check()] that its `permissions` claim holds the
//!    permission the operation requires
//!
//! Any failure is an [`AuthError`] whose [`kind()`][AuthError::kind()]
//! gives a stable status code, code string and description.
//!
//! The provider's keys are fetched from its JWKS endpoint by a
//! [`RemoteKeySource`] and cached in a [`KeyCache`]. A token naming a key
//! that is not cached causes one refresh before it is rejected, so rotated
//! keys are picked up without a restart.
//!
//! ```no_run
//! use registrar_auth::{AuthConfig, AuthorizationGuard, PermissionRef};
//!
//! # async fn handler(authorization: Option<&str>) -> Result<String, registrar_auth::AuthError> {
//! let config = AuthConfig::for_auth0_domain("registrar.us.auth0.com", "registrar-api");
//! let guard = AuthorizationGuard::from_config(&config).expect("HTTP client");
//!
//! let students = guard
//!     .authorize(
//!         PermissionRef::from_str("get:students"),
//!         authorization,
//!         |claims| async move { format!("students visible to {}", claims.subject()) },
//!     )
//!     .await?;
//! # Ok(students)
//! # }
//! ```
//!
//! # Feature flags
//!
//! This crate does not pick a TLS implementation for `reqwest` unless one
//! of `default-tls` (the default) or `rustls-tls` is enabled. Enabling
//! `test-issuer` exposes [`testing::TestIssuer`] for minting tokens in
//! downstream tests.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    trivial_casts,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

mod b64;
mod cache;
mod config;
mod error;
mod extract;
mod guard;
mod jwk;
mod jwt;
pub mod permission;
mod source;
pub mod time;

#[cfg(any(test, feature = "test-issuer"))]
#[cfg_attr(docsrs, doc(cfg(feature = "test-issuer")))]
pub mod testing;

pub use cache::{KeyCache, Snapshot, MIN_REFRESH_INTERVAL};
pub use config::AuthConfig;
pub use error::{AuthError, AuthFailureKind, KeySourceError, MalformedToken};
pub use extract::{extract, extract_from_headers};
pub use guard::AuthorizationGuard;
pub use jwk::{KeyId, KeyIdRef, RejectedKey, SigningKey, SigningKeySet, TRUSTED_ALGORITHM};
pub use jwt::{
    Audience, AudienceRef, Audiences, BearerToken, BearerTokenRef, DecodedClaims, Issuer,
    IssuerRef, Subject, SubjectRef, TokenVerifier,
};
pub use permission::{Permission, PermissionRef, Permissions};
pub use source::{
    KeySource, RemoteKeySource, StaticKeySource, DEFAULT_FETCH_TIMEOUT, MIN_FETCH_TIMEOUT,
};
