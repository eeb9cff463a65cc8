//! Authorization failures
//!
//! Every rejection produced by this crate is an [`AuthError`]. The error
//! keeps its underlying cause for logs, while [`AuthError::kind()`] reduces
//! it to a stable [`AuthFailureKind`] with a fixed status code, code string
//! and description that are safe to show to callers.

use std::{error::Error as StdError, sync::Arc};

use http::StatusCode;
use thiserror::Error;

type BoxError = Box<dyn StdError + Send + Sync + 'static>;
type SharedError = Arc<dyn StdError + Send + Sync + 'static>;

/// The stable classification of an authorization failure
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AuthFailureKind {
    /// No `Authorization` header was sent, or it was empty
    HeaderMissing,
    /// The `Authorization` header was not of the form `Bearer <token>`
    HeaderMalformed,
    /// The token could not be split or decoded
    TokenMalformed,
    /// The token declared an algorithm other than the trusted one
    AlgorithmNotAllowed,
    /// No published key matches the token's key ID
    SigningKeyNotFound,
    /// The signature did not verify against the published key
    SignatureInvalid,
    /// The token's `exp` claim is not in the future
    TokenExpired,
    /// The token was not issued by the trusted issuer
    IssuerMismatch,
    /// The token was not issued for this API
    AudienceMismatch,
    /// The token carries no `permissions` claim at all
    PermissionsClaimMissing,
    /// The token's permissions do not include the required one
    PermissionDenied,
    /// The signing keys could not be retrieved
    KeySourceUnavailable,
    /// The signing keys were retrieved but could not be parsed
    MalformedKeySet,
}

impl AuthFailureKind {
    /// The HTTP status a rejection of this kind should be answered with
    #[must_use]
    pub const fn status(self) -> StatusCode {
        match self {
            Self::PermissionsClaimMissing => StatusCode::BAD_REQUEST,
            Self::PermissionDenied => StatusCode::FORBIDDEN,
            Self::KeySourceUnavailable | Self::MalformedKeySet => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            _ => StatusCode::UNAUTHORIZED,
        }
    }

    /// The machine-readable code string
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::HeaderMissing => "authorization_header_missing",
            Self::HeaderMalformed
            | Self::TokenMalformed
            | Self::AlgorithmNotAllowed
            | Self::SigningKeyNotFound => "invalid_header",
            Self::SignatureInvalid => "invalid_token",
            Self::TokenExpired => "token_expired",
            Self::IssuerMismatch | Self::AudienceMismatch | Self::PermissionsClaimMissing => {
                "invalid_claims"
            }
            Self::PermissionDenied => "unauthorized",
            Self::KeySourceUnavailable | Self::MalformedKeySet => "key_source_error",
        }
    }

    /// A human-readable description that never includes request data
    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::HeaderMissing => "Authorization header is expected.",
            Self::HeaderMalformed => "Authorization header must be a bearer token.",
            Self::TokenMalformed => "Authorization malformed.",
            Self::AlgorithmNotAllowed => "Token signing algorithm is not allowed.",
            Self::SigningKeyNotFound => "Unable to find the appropriate key.",
            Self::SignatureInvalid => "Token signature is invalid.",
            Self::TokenExpired => "Token expired.",
            Self::IssuerMismatch => "Incorrect claims. Please, check the issuer.",
            Self::AudienceMismatch => "Incorrect claims. Please, check the audience.",
            Self::PermissionsClaimMissing => "Permissions not included in JWT.",
            Self::PermissionDenied => "Permission not found.",
            Self::KeySourceUnavailable => "Unable to retrieve signing keys.",
            Self::MalformedKeySet => "Signing keys could not be parsed.",
        }
    }
}

/// The token could not be taken apart into a header, payload and signature
#[derive(Debug, Error)]
#[error("malformed token: {reason}")]
pub struct MalformedToken {
    reason: &'static str,
    #[source]
    source: Option<BoxError>,
}

pub(crate) fn malformed_token(reason: &'static str) -> MalformedToken {
    MalformedToken {
        reason,
        source: None,
    }
}

pub(crate) fn malformed_token_from(
    reason: &'static str,
    source: impl Into<BoxError>,
) -> MalformedToken {
    MalformedToken {
        reason,
        source: Some(source.into()),
    }
}

/// An error retrieving the published signing keys
///
/// Clones share the underlying cause, so one failed refresh can be reported
/// to every request that was waiting on it.
#[derive(Clone, Debug, Error)]
pub enum KeySourceError {
    /// The endpoint could not be reached, timed out, or answered with a
    /// non-success status
    #[error("signing key endpoint unavailable")]
    Unavailable(#[source] SharedError),

    /// The endpoint answered, but the body was not a key set
    #[error("signing key set malformed")]
    Malformed(#[source] SharedError),
}

impl KeySourceError {
    pub(crate) fn unavailable(source: impl Into<BoxError>) -> Self {
        Self::Unavailable(Arc::from(source.into()))
    }

    pub(crate) fn malformed(source: impl Into<BoxError>) -> Self {
        Self::Malformed(Arc::from(source.into()))
    }
}

/// A request was not authorized
#[derive(Debug, Error)]
pub enum AuthError {
    /// See [`AuthFailureKind::HeaderMissing`]
    #[error("authorization header missing")]
    HeaderMissing,

    /// See [`AuthFailureKind::HeaderMalformed`]
    #[error("authorization header is not a bearer token")]
    HeaderMalformed,

    /// See [`AuthFailureKind::TokenMalformed`]
    #[error(transparent)]
    TokenMalformed(#[from] MalformedToken),

    /// See [`AuthFailureKind::AlgorithmNotAllowed`]
    #[error("algorithm '{alg}' is not allowed")]
    AlgorithmNotAllowed {
        /// The algorithm named in the token header
        alg: String,
    },

    /// See [`AuthFailureKind::SigningKeyNotFound`]
    #[error("no signing key with the requested key ID")]
    SigningKeyNotFound,

    /// See [`AuthFailureKind::SignatureInvalid`]
    #[error("signature mismatch")]
    SignatureInvalid,

    /// See [`AuthFailureKind::TokenExpired`]
    #[error("token expired")]
    TokenExpired,

    /// See [`AuthFailureKind::IssuerMismatch`]
    #[error("invalid issuer")]
    IssuerMismatch,

    /// See [`AuthFailureKind::AudienceMismatch`]
    #[error("invalid audience")]
    AudienceMismatch,

    /// See [`AuthFailureKind::PermissionsClaimMissing`]
    #[error("permissions claim missing")]
    PermissionsClaimMissing,

    /// See [`AuthFailureKind::PermissionDenied`]
    #[error("permission '{required}' not granted")]
    PermissionDenied {
        /// The permission that was required
        required: String,
    },

    /// See [`AuthFailureKind::KeySourceUnavailable`] and
    /// [`AuthFailureKind::MalformedKeySet`]
    #[error("unable to load signing keys")]
    KeySource(#[from] KeySourceError),
}

impl AuthError {
    /// The stable classification of this failure
    #[must_use]
    pub fn kind(&self) -> AuthFailureKind {
        match self {
            Self::HeaderMissing => AuthFailureKind::HeaderMissing,
            Self::HeaderMalformed => AuthFailureKind::HeaderMalformed,
            Self::TokenMalformed(_) => AuthFailureKind::TokenMalformed,
            Self::AlgorithmNotAllowed { .. } => AuthFailureKind::AlgorithmNotAllowed,
            Self::SigningKeyNotFound => AuthFailureKind::SigningKeyNotFound,
            Self::SignatureInvalid => AuthFailureKind::SignatureInvalid,
            Self::TokenExpired => AuthFailureKind::TokenExpired,
            Self::IssuerMismatch => AuthFailureKind::IssuerMismatch,
            Self::AudienceMismatch => AuthFailureKind::AudienceMismatch,
            Self::PermissionsClaimMissing => AuthFailureKind::PermissionsClaimMissing,
            Self::PermissionDenied { .. } => AuthFailureKind::PermissionDenied,
            Self::KeySource(KeySourceError::Unavailable(_)) => {
                AuthFailureKind::KeySourceUnavailable
            }
            Self::KeySource(KeySourceError::Malformed(_)) => AuthFailureKind::MalformedKeySet,
        }
    }

    /// Shorthand for `self.kind().status()`
    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.kind().status()
    }

    /// Shorthand for `self.kind().code()`
    #[must_use]
    pub fn code(&self) -> &'static str {
        self.kind().code()
    }

    /// Shorthand for `self.kind().description()`
    #[must_use]
    pub fn description(&self) -> &'static str {
        self.kind().description()
    }
}
