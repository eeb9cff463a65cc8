//! Verification of RS256-signed JSON Web Tokens ([RFC7519][])
//!
//! A compact token is three base64url segments separated by `.`: a JSON
//! header, a JSON claims payload, and the signature over the first two.
//! Nothing in the header or payload may be trusted before the signature
//! has been checked against a key published by the issuer, so
//! [`TokenVerifier::verify()`] proceeds strictly in this order:
//!
//! 1. split the token and decode the header
//! 2. refuse any algorithm but `RS256`
//! 3. find the published key named by the header's `kid`
//! 4. verify the signature
//! 5. decode the claims and check expiry, issuer and audience
//!
//! [RFC7519]: https://tools.ietf.org/html/rfc7519

use std::{fmt, time::Duration};

use aliri_braid::braid;
use serde::{Deserialize, Serialize};

use crate::{
    b64,
    error::{self, AuthError},
    jwk::{KeyId, KeyIdRef, SigningKeySet, TRUSTED_ALGORITHM},
    permission::Permissions,
    time::{Clock, System, UnixTime},
};

/// An intended recipient of a token
#[braid(serde, ref_doc = "A borrowed reference to an [`Audience`]")]
pub struct Audience;

/// An issuer of tokens
#[braid(serde, ref_doc = "A borrowed reference to an [`Issuer`]")]
pub struct Issuer;

/// The principal a token was issued for
#[braid(serde, ref_doc = "A borrowed reference to a [`Subject`]")]
pub struct Subject;

/// A bearer token as presented by a caller
///
/// This type provides custom implementations of [`Display`][BearerTokenRef#impl-Display]
/// and [`Debug`][BearerTokenRef#impl-Debug] so that tokens do not end up in logs.
#[braid(
    serde,
    debug = "owned",
    display = "owned",
    ord = "omit",
    ref_doc = "\
    A borrowed reference to a [`BearerToken`]\n\
    \n\
    This type provides custom implementations of [`Display`][Self#impl-Display] and \
    [`Debug`][Self#impl-Debug] so that tokens do not end up in logs.
    "
)]
#[must_use]
pub struct BearerToken;

/// Prints `***JWT***` unless the alternate form (`{:#?}`) is requested, in
/// which case the header and payload are shown and the signature is elided.
///
/// ```
/// # use registrar_auth::BearerTokenRef;
/// let token = BearerTokenRef::from_str("eyJhbGciOiJSUzI1NiJ9.e30.c2lnbmF0dXJl");
///
/// assert_eq!(format!("{token:?}"), "***JWT***");
/// assert_eq!(format!("{token:#?}"), "\"eyJhbGciOiJSUzI1NiJ9.e30.…\"");
/// ```
impl fmt::Debug for BearerTokenRef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if f.alternate() {
            write!(f, "\"{}\"", Elided(self.as_str()))
        } else {
            f.write_str("***JWT***")
        }
    }
}

/// Prints `***JWT***` unless the alternate form (`{:#}`) is requested, in
/// which case the header and payload are shown and the signature is elided.
impl fmt::Display for BearerTokenRef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if f.alternate() {
            fmt::Display::fmt(&Elided(self.as_str()), f)
        } else {
            f.write_str("***JWT***")
        }
    }
}

struct Elided<'a>(&'a str);

impl fmt::Display for Elided<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.0.rfind('.') {
            Some(last_period) => {
                f.write_str(&self.0[..=last_period])?;
                f.write_str("…")
            }
            None => f.write_str("…"),
        }
    }
}

/// A set of zero or more [`Audience`]s
///
/// The `aud` claim may be a single string or an array of strings.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "OneOrMany<Audience>", into = "OneOrMany<Audience>")]
#[must_use]
pub struct Audiences(Vec<Audience>);

impl Audiences {
    /// An empty audience set
    #[inline]
    pub const fn empty() -> Self {
        Self(Vec::new())
    }

    /// Whether no audience is named
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether `audience` is one of the named audiences
    #[inline]
    #[must_use]
    pub fn contains(&self, audience: &AudienceRef) -> bool {
        self.0.iter().any(|a| AsRef::<AudienceRef>::as_ref(a) == audience)
    }

    /// Iterates through the audiences
    pub fn iter(&self) -> impl Iterator<Item = &AudienceRef> {
        self.0.iter().map(AsRef::<AudienceRef>::as_ref)
    }
}

impl From<OneOrMany<Audience>> for Audiences {
    #[inline]
    fn from(vals: OneOrMany<Audience>) -> Self {
        match vals {
            OneOrMany::One(x) => Self(vec![x]),
            OneOrMany::Many(v) => Self(v),
        }
    }
}

impl From<Audiences> for OneOrMany<Audience> {
    #[inline]
    fn from(mut auds: Audiences) -> Self {
        match auds.0.len() {
            1 => auds.0.pop().map_or(Self::Many(Vec::new()), Self::One),
            _ => Self::Many(auds.0),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

/// The verified payload of a token
///
/// Values of this type are only produced by [`TokenVerifier::verify()`]
/// after the signature and the expiry, issuer and audience claims have all
/// been checked. There is no other way to construct one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecodedClaims {
    issuer: Issuer,
    audiences: Audiences,
    subject: Subject,
    expires_at: UnixTime,
    permissions: Option<Permissions>,
    key_id: KeyId,
}

impl DecodedClaims {
    /// The `iss` claim
    #[must_use]
    pub fn issuer(&self) -> &IssuerRef {
        &self.issuer
    }

    /// The `aud` claim
    pub fn audiences(&self) -> &Audiences {
        &self.audiences
    }

    /// The `sub` claim
    #[must_use]
    pub fn subject(&self) -> &SubjectRef {
        &self.subject
    }

    /// The `exp` claim
    #[must_use]
    pub fn expires_at(&self) -> UnixTime {
        self.expires_at
    }

    /// The `permissions` claim, or `None` if the token had no such claim
    #[must_use]
    pub fn permissions(&self) -> Option<&Permissions> {
        self.permissions.as_ref()
    }

    /// The granted permissions, treating an absent claim as granting nothing
    pub fn permission_set(&self) -> &Permissions {
        const NONE: &Permissions = &Permissions::empty();
        self.permissions.as_ref().unwrap_or(NONE)
    }

    /// The identifier of the key that signed the token
    #[must_use]
    pub fn key_id(&self) -> &KeyIdRef {
        &self.key_id
    }
}

#[derive(Deserialize)]
struct HeaderDto {
    alg: String,
    #[serde(default)]
    kid: Option<KeyId>,
}

#[derive(Deserialize)]
struct ClaimsDto {
    #[serde(default)]
    iss: Option<Issuer>,
    #[serde(default)]
    aud: Audiences,
    sub: Subject,
    exp: UnixTime,
    #[serde(default)]
    permissions: Option<Permissions>,
}

/// A token split into its segments, with the header decoded
///
/// Only the header has been looked at; nothing here is trusted yet.
struct Decomposed<'a> {
    alg: String,
    kid: Option<KeyId>,
    message: &'a str,
    payload: &'a str,
    signature: Vec<u8>,
}

macro_rules! expect_two {
    ($iter:expr) => {{
        let mut i = $iter;
        match (i.next(), i.next(), i.next()) {
            (Some(first), Some(second), None) => Some((first, second)),
            _ => None,
        }
    }};
}

impl BearerTokenRef {
    fn decompose(&self) -> Result<Decomposed<'_>, error::MalformedToken> {
        let (s_str, message) = expect_two!(self.as_str().rsplitn(2, '.'))
            .ok_or_else(|| error::malformed_token("expected three segments"))?;
        let (payload, h_str) = expect_two!(message.rsplitn(2, '.'))
            .ok_or_else(|| error::malformed_token("expected three segments"))?;

        if h_str.is_empty() || payload.is_empty() || s_str.is_empty() || h_str.contains('.') {
            return Err(error::malformed_token("expected three segments"));
        }

        let h_raw = b64::decode_segment(h_str)
            .map_err(|e| error::malformed_token_from("header is not base64url", e))?;
        let signature = b64::decode_segment(s_str)
            .map_err(|e| error::malformed_token_from("signature is not base64url", e))?;
        let header: HeaderDto = serde_json::from_slice(&h_raw)
            .map_err(|e| error::malformed_token_from("header is not a JOSE header", e))?;

        Ok(Decomposed {
            alg: header.alg,
            kid: header.kid,
            message,
            payload,
            signature,
        })
    }
}

/// Verifies tokens issued by one trusted issuer for one audience
#[derive(Clone, Debug)]
#[must_use]
pub struct TokenVerifier {
    issuer: Issuer,
    audience: Audience,
    leeway: Duration,
}

impl TokenVerifier {
    /// Constructs a verifier that accepts tokens issued by `issuer` for
    /// `audience`
    pub fn new(issuer: impl Into<Issuer>, audience: impl Into<Audience>) -> Self {
        Self {
            issuer: issuer.into(),
            audience: audience.into(),
            leeway: Duration::ZERO,
        }
    }

    /// Tolerates clock skew by treating a token as unexpired for `leeway`
    /// after its `exp`
    pub fn with_leeway(self, leeway: Duration) -> Self {
        Self { leeway, ..self }
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

    /// Verifies `token` against the published `keys` using the system clock
    ///
    /// # Errors
    ///
    /// Returns the first failure encountered; see the module documentation
    /// for the order of checks. A [`AuthError::SigningKeyNotFound`] may be
    /// resolved by refreshing `keys` and trying again.
    pub fn verify(
        &self,
        token: &BearerTokenRef,
        keys: &SigningKeySet,
    ) -> Result<DecodedClaims, AuthError> {
        self.verify_with_clock(token, keys, &System)
    }

    /// Verifies `token` against the published `keys` at the time given by
    /// `clock`
    ///
    /// # Errors
    ///
    /// See [`verify()`][Self::verify()].
    pub fn verify_with_clock<C: Clock>(
        &self,
        token: &BearerTokenRef,
        keys: &SigningKeySet,
        clock: &C,
    ) -> Result<DecodedClaims, AuthError> {
        let decomposed = token.decompose()?;

        if decomposed.alg != TRUSTED_ALGORITHM {
            return Err(AuthError::AlgorithmNotAllowed { alg: decomposed.alg });
        }

        let kid = decomposed
            .kid
            .ok_or_else(|| error::malformed_token("header names no key"))?;

        let key = keys.get(&kid).ok_or_else(|| {
            tracing::debug!(%kid, "unable to find matching key");
            AuthError::SigningKeyNotFound
        })?;

        key.verify(decomposed.message.as_bytes(), &decomposed.signature)
            .map_err(|_| AuthError::SignatureInvalid)?;

        let p_raw = b64::decode_segment(decomposed.payload)
            .map_err(|e| error::malformed_token_from("payload is not base64url", e))?;
        let claims: ClaimsDto = serde_json::from_slice(&p_raw)
            .map_err(|e| error::malformed_token_from("payload is not a claims set", e))?;

        let now = clock.now();
        let leeway = self.leeway.as_secs();
        if claims.exp <= now.minus_secs(leeway) {
            return Err(AuthError::TokenExpired);
        }

        let issuer = claims.iss.ok_or(AuthError::IssuerMismatch)?;
        if issuer != self.issuer {
            return Err(AuthError::IssuerMismatch);
        }

        if !claims.aud.contains(&self.audience) {
            return Err(AuthError::AudienceMismatch);
        }

        Ok(DecodedClaims {
            issuer,
            audiences: claims.aud,
            subject: claims.sub,
            expires_at: claims.exp,
            permissions: claims.permissions,
            key_id: kid,
        })
    }
}
