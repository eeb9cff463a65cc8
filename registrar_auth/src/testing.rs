//! A throwaway identity provider for tests
//!
//! [`TestIssuer`] generates an RSA key pair, publishes the public half as a
//! JWKS document, and mints `RS256` tokens signed with the private half.
//! It is available to this crate's own tests and, behind the `test-issuer`
//! feature, to downstream test suites.

use std::fmt;

use openssl::{
    error::ErrorStack,
    hash::MessageDigest,
    pkey::{PKey, Private},
    rsa::Rsa,
    sign::Signer,
};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

use crate::{
    b64,
    jwk::{KeyId, KeyIdRef, RejectedKey, SigningKey, SigningKeySet, TRUSTED_ALGORITHM},
    jwt::{BearerToken, Issuer, IssuerRef},
};

/// An error while generating keys or minting tokens
#[derive(Debug, Error)]
pub enum TestIssuerError {
    /// OpenSSL failed to generate a key or sign
    #[error(transparent)]
    Crypto(#[from] ErrorStack),
    /// The generated key could not be used for verification
    #[error(transparent)]
    Key(#[from] RejectedKey),
    /// A header or claims value could not be serialized
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// An in-process token issuer holding one RSA-2048 signing key
#[derive(Clone)]
pub struct TestIssuer {
    issuer: Issuer,
    private: PKey<Private>,
    public: SigningKey,
    modulus: Vec<u8>,
    exponent: Vec<u8>,
}

impl fmt::Debug for TestIssuer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestIssuer")
            .field("issuer", &self.issuer)
            .field("kid", &self.public.key_id())
            .finish_non_exhaustive()
    }
}

impl TestIssuer {
    /// Generates a fresh key pair published under `kid`
    ///
    /// # Errors
    ///
    /// Returns an error if OpenSSL cannot generate the key.
    pub fn generate(
        kid: impl Into<KeyId>,
        issuer: impl Into<Issuer>,
    ) -> Result<Self, TestIssuerError> {
        let rsa = Rsa::generate(2048)?;
        let modulus = rsa.n().to_vec();
        let exponent = rsa.e().to_vec();
        let public = SigningKey::from_rsa_components(kid, &modulus, &exponent)?;
        let private = PKey::from_rsa(rsa)?;

        Ok(Self {
            issuer: issuer.into(),
            private,
            public,
            modulus,
            exponent,
        })
    }

    /// The identifier the key is published under
    #[must_use]
    pub fn key_id(&self) -> &KeyIdRef {
        self.public.key_id()
    }

    /// The issuer this instance stands in for
    #[must_use]
    pub fn issuer(&self) -> &IssuerRef {
        &self.issuer
    }

    /// The big-endian RSA modulus
    #[must_use]
    pub fn modulus(&self) -> &[u8] {
        &self.modulus
    }

    /// The public key
    pub fn signing_key(&self) -> SigningKey {
        self.public.clone()
    }

    /// A key set containing only the public key
    pub fn key_set(&self) -> SigningKeySet {
        std::iter::once(self.signing_key()).collect()
    }

    /// The public key as a JWK
    #[must_use]
    pub fn jwk(&self) -> serde_json::Value {
        json!({
            "kty": "RSA",
            "kid": self.key_id().as_str(),
            "use": "sig",
            "alg": TRUSTED_ALGORITHM,
            "n": b64::encode_segment(&self.modulus),
            "e": b64::encode_segment(&self.exponent),
        })
    }

    /// A JWKS document publishing the public key
    #[must_use]
    pub fn jwks(&self) -> serde_json::Value {
        json!({ "keys": [self.jwk()] })
    }

    /// Mints an `RS256` token over `claims` with a header naming this key
    ///
    /// # Errors
    ///
    /// Returns an error if the claims cannot be serialized or signing fails.
    pub fn mint(&self, claims: &impl Serialize) -> Result<BearerToken, TestIssuerError> {
        let header = json!({
            "alg": TRUSTED_ALGORITHM,
            "typ": "JWT",
            "kid": self.key_id().as_str(),
        });

        self.mint_with_header(&header, claims)
    }

    /// Mints a token with an arbitrary header, still signed `RS256` with this
    /// key regardless of what the header claims
    ///
    /// # Errors
    ///
    /// Returns an error if the header or claims cannot be serialized or
    /// signing fails.
    pub fn mint_with_header(
        &self,
        header: &impl Serialize,
        claims: &impl Serialize,
    ) -> Result<BearerToken, TestIssuerError> {
        let h_str = b64::encode_segment(serde_json::to_vec(header)?);
        let p_str = b64::encode_segment(serde_json::to_vec(claims)?);
        let message = format!("{h_str}.{p_str}");

        let mut signer = Signer::new(MessageDigest::sha256(), &self.private)?;
        signer.update(message.as_bytes())?;
        let signature = signer.sign_to_vec()?;

        Ok(BearerToken::new(format!(
            "{message}.{}",
            b64::encode_segment(signature)
        )))
    }
}
