//! Published signing keys
//!
//! The identity provider publishes its public keys as a JSON Web Key Set
//! ([RFC7517][]). Only RSA keys usable with `RS256` are kept; anything else
//! in the document is skipped so that a provider publishing mixed key types
//! does not break verification.
//!
//! [RFC7517]: https://tools.ietf.org/html/rfc7517

use std::fmt;

use aliri_braid::braid;
use ring::signature::{RsaPublicKeyComponents, RSA_PKCS1_2048_8192_SHA256};
use serde::Deserialize;
use thiserror::Error;

use crate::b64;

/// The only algorithm a token may be signed with
pub const TRUSTED_ALGORITHM: &str = "RS256";

const MIN_MODULUS_BITS: usize = 2048;

/// An identifier for a published key
#[braid(serde, ref_doc = "A borrowed reference to a key identifier ([`KeyId`])")]
pub struct KeyId;

/// A key could not be used to verify `RS256` signatures
#[derive(Debug, Error)]
#[error("signing key rejected: {reason}")]
pub struct RejectedKey {
    reason: &'static str,
}

const fn rejected(reason: &'static str) -> RejectedKey {
    RejectedKey { reason }
}

/// An RSA public key able to verify `RS256` signatures
#[derive(Clone, PartialEq, Eq)]
#[must_use]
pub struct SigningKey {
    kid: KeyId,
    modulus: Vec<u8>,
    exponent: Vec<u8>,
}

impl SigningKey {
    /// Constructs a key from its identifier and big-endian modulus and
    /// public exponent
    ///
    /// # Errors
    ///
    /// Returns an error if the modulus is shorter than 2048 bits or the
    /// exponent is empty.
    pub fn from_rsa_components(
        kid: impl Into<KeyId>,
        modulus: &[u8],
        exponent: &[u8],
    ) -> Result<Self, RejectedKey> {
        let modulus = trim_leading_zeros(modulus);
        let exponent = trim_leading_zeros(exponent);

        if exponent.is_empty() {
            return Err(rejected("public exponent is empty"));
        }

        let bits = modulus
            .first()
            .map_or(0, |&msb| (modulus.len() - 1) * 8 + (8 - msb.leading_zeros() as usize));
        if bits < MIN_MODULUS_BITS {
            return Err(rejected("modulus must be at least 2048 bits"));
        }

        Ok(Self {
            kid: kid.into(),
            modulus: modulus.to_vec(),
            exponent: exponent.to_vec(),
        })
    }

    /// The key identifier
    #[must_use]
    pub fn key_id(&self) -> &KeyIdRef {
        &self.kid
    }

    /// Checks an `RS256` signature over `message`
    pub(crate) fn verify(
        &self,
        message: &[u8],
        signature: &[u8],
    ) -> Result<(), ring::error::Unspecified> {
        let components = RsaPublicKeyComponents {
            n: self.modulus.as_slice(),
            e: self.exponent.as_slice(),
        };

        components.verify(&RSA_PKCS1_2048_8192_SHA256, message, signature)
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("kid", &self.kid)
            .field("modulus_bits", &(self.modulus.len() * 8))
            .finish_non_exhaustive()
    }
}

fn trim_leading_zeros(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|&b| b != 0).unwrap_or(bytes.len());
    &bytes[start..]
}

/// The identity provider's current set of signing keys
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[must_use]
pub struct SigningKeySet {
    keys: Vec<SigningKey>,
}

impl SigningKeySet {
    /// An empty key set
    pub const fn empty() -> Self {
        Self { keys: Vec::new() }
    }

    /// Adds a key, replacing any key with the same identifier
    pub fn add_key(&mut self, key: SigningKey) {
        self.keys.retain(|k| k.kid != key.kid);
        self.keys.push(key);
    }

    /// Looks up the key with the given identifier
    #[must_use]
    pub fn get(&self, kid: &KeyIdRef) -> Option<&SigningKey> {
        self.keys.iter().find(|k| k.key_id() == kid)
    }

    /// A view of the keys in this set
    #[must_use]
    pub fn keys(&self) -> &[SigningKey] {
        &self.keys
    }

    /// The number of usable keys
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether the set holds no usable keys
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Parses a JWKS document
    ///
    /// # Errors
    ///
    /// Returns an error if the document is not a JSON object with a `keys`
    /// array. Individual unusable keys are skipped, not reported.
    pub fn from_json_slice(json: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(json)
    }
}

impl FromIterator<SigningKey> for SigningKeySet {
    fn from_iter<I: IntoIterator<Item = SigningKey>>(iter: I) -> Self {
        let mut set = Self::empty();
        for key in iter {
            set.add_key(key);
        }
        set
    }
}

impl<'de> Deserialize<'de> for SigningKeySet {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct JwksDto {
            keys: Vec<JwkDto>,
        }

        let dto = JwksDto::deserialize(deserializer)?;
        let mut set = Self::empty();

        for (index, jwk) in dto.keys.into_iter().enumerate() {
            let kid = jwk.kid.clone();
            match SigningKey::try_from(jwk) {
                Ok(key) => set.add_key(key),
                Err(err) => {
                    tracing::warn!(
                        jwks.idx = index,
                        jwk.kid = ?kid,
                        reason = err.reason,
                        "ignoring unusable JWK"
                    );
                }
            }
        }

        Ok(set)
    }
}

#[derive(Deserialize)]
struct JwkDto {
    #[serde(default)]
    kid: Option<String>,
    #[serde(default)]
    kty: Option<String>,
    #[serde(default)]
    alg: Option<String>,
    #[serde(rename = "use", default)]
    usage: Option<String>,
    #[serde(default)]
    n: Option<String>,
    #[serde(default)]
    e: Option<String>,
}

impl TryFrom<JwkDto> for SigningKey {
    type Error = RejectedKey;

    fn try_from(dto: JwkDto) -> Result<Self, Self::Error> {
        if dto.kty.as_deref() != Some("RSA") {
            return Err(rejected("key type is not RSA"));
        }

        if dto.alg.as_deref().is_some_and(|alg| alg != TRUSTED_ALGORITHM) {
            return Err(rejected("key algorithm is not RS256"));
        }

        if dto.usage.as_deref().is_some_and(|usage| usage != "sig") {
            return Err(rejected("key is not a signing key"));
        }

        let kid = dto.kid.ok_or(rejected("key has no identifier"))?;
        let n = dto.n.ok_or(rejected("modulus missing"))?;
        let e = dto.e.ok_or(rejected("exponent missing"))?;

        let modulus =
            b64::decode_key_material(&n).map_err(|_| rejected("modulus is not base64url"))?;
        let exponent =
            b64::decode_key_material(&e).map_err(|_| rejected("exponent is not base64url"))?;

        Self::from_rsa_components(kid, &modulus, &exponent)
    }
}

#[cfg(test)]
mod tests {
    use color_eyre::Result;
    use tracing_test::traced_test;

    use super::*;

    fn modulus_2048() -> Vec<u8> {
        let mut n = vec![0xc3; 256];
        n[255] = 0x01;
        n
    }

    fn encoded_modulus() -> String {
        crate::b64::encode_segment(modulus_2048())
    }

    #[test]
    fn decodes_rsa_signing_keys() -> Result<()> {
        let json = serde_json::json!({
            "keys": [
                { "kid": "one", "kty": "RSA", "alg": "RS256", "use": "sig", "n": encoded_modulus(), "e": "AQAB" },
                { "kid": "two", "kty": "RSA", "n": encoded_modulus(), "e": "AQAB" },
            ]
        });

        let set: SigningKeySet = serde_json::from_value(json)?;
        assert_eq!(set.len(), 2);
        assert!(set.get(KeyIdRef::from_str("one")).is_some());
        assert!(set.get(KeyIdRef::from_str("two")).is_some());
        assert!(set.get(KeyIdRef::from_str("three")).is_none());
        Ok(())
    }

    #[test]
    #[traced_test]
    fn skips_unusable_keys() -> Result<()> {
        let json = serde_json::json!({
            "keys": [
                { "kid": "hmac", "kty": "oct", "alg": "HS256", "k": "c2VjcmV0" },
                { "kid": "ec", "kty": "EC", "crv": "P-256", "x": "AA", "y": "AA" },
                { "kid": "enc", "kty": "RSA", "use": "enc", "n": encoded_modulus(), "e": "AQAB" },
                { "kid": "ps", "kty": "RSA", "alg": "PS256", "n": encoded_modulus(), "e": "AQAB" },
                { "kid": "short", "kty": "RSA", "n": "AQAB", "e": "AQAB" },
                { "kty": "RSA", "n": encoded_modulus(), "e": "AQAB" },
                { "kid": "good", "kty": "RSA", "n": encoded_modulus(), "e": "AQAB" },
            ]
        });

        let set: SigningKeySet = serde_json::from_value(json)?;
        assert_eq!(set.len(), 1);
        assert!(set.get(KeyIdRef::from_str("good")).is_some());
        assert!(logs_contain("ignoring unusable JWK"));
        Ok(())
    }

    #[test]
    fn rejects_documents_without_keys() {
        assert!(SigningKeySet::from_json_slice(br#"{"other": []}"#).is_err());
        assert!(SigningKeySet::from_json_slice(b"<html>").is_err());
        assert!(SigningKeySet::from_json_slice(br#"{"keys": "nope"}"#).is_err());
    }

    #[test]
    fn trims_zero_padded_modulus() -> Result<()> {
        let mut padded = vec![0];
        padded.extend(modulus_2048());

        let key = SigningKey::from_rsa_components("padded", &padded, &[0, 1, 0, 1])?;
        assert_eq!(key.modulus, modulus_2048());
        assert_eq!(key.exponent, [1, 0, 1]);
        Ok(())
    }

    #[test]
    fn later_key_with_same_id_replaces_earlier() -> Result<()> {
        let first = SigningKey::from_rsa_components("k", &modulus_2048(), &[3])?;
        let second = SigningKey::from_rsa_components("k", &modulus_2048(), &[1, 0, 1])?;

        let set: SigningKeySet = vec![first, second.clone()].into_iter().collect();
        assert_eq!(set.len(), 1);
        assert_eq!(set.get(KeyIdRef::from_str("k")), Some(&second));
        Ok(())
    }

    #[test]
    fn debug_omits_key_material() -> Result<()> {
        let key = SigningKey::from_rsa_components("k", &modulus_2048(), &[1, 0, 1])?;
        let shown = format!("{key:?}");
        assert!(shown.contains("modulus_bits: 2048"));
        assert!(!shown.contains("195"));
        Ok(())
    }
}
