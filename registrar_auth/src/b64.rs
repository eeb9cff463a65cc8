//! Base64url helpers for token segments and key material

use base64::{
    alphabet,
    engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig},
    DecodeError, Engine as _,
};

/// Compact JWS segments: URL-safe alphabet, padding forbidden
const SEGMENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::RequireNone),
);

/// JWK members: URL-safe alphabet, padding tolerated since some issuers emit it
const KEY_MATERIAL: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

pub(crate) fn decode_segment(segment: &str) -> Result<Vec<u8>, DecodeError> {
    SEGMENT.decode(segment)
}

#[cfg(any(test, feature = "test-issuer"))]
pub(crate) fn encode_segment(raw: impl AsRef<[u8]>) -> String {
    SEGMENT.encode(raw)
}

pub(crate) fn decode_key_material(value: &str) -> Result<Vec<u8>, DecodeError> {
    KEY_MATERIAL.decode(value)
}
