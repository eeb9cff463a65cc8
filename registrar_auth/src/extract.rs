//! Pulling the bearer token out of the `Authorization` header

use http::{header::AUTHORIZATION, HeaderMap};

use crate::{error::AuthError, jwt::BearerToken};

const SCHEME: &str = "bearer";

/// Extracts the token from an `Authorization` header value
///
/// The value must be exactly two whitespace-separated parts, the scheme
/// `Bearer` (matched case-insensitively) and the token. Nothing about the
/// token itself is inspected here.
///
/// ```
/// use registrar_auth::{extract, AuthFailureKind};
///
/// let token = extract(Some("Bearer abc.def.ghi")).unwrap();
/// assert_eq!(token.as_str(), "abc.def.ghi");
///
/// let err = extract(Some("Token abc.def.ghi")).unwrap_err();
/// assert_eq!(err.kind(), AuthFailureKind::HeaderMalformed);
/// ```
///
/// # Errors
///
/// * [`AuthError::HeaderMissing`] if the value is absent or blank
/// * [`AuthError::HeaderMalformed`] if the value is not of the form
///   `Bearer <token>`
pub fn extract(header: Option<&str>) -> Result<BearerToken, AuthError> {
    let value = header.map(str::trim).unwrap_or_default();
    if value.is_empty() {
        return Err(AuthError::HeaderMissing);
    }

    let mut parts = value.split_whitespace();
    match (parts.next(), parts.next(), parts.next()) {
        (Some(scheme), Some(token), None) if scheme.eq_ignore_ascii_case(SCHEME) => {
            Ok(BearerToken::from(token))
        }
        _ => Err(AuthError::HeaderMalformed),
    }
}

/// Extracts the token from a request's headers
///
/// # Errors
///
/// As [`extract()`]. A header value that is not visible ASCII is treated as
/// malformed.
pub fn extract_from_headers(headers: &HeaderMap) -> Result<BearerToken, AuthError> {
    let value = headers
        .get(AUTHORIZATION)
        .map(|v| v.to_str().map_err(|_| AuthError::HeaderMalformed))
        .transpose()?;

    extract(value)
}

#[cfg(test)]
mod tests {
    use http::HeaderValue;

    use super::*;
    use crate::AuthFailureKind;

    fn kind(header: Option<&str>) -> AuthFailureKind {
        extract(header).expect_err("header should be rejected").kind()
    }

    #[test]
    fn absent_or_blank_header_is_missing() {
        assert_eq!(kind(None), AuthFailureKind::HeaderMissing);
        assert_eq!(kind(Some("")), AuthFailureKind::HeaderMissing);
        assert_eq!(kind(Some("   ")), AuthFailureKind::HeaderMissing);
    }

    #[test]
    fn rejects_other_shapes() {
        for header in [
            "Token abc.def.ghi",
            "Basic dXNlcjpwYXNz",
            "Bearer",
            "Bearer ",
            "abc.def.ghi",
            "Bearer abc.def.ghi extra",
            "Bearerabc.def.ghi",
        ] {
            assert_eq!(kind(Some(header)), AuthFailureKind::HeaderMalformed, "{header:?}");
        }
    }

    #[test]
    fn accepts_bearer_scheme_in_any_case() {
        for header in ["Bearer t.o.k", "bearer t.o.k", "BEARER t.o.k", " Bearer   t.o.k "] {
            let token = extract(Some(header)).unwrap();
            assert_eq!(token.as_str(), "t.o.k", "{header:?}");
        }
    }

    #[test]
    fn does_not_inspect_token() {
        let token = extract(Some("Bearer not-a-jwt")).unwrap();
        assert_eq!(token.as_str(), "not-a-jwt");
    }

    #[test]
    fn reads_authorization_from_header_map() {
        let mut headers = HeaderMap::new();
        assert_eq!(
            extract_from_headers(&headers).unwrap_err().kind(),
            AuthFailureKind::HeaderMissing
        );

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer a.b.c"));
        assert_eq!(extract_from_headers(&headers).unwrap().as_str(), "a.b.c");

        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_bytes(b"Bearer \xffa.b.c").unwrap(),
        );
        assert_eq!(
            extract_from_headers(&headers).unwrap_err().kind(),
            AuthFailureKind::HeaderMalformed
        );
    }
}
