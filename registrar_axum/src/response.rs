//! `WWW-Authenticate` challenges for rejected requests ([RFC 6750 §3][])
//!
//! [RFC 6750 §3]: https://datatracker.ietf.org/doc/html/rfc6750#section-3

use http::HeaderValue;
use registrar_auth::{AuthError, AuthFailureKind};

/// The challenge to send with a rejection, if any
///
/// Server-side failures carry no challenge; the caller's token was never
/// judged.
pub(crate) fn challenge_for(error: &AuthError) -> Option<HeaderValue> {
    let kind = error.kind();
    match kind {
        AuthFailureKind::PermissionDenied => {
            let scope = match error {
                AuthError::PermissionDenied { required } => Some(required.as_str()),
                _ => None,
            };
            Some(insufficient_scope(kind.description(), scope))
        }
        AuthFailureKind::PermissionsClaimMissing => Some(challenge(
            "invalid_request",
            kind.description(),
            None,
        )),
        AuthFailureKind::KeySourceUnavailable | AuthFailureKind::MalformedKeySet => None,
        _ => Some(invalid_token(kind.description())),
    }
}

/// `Bearer error="invalid_token" error_description="{description}"`
///
/// `error_description` is omitted if `description` is empty.
pub fn invalid_token(description: &str) -> HeaderValue {
    challenge("invalid_token", description, None)
}

/// `Bearer error="insufficient_scope" error_description="{description}" scope="{scope}"`
///
/// `error_description` is omitted if `description` is empty, and `scope` if
/// it is not given.
pub fn insufficient_scope(description: &str, scope: Option<&str>) -> HeaderValue {
    challenge("insufficient_scope", description, scope)
}

fn challenge(error: &'static str, description: &str, scope: Option<&str>) -> HeaderValue {
    use std::fmt::Write;

    let mut value = format!(r#"Bearer error="{error}""#);
    if !description.is_empty() {
        let _ = write!(
            value,
            r#" error_description="{}""#,
            description.escape_default()
        );
    }
    if let Some(scope) = scope {
        let _ = write!(value, r#" scope="{}""#, scope.escape_default());
    }

    // `escape_default` leaves only printable ASCII, which is always a valid
    // header value.
    HeaderValue::try_from(value).unwrap_or_else(|_| HeaderValue::from_static("Bearer"))
}
