//! Axum extractors that admit a request only when its bearer token grants a
//! required permission.
//!
//! Guards are declared with [`permission_guard!`] or [`permission_guards!`].
//! Each guard type is an extractor: a handler that takes one as an argument
//! runs only after the [`AuthorizationGuard`][registrar_auth::AuthorizationGuard]
//! in the router state has verified the token and found the permission.
//! Otherwise the request is answered with an [`AuthRejection`].
//!
//! ```no_run
//! use axum::{extract::FromRef, routing::get, Router};
//! use registrar_auth::{AuthConfig, AuthorizationGuard};
//!
//! mod permission {
//!     registrar_axum::permission_guards! {
//!         pub permission ListStudents = "get:students";
//!         pub permission ListInstructors = "get:instructors";
//!     }
//! }
//!
//! #[derive(Clone)]
//! struct AppState {
//!     guard: AuthorizationGuard,
//! }
//!
//! impl FromRef<AppState> for AuthorizationGuard {
//!     fn from_ref(state: &AppState) -> Self {
//!         state.guard.clone()
//!     }
//! }
//!
//! async fn list_students(permission::ListStudents(claims): permission::ListStudents) -> String {
//!     format!("students, as seen by {}", claims.subject())
//! }
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AuthConfig::for_auth0_domain("registrar.us.auth0.com", "registrar-api");
//! let state = AppState { guard: AuthorizationGuard::from_config(&config)? };
//!
//! let router = Router::new()
//!     .route("/students", get(list_students))
//!     .with_state(state);
//!
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:8080").await?;
//! axum::serve(listener, router).await?;
//! # Ok(())
//! # }
//! ```

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

use axum_core::response::{IntoResponse, Response};
use http::{header, HeaderValue};
use registrar_auth::{AuthError, AuthFailureKind, PermissionRef};
use serde::Serialize;
use thiserror::Error;

mod macros;
pub mod response;

/// Binds a guard type to the permission it requires
pub trait RequiredPermission {
    /// The permission a token must grant to pass this guard
    fn required_permission() -> &'static PermissionRef;
}

/// A request was refused by a permission guard
#[derive(Debug, Error)]
#[error(transparent)]
pub struct AuthRejection(#[from] pub AuthError);

impl AuthRejection {
    /// The stable classification of the failure
    #[must_use]
    pub fn kind(&self) -> AuthFailureKind {
        self.0.kind()
    }
}

#[derive(Serialize)]
struct ErrorBody {
    code: &'static str,
    description: &'static str,
}

/// Answers with the failure's status, a `{"code", "description"}` JSON body
/// and, for failures attributable to the token, a `WWW-Authenticate`
/// challenge
impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        let kind = self.kind();
        let body = ErrorBody {
            code: kind.code(),
            description: kind.description(),
        };

        // A struct of two static strings always serializes.
        let json = serde_json::to_vec(&body).unwrap_or_default();
        let mut response = (
            kind.status(),
            [(
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/json"),
            )],
            json,
        )
            .into_response();

        if let Some(challenge) = response::challenge_for(&self.0) {
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, challenge);
        }

        response
    }
}

#[doc(hidden)]
pub mod __private {
    pub use async_trait::async_trait;
    pub use axum_core::extract::{FromRef, FromRequestParts};
    use http::header::AUTHORIZATION;
    pub use http::request::Parts;
    pub use registrar_auth::{AuthorizationGuard, DecodedClaims, PermissionRef};
    use registrar_auth::AuthError;

    use crate::AuthRejection;

    fn authorization(req: &Parts) -> Result<Option<&str>, AuthRejection> {
        req.headers
            .get(AUTHORIZATION)
            .map(|v| v.to_str().map_err(|_| AuthError::HeaderMalformed))
            .transpose()
            .map_err(AuthRejection)
    }

    pub async fn from_request<S>(
        req: &mut Parts,
        state: &S,
        required: &'static PermissionRef,
    ) -> Result<DecodedClaims, AuthRejection>
    where
        AuthorizationGuard: FromRef<S>,
    {
        let guard = AuthorizationGuard::from_ref(state);
        let header = authorization(req)?;
        Ok(guard.check(required, header).await?)
    }

    pub async fn authenticated<S>(req: &mut Parts, state: &S) -> Result<DecodedClaims, AuthRejection>
    where
        AuthorizationGuard: FromRef<S>,
    {
        let guard = AuthorizationGuard::from_ref(state);
        let header = authorization(req)?;
        Ok(guard.authenticate(header).await?)
    }
}
