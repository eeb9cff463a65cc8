//! Declaring extractors that require a permission

/// Constructs an extractor that admits a request only if its token grants a
/// permission.
///
/// For a more concise way to construct several guards, see
/// [`permission_guards!`][crate::permission_guards!].
///
/// ```
/// use registrar_axum::permission_guard;
///
/// permission_guard!(pub ViewStudentProfile; "get:student_profile");
/// ```
///
/// Permissions are matched exactly. A guard declared with `*` requires only
/// a valid token:
///
/// ```
/// use registrar_axum::permission_guard;
///
/// permission_guard!(SignedIn; *);
/// ```
///
/// The extractor reads the shared
/// [`AuthorizationGuard`][registrar_auth::AuthorizationGuard] from router
/// state, so the state type must implement `FromRef` for it. The verified
/// claims are available from the extractor.
///
/// ```
/// use axum::{extract::FromRef, routing::get, Router};
/// use registrar_auth::AuthorizationGuard;
/// use registrar_axum::permission_guard;
///
/// permission_guard!(ListInstructors; "get:instructors");
///
/// async fn list_instructors(ListInstructors(claims): ListInstructors) -> String {
///     format!("instructors, as seen by {}", claims.subject())
/// }
///
/// fn routes(guard: AuthorizationGuard) -> Router {
///     Router::new()
///         .route("/instructors", get(list_instructors))
///         .with_state(guard)
/// }
/// ```
#[macro_export]
macro_rules! permission_guard {
    ($vis:vis $i:ident; *) => {
        /// Admits any request carrying a valid token, extracting its claims
        #[derive(Debug)]
        $vis struct $i($vis $crate::__private::DecodedClaims);

        impl $i {
            #[allow(dead_code)]
            $vis fn into_claims(self) -> $crate::__private::DecodedClaims {
                self.0
            }

            #[allow(dead_code)]
            $vis fn claims(&self) -> &$crate::__private::DecodedClaims {
                &self.0
            }
        }

        #[$crate::__private::async_trait]
        impl<S> $crate::__private::FromRequestParts<S> for $i
        where
            $crate::__private::AuthorizationGuard: $crate::__private::FromRef<S>,
            S: Send + Sync,
        {
            type Rejection = $crate::AuthRejection;

            async fn from_request_parts(
                req: &mut $crate::__private::Parts,
                state: &S,
            ) -> Result<Self, Self::Rejection> {
                $crate::__private::authenticated(req, state).await.map(Self)
            }
        }
    };
    ($vis:vis $i:ident; $permission:literal) => {
        /// Admits a request only if its token grants
        #[doc = concat!("`", $permission, "`")]
        #[derive(Debug)]
        $vis struct $i($vis $crate::__private::DecodedClaims);

        impl $i {
            #[allow(dead_code)]
            $vis fn into_claims(self) -> $crate::__private::DecodedClaims {
                self.0
            }

            #[allow(dead_code)]
            $vis fn claims(&self) -> &$crate::__private::DecodedClaims {
                &self.0
            }
        }

        impl $crate::RequiredPermission for $i {
            fn required_permission() -> &'static $crate::__private::PermissionRef {
                $crate::__private::PermissionRef::from_str($permission)
            }
        }

        #[$crate::__private::async_trait]
        impl<S> $crate::__private::FromRequestParts<S> for $i
        where
            $crate::__private::AuthorizationGuard: $crate::__private::FromRef<S>,
            S: Send + Sync,
        {
            type Rejection = $crate::AuthRejection;

            async fn from_request_parts(
                req: &mut $crate::__private::Parts,
                state: &S,
            ) -> Result<Self, Self::Rejection> {
                $crate::__private::from_request(
                    req,
                    state,
                    <Self as $crate::RequiredPermission>::required_permission(),
                )
                .await
                .map(Self)
            }
        }
    };
}

/// Convenience macro for services that guard many routes
///
/// ```
/// use registrar_axum::permission_guards;
///
/// permission_guards! {
///     pub permission ListStudents = "get:students";
///     pub permission ViewStudentProfile = "get:student_profile";
///     pub permission CreateStudent = "post:student_create";
///     permission SignedIn = *;
/// }
/// ```
///
/// Each line defines a guard type as [`permission_guard!`] would.
#[macro_export]
macro_rules! permission_guards {
    ($($vis:vis permission $i:ident = $permission:tt);* $(;)?) => {
        $(
            $crate::permission_guard!($vis $i; $permission);
        )*
    };
}

#[cfg(test)]
mod tests {
    use std::time::{SystemTime, UNIX_EPOCH};

    use axum_core::extract::{FromRef, FromRequestParts};
    use http::{header::AUTHORIZATION, request::Parts, Request};
    use once_cell::sync::Lazy;
    use registrar_auth::{
        testing::TestIssuer, AuthFailureKind, AuthorizationGuard, KeyCache, StaticKeySource,
        TokenVerifier,
    };
    use serde_json::json;
    use std::sync::Arc;

    use crate::RequiredPermission;

    const ISSUER: &str = "https://registrar.example.auth0.com/";
    const AUDIENCE: &str = "registrar-api";

    static ISSUING: Lazy<TestIssuer> =
        Lazy::new(|| TestIssuer::generate("k1", ISSUER).expect("generate signing key"));

    permission_guard!(ListStudents; "get:students");

    permission_guards! {
        permission EditStudent = "patch:student_edit";
        permission SignedIn = *;
    }

    #[derive(Clone)]
    struct State {
        guard: AuthorizationGuard,
    }

    impl FromRef<State> for AuthorizationGuard {
        fn from_ref(state: &State) -> Self {
            state.guard.clone()
        }
    }

    fn state() -> State {
        let keys = ISSUING.key_set();
        let cache = KeyCache::with_keys(Arc::new(StaticKeySource::new(keys.clone())), keys);
        State {
            guard: AuthorizationGuard::with_cache(
                TokenVerifier::new(ISSUER, AUDIENCE),
                Arc::new(cache),
            ),
        }
    }

    fn request_with(permissions: &[&str]) -> Parts {
        let exp = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs() + 600;
        let token = ISSUING
            .mint(&json!({
                "iss": ISSUER,
                "aud": AUDIENCE,
                "sub": "auth0|dean",
                "exp": exp,
                "permissions": permissions,
            }))
            .unwrap();

        Request::builder()
            .header(AUTHORIZATION, format!("Bearer {}", token.as_str()))
            .body(())
            .unwrap()
            .into_parts()
            .0
    }

    #[test]
    fn guard_reports_its_permission() {
        assert_eq!(ListStudents::required_permission().as_str(), "get:students");
        assert_eq!(EditStudent::required_permission().as_str(), "patch:student_edit");
    }

    #[tokio::test]
    async fn admits_token_with_permission() {
        let mut parts = request_with(&["get:students"]);
        let guard = ListStudents::from_request_parts(&mut parts, &state())
            .await
            .unwrap();
        assert_eq!(guard.claims().subject().as_str(), "auth0|dean");
    }

    #[tokio::test]
    async fn refuses_token_without_permission() {
        let mut parts = request_with(&["get:students"]);
        let err = EditStudent::from_request_parts(&mut parts, &state())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), AuthFailureKind::PermissionDenied);
    }

    #[tokio::test]
    async fn refuses_request_without_header() {
        let mut parts = Request::new(()).into_parts().0;
        let err = SignedIn::from_request_parts(&mut parts, &state())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), AuthFailureKind::HeaderMissing);
    }

    #[tokio::test]
    async fn signed_in_needs_no_permission() {
        let mut parts = request_with(&[]);
        let guard = SignedIn::from_request_parts(&mut parts, &state())
            .await
            .unwrap();
        assert!(guard.into_claims().permission_set().is_empty());
    }
}
