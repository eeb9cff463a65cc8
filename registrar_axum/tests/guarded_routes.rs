use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use axum::{
    body::Body,
    extract::{FromRef, State},
    http::{header, Request, StatusCode},
    routing::{delete, get},
    Router,
};
use http_body_util::BodyExt;
use once_cell::sync::Lazy;
use registrar_auth::{
    testing::TestIssuer, AuthorizationGuard, KeyCache, KeySource, RemoteKeySource,
    StaticKeySource, TokenVerifier,
};
use serde_json::{json, Value};
use tower::ServiceExt;
use wiremock::{matchers, Mock, MockServer, ResponseTemplate};

const ISSUER: &str = "https://registrar.example.auth0.com/";
const AUDIENCE: &str = "registrar-api";

static ISSUING: Lazy<TestIssuer> =
    Lazy::new(|| TestIssuer::generate("route-key", ISSUER).expect("generate signing key"));

mod permission {
    registrar_axum::permission_guards! {
        pub permission ListStudents = "get:students";
        pub permission DeleteStudent = "delete:student_id";
    }
}

#[derive(Clone)]
struct AppState {
    guard: AuthorizationGuard,
    calls: Arc<AtomicUsize>,
}

impl FromRef<AppState> for AuthorizationGuard {
    fn from_ref(state: &AppState) -> Self {
        state.guard.clone()
    }
}

async fn list_students(
    permission::ListStudents(claims): permission::ListStudents,
    State(state): State<AppState>,
) -> String {
    state.calls.fetch_add(1, Ordering::SeqCst);
    format!("students for {}", claims.subject())
}

async fn delete_student(_: permission::DeleteStudent, State(state): State<AppState>) -> &'static str {
    state.calls.fetch_add(1, Ordering::SeqCst);
    "deleted"
}

fn app(source: Arc<dyn KeySource>) -> (Router, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let state = AppState {
        guard: AuthorizationGuard::new(TokenVerifier::new(ISSUER, AUDIENCE), source),
        calls: Arc::clone(&calls),
    };
    let router = Router::new()
        .route("/students", get(list_students))
        .route("/students/1/student", delete(delete_student))
        .with_state(state);
    (router, calls)
}

fn trusted_app() -> (Router, Arc<AtomicUsize>) {
    app(Arc::new(StaticKeySource::new(ISSUING.key_set())))
}

fn token(permissions: Option<&[&str]>) -> String {
    let exp = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs() + 600;
    let mut claims = json!({
        "iss": ISSUER,
        "aud": AUDIENCE,
        "sub": "auth0|registrar",
        "exp": exp,
    });
    if let Some(permissions) = permissions {
        claims["permissions"] = json!(permissions);
    }
    ISSUING.mint(&claims).unwrap().as_str().to_owned()
}

fn get_students(authorization: Option<String>) -> Request<Body> {
    let mut builder = Request::get("/students");
    if let Some(value) = authorization {
        builder = builder.header(header::AUTHORIZATION, value);
    }
    builder.body(Body::empty()).unwrap()
}

struct Answer {
    status: StatusCode,
    challenge: Option<String>,
    body: Vec<u8>,
}

impl Answer {
    fn json(&self) -> Value {
        serde_json::from_slice(&self.body).unwrap()
    }
}

async fn send(router: Router, request: Request<Body>) -> Answer {
    let response = router.oneshot(request).await.unwrap();
    let status = response.status();
    let challenge = response
        .headers()
        .get(header::WWW_AUTHENTICATE)
        .map(|v| v.to_str().unwrap().to_owned());
    let body = response.into_body().collect().await.unwrap().to_bytes().to_vec();
    Answer {
        status,
        challenge,
        body,
    }
}

#[tokio::test]
async fn authorized_request_reaches_handler() {
    let (router, calls) = trusted_app();
    let bearer = format!("Bearer {}", token(Some(&["get:students"])));

    let answer = send(router, get_students(Some(bearer))).await;

    assert_eq!(answer.status, StatusCode::OK);
    assert_eq!(answer.body, b"students for auth0|registrar");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn missing_header_is_rejected_before_handler() {
    let (router, calls) = trusted_app();

    let answer = send(router, get_students(None)).await;

    assert_eq!(answer.status, StatusCode::UNAUTHORIZED);
    assert_eq!(
        answer.json(),
        json!({
            "code": "authorization_header_missing",
            "description": "Authorization header is expected.",
        })
    );
    assert!(answer.challenge.unwrap().contains("invalid_token"));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn wrong_scheme_is_invalid_header() {
    let (router, calls) = trusted_app();

    let answer = send(router, get_students(Some("Token abc.def.ghi".into()))).await;

    assert_eq!(answer.status, StatusCode::UNAUTHORIZED);
    assert_eq!(answer.json()["code"], "invalid_header");
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn other_permission_is_forbidden() {
    let (router, calls) = trusted_app();
    let bearer = format!("Bearer {}", token(Some(&["get:instructors"])));

    let answer = send(router, get_students(Some(bearer))).await;

    assert_eq!(answer.status, StatusCode::FORBIDDEN);
    assert_eq!(
        answer.json(),
        json!({ "code": "unauthorized", "description": "Permission not found." })
    );
    assert!(answer
        .challenge
        .unwrap()
        .contains(r#"error="insufficient_scope""#));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn absent_permissions_claim_is_bad_request() {
    let (router, calls) = trusted_app();
    let bearer = format!("Bearer {}", token(None));

    let answer = send(router, get_students(Some(bearer))).await;

    assert_eq!(answer.status, StatusCode::BAD_REQUEST);
    assert_eq!(
        answer.json(),
        json!({
            "code": "invalid_claims",
            "description": "Permissions not included in JWT.",
        })
    );
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn each_route_requires_its_own_permission() {
    let (router, calls) = trusted_app();
    let bearer = format!("Bearer {}", token(Some(&["get:students"])));
    let request = Request::delete("/students/1/student")
        .header(header::AUTHORIZATION, bearer)
        .body(Body::empty())
        .unwrap();

    let answer = send(router, request).await;

    assert_eq!(answer.status, StatusCode::FORBIDDEN);
    assert!(answer
        .challenge
        .unwrap()
        .ends_with(r#"scope="delete:student_id""#));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn unreachable_key_source_is_server_error() {
    let server = MockServer::start().await;
    Mock::given(matchers::method("GET"))
        .and(matchers::path("/.well-known/jwks.json"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(ISSUING.jwks())
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let source = RemoteKeySource::with_timeout(
        format!("{}/.well-known/jwks.json", server.uri()),
        Duration::from_millis(100),
    )
    .unwrap();
    let (router, calls) = app(Arc::new(source));
    let bearer = format!("Bearer {}", token(Some(&["get:students"])));

    let answer = send(router, get_students(Some(bearer))).await;

    assert_eq!(answer.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(answer.json()["code"], "key_source_error");
    assert_eq!(answer.challenge, None);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn remote_keys_are_fetched_on_first_request() {
    let server = MockServer::start().await;
    Mock::given(matchers::method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(ISSUING.jwks()))
        .expect(1)
        .mount(&server)
        .await;

    let source = RemoteKeySource::new(format!("{}/jwks", server.uri())).unwrap();
    let cache = Arc::new(KeyCache::new(Arc::new(source)));
    let calls = Arc::new(AtomicUsize::new(0));
    let state = AppState {
        guard: AuthorizationGuard::with_cache(TokenVerifier::new(ISSUER, AUDIENCE), cache),
        calls: Arc::clone(&calls),
    };
    let router = Router::new()
        .route("/students", get(list_students))
        .with_state(state);

    for _ in 0..2 {
        let bearer = format!("Bearer {}", token(Some(&["get:students"])));
        let answer = send(router.clone(), get_students(Some(bearer))).await;
        assert_eq!(answer.status, StatusCode::OK);
    }

    assert_eq!(calls.load(Ordering::SeqCst), 2);
}
