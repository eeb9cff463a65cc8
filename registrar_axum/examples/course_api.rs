//! A course-management API whose routes are guarded by token permissions
//!
//! ```sh
//! AUTH0_DOMAIN=registrar.us.auth0.com API_AUDIENCE=registrar-api \
//!     cargo run --example course_api
//! ```
//!
//! Every route needs a bearer token issued by the Auth0 tenant for the
//! configured audience whose `permissions` claim includes the permission
//! listed beside the route.

use std::{
    collections::BTreeMap,
    net::SocketAddr,
    sync::{Arc, RwLock},
    time::Duration,
};

use axum::{
    extract::{FromRef, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, patch, post},
    Json, Router,
};
use clap::Parser;
use registrar_auth::{AuthConfig, AuthorizationGuard};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing_subscriber::EnvFilter;

mod permission {
    registrar_axum::permission_guards! {
        pub permission ListStudents = "get:students";
        pub permission ViewStudentProfile = "get:student_profile";
        pub permission CreateStudent = "post:student_create";
        pub permission SearchStudents = "post:student_search";
        pub permission EditStudent = "patch:student_edit";
        pub permission DeleteStudent = "delete:student_id";
        pub permission DropStudentCourse = "delete:student_course";
        pub permission ListInstructors = "get:instructors";
        pub permission ViewInstructorProfile = "get:instructor_profile";
        pub permission SearchInstructors = "post:instructor_search";
    }
}

const PAGE_SIZE: usize = 10;

#[derive(Debug, Parser)]
#[command(about = "Serve the course-management API")]
struct Opts {
    /// Auth0 tenant domain that issues access tokens
    #[arg(long, env = "AUTH0_DOMAIN")]
    auth0_domain: String,

    /// Audience the tokens must be issued for
    #[arg(long, env = "API_AUDIENCE")]
    api_audience: String,

    /// Override for the JWKS endpoint
    #[arg(long, env = "JWKS_URL")]
    jwks_url: Option<String>,

    /// Address to listen on
    #[arg(long, env = "BIND_ADDRESS", default_value = "127.0.0.1:8080")]
    bind_address: SocketAddr,

    /// Seconds between background key set refreshes
    #[arg(long, env = "JWKS_REFRESH_SECS", default_value_t = 600)]
    jwks_refresh_secs: u64,
}

#[derive(Clone)]
struct AppState {
    guard: AuthorizationGuard,
    roster: Arc<RwLock<Roster>>,
}

impl FromRef<AppState> for AuthorizationGuard {
    fn from_ref(state: &AppState) -> Self {
        state.guard.clone()
    }
}

#[derive(Clone, Debug, Serialize)]
struct Student {
    id: u64,
    name: String,
    email: Option<String>,
    courses: Vec<String>,
}

#[derive(Clone, Debug, Serialize)]
struct Instructor {
    id: u64,
    name: String,
    email: Option<String>,
}

#[derive(Debug, Default)]
struct Roster {
    next_id: u64,
    students: BTreeMap<u64, Student>,
    instructors: BTreeMap<u64, Instructor>,
}

impl Roster {
    fn seeded() -> Self {
        let mut roster = Self::default();
        roster.add_student("Ada Lovelace", Some("ada@example.edu"), &["Analytical Engines"]);
        roster.add_student("Alan Turing", None, &["Computability", "Cryptanalysis"]);
        roster.add_instructor("Grace Hopper", Some("grace@example.edu"));
        roster.add_instructor("Edsger Dijkstra", None);
        roster
    }

    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn add_student(&mut self, name: &str, email: Option<&str>, courses: &[&str]) -> Student {
        let id = self.next_id();
        let student = Student {
            id,
            name: name.to_owned(),
            email: email.map(ToOwned::to_owned),
            courses: courses.iter().map(|&c| c.to_owned()).collect(),
        };
        self.students.insert(id, student.clone());
        student
    }

    fn add_instructor(&mut self, name: &str, email: Option<&str>) {
        let id = self.next_id();
        self.instructors.insert(
            id,
            Instructor {
                id,
                name: name.to_owned(),
                email: email.map(ToOwned::to_owned),
            },
        );
    }
}

#[derive(Debug)]
enum ApiError {
    NotFound,
    BadRequest,
    Unavailable,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::NotFound => (StatusCode::NOT_FOUND, "resource not found"),
            Self::BadRequest => (StatusCode::BAD_REQUEST, "bad request"),
            Self::Unavailable => (StatusCode::SERVICE_UNAVAILABLE, "roster unavailable"),
        };
        let body = json!({ "success": false, "error": status.as_u16(), "message": message });
        (status, Json(body)).into_response()
    }
}

type ApiResult = Result<Json<serde_json::Value>, ApiError>;

fn read(state: &AppState) -> Result<std::sync::RwLockReadGuard<'_, Roster>, ApiError> {
    state.roster.read().map_err(|_| ApiError::Unavailable)
}

fn write(state: &AppState) -> Result<std::sync::RwLockWriteGuard<'_, Roster>, ApiError> {
    state.roster.write().map_err(|_| ApiError::Unavailable)
}

#[derive(Debug, Deserialize)]
struct Page {
    #[serde(default = "first_page")]
    page: usize,
}

fn first_page() -> usize {
    1
}

fn paginate<T: Clone>(items: impl Iterator<Item = T>, page: usize) -> Vec<T> {
    items
        .skip(page.saturating_sub(1) * PAGE_SIZE)
        .take(PAGE_SIZE)
        .collect()
}

#[derive(Debug, Deserialize)]
struct Search {
    search_term: String,
}

#[derive(Debug, Deserialize)]
struct NewStudent {
    name: String,
    email: Option<String>,
    #[serde(default)]
    courses: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct StudentEdit {
    name: Option<String>,
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CourseDrop {
    course: String,
}

async fn list_students(
    _: permission::ListStudents,
    State(state): State<AppState>,
    Query(Page { page }): Query<Page>,
) -> ApiResult {
    let roster = read(&state)?;
    let students = paginate(roster.students.values().cloned(), page);
    if students.is_empty() {
        return Err(ApiError::NotFound);
    }
    Ok(Json(json!({ "success": true, "student_details": students })))
}

async fn student_profile(
    _: permission::ViewStudentProfile,
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> ApiResult {
    let roster = read(&state)?;
    let student = roster.students.get(&id).ok_or(ApiError::NotFound)?;
    Ok(Json(json!({ "success": true, "student_details": student })))
}

async fn create_student(
    _: permission::CreateStudent,
    State(state): State<AppState>,
    Json(new): Json<NewStudent>,
) -> ApiResult {
    if new.name.trim().is_empty() {
        return Err(ApiError::BadRequest);
    }
    let mut roster = write(&state)?;
    let courses: Vec<&str> = new.courses.iter().map(String::as_str).collect();
    let student = roster.add_student(&new.name, new.email.as_deref(), &courses);
    tracing::info!(student.id = student.id, "student created");
    Ok(Json(json!({ "success": true, "student_details": student })))
}

async fn search_students(
    _: permission::SearchStudents,
    State(state): State<AppState>,
    Json(Search { search_term }): Json<Search>,
) -> ApiResult {
    let needle = search_term.to_lowercase();
    let roster = read(&state)?;
    let found: Vec<_> = roster
        .students
        .values()
        .filter(|s| s.name.to_lowercase().contains(&needle))
        .cloned()
        .collect();
    Ok(Json(json!({ "success": true, "student_details": found })))
}

async fn edit_student(
    _: permission::EditStudent,
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Json(edit): Json<StudentEdit>,
) -> ApiResult {
    let mut roster = write(&state)?;
    let student = roster.students.get_mut(&id).ok_or(ApiError::NotFound)?;
    if let Some(name) = edit.name {
        student.name = name;
    }
    if let Some(email) = edit.email {
        student.email = Some(email);
    }
    Ok(Json(json!({ "success": true, "student_details": student })))
}

async fn delete_student(
    _: permission::DeleteStudent,
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> ApiResult {
    let mut roster = write(&state)?;
    let student = roster.students.remove(&id).ok_or(ApiError::NotFound)?;
    Ok(Json(json!({ "success": true, "student_name": student.name })))
}

async fn drop_student_course(
    _: permission::DropStudentCourse,
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Json(CourseDrop { course }): Json<CourseDrop>,
) -> ApiResult {
    let mut roster = write(&state)?;
    let student = roster.students.get_mut(&id).ok_or(ApiError::NotFound)?;
    let before = student.courses.len();
    student.courses.retain(|c| c != &course);
    if student.courses.len() == before {
        return Err(ApiError::NotFound);
    }
    Ok(Json(json!({ "success": true, "student_course": course })))
}

async fn list_instructors(
    _: permission::ListInstructors,
    State(state): State<AppState>,
    Query(Page { page }): Query<Page>,
) -> ApiResult {
    let roster = read(&state)?;
    let instructors = paginate(roster.instructors.values().cloned(), page);
    if instructors.is_empty() {
        return Err(ApiError::NotFound);
    }
    Ok(Json(json!({ "success": true, "instructor_details": instructors })))
}

async fn instructor_profile(
    _: permission::ViewInstructorProfile,
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> ApiResult {
    let roster = read(&state)?;
    let instructor = roster.instructors.get(&id).ok_or(ApiError::NotFound)?;
    Ok(Json(json!({ "success": true, "instructor_details": instructor })))
}

async fn search_instructors(
    _: permission::SearchInstructors,
    State(state): State<AppState>,
    Json(Search { search_term }): Json<Search>,
) -> ApiResult {
    let needle = search_term.to_lowercase();
    let roster = read(&state)?;
    let found: Vec<_> = roster
        .instructors
        .values()
        .filter(|i| i.name.to_lowercase().contains(&needle))
        .cloned()
        .collect();
    Ok(Json(json!({ "success": true, "instructor_details": found })))
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/students", get(list_students))
        .route("/students/search", post(search_students))
        .route("/students/:id", get(student_profile))
        .route("/students/:id/create", post(create_student))
        .route("/students/:id/edit", patch(edit_student))
        .route("/students/:id/student", delete(delete_student))
        .route("/students/:id/student_course", delete(drop_student_course))
        .route("/instructors", get(list_instructors))
        .route("/instructors/search", post(search_instructors))
        .route("/instructors/:id", get(instructor_profile))
        .with_state(state)
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let opts = Opts::parse();

    let mut config = AuthConfig::for_auth0_domain(&opts.auth0_domain, opts.api_audience)
        .with_refresh_interval(Duration::from_secs(opts.jwks_refresh_secs));
    if let Some(jwks_url) = opts.jwks_url {
        config = config.with_jwks_url(jwks_url);
    }

    let guard = AuthorizationGuard::from_config(&config)?;
    if let Err(err) = guard.key_cache().refresh().await {
        let error: &dyn std::error::Error = &err;
        tracing::warn!(error, "initial key set fetch failed; will retry on first request");
    }

    let state = AppState {
        guard,
        roster: Arc::new(RwLock::new(Roster::seeded())),
    };

    let listener = tokio::net::TcpListener::bind(opts.bind_address).await?;
    tracing::info!(address = %opts.bind_address, "serving course API");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    Ok(())
}
