//! api-server — HTTP API for the Carebase administration workspace.
//!
//! Provides auth, organization, contact, and demand endpoints and supports
//! local dev with:
//! - Auth: session tokens issued at /api/auth/login or disabled (debug) mode
//!   via X-Debug-User.
//! - Storage: In-memory (default) or SQLite (file) when the `sqlite` feature
//!   is enabled.
//! - CORS: Configurable via CORS_ALLOW_ORIGIN (origin string) for the admin
//!   frontend.
//!
//! Run:
//! ```bash
//! # pretty logs (default); PORT optional
//! cargo run -p api-server
//!
//! # with token auth and SQLite storage
//! AUTH_PROVIDER=token AUTH_SECRET=change-me-please-now \
//! STORAGE_PROVIDER=sqlite DB_PATH=./data/carebase.db \
//!   cargo run -p api-server
//! ```
//!
//! Configuration: See `config.rs` for all environment variables.
//!

mod config;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::http::HeaderValue;
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use domain::adapters::memory_repo::{
    InMemoryContactRepo, InMemoryDemandRepo, InMemoryOrganizationRepo, InMemoryUserRepo,
};
use domain::{
    Clock, Contact, ContactPatch, ContactRepository, CoreError, Demand, DemandPatch,
    DemandPriority, DemandRepository, DemandStatus, Email, EntityId, IdGenerator, ListOptions,
    ListResult, Organization, OrganizationPatch, OrganizationRepository, User, UserRepository,
    UserRole,
};
use serde::{Deserialize, Serialize};
use session_auth::VerifiedUser;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Session token lifetime.
const TOKEN_TTL: Duration = Duration::from_secs(12 * 60 * 60);

// In-memory repositories bundled together, one store per entity type.
struct MemoryRepos {
    orgs: InMemoryOrganizationRepo,
    contacts: InMemoryContactRepo,
    demands: InMemoryDemandRepo,
    users: InMemoryUserRepo,
}

impl MemoryRepos {
    fn new() -> Self {
        Self {
            orgs: InMemoryOrganizationRepo::new(),
            contacts: InMemoryContactRepo::new(),
            demands: InMemoryDemandRepo::new(),
            users: InMemoryUserRepo::new(),
        }
    }
}

// Local repo abstraction supporting memory or sqlite (feature-gated).
enum RepoKind {
    Memory(MemoryRepos),
    #[cfg(feature = "sqlite")]
    Sqlite(sqlite_adapter::SqliteRepo),
}

#[derive(Clone)]
struct AnyRepo {
    kind: Arc<RepoKind>,
}

#[allow(dead_code)]
impl AnyRepo {
    fn memory() -> Self {
        Self {
            kind: Arc::new(RepoKind::Memory(MemoryRepos::new())),
        }
    }

    #[cfg(feature = "sqlite")]
    fn sqlite_from_env() -> Result<Self, CoreError> {
        Ok(Self {
            kind: Arc::new(RepoKind::Sqlite(sqlite_adapter::SqliteRepo::from_env()?)),
        })
    }

    fn create_organization(&self, org: Organization) -> Result<(), CoreError> {
        match &*self.kind {
            RepoKind::Memory(m) => m.orgs.create(org),
            #[cfg(feature = "sqlite")]
            RepoKind::Sqlite(r) => OrganizationRepository::create(r, org),
        }
    }

    fn get_organization(&self, id: &EntityId) -> Result<Option<Organization>, CoreError> {
        match &*self.kind {
            RepoKind::Memory(m) => m.orgs.get(id),
            #[cfg(feature = "sqlite")]
            RepoKind::Sqlite(r) => OrganizationRepository::get(r, id),
        }
    }

    fn list_organizations(&self, limit: usize) -> Result<Vec<Organization>, CoreError> {
        match &*self.kind {
            RepoKind::Memory(m) => m.orgs.list(limit),
            #[cfg(feature = "sqlite")]
            RepoKind::Sqlite(r) => OrganizationRepository::list(r, limit),
        }
    }

    fn search_organizations(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<Organization>, CoreError> {
        match &*self.kind {
            RepoKind::Memory(m) => m.orgs.search(query, limit),
            #[cfg(feature = "sqlite")]
            RepoKind::Sqlite(r) => r.search(query, limit),
        }
    }

    fn update_organization(
        &self,
        id: &EntityId,
        patch: OrganizationPatch,
    ) -> Result<Organization, CoreError> {
        match &*self.kind {
            RepoKind::Memory(m) => m.orgs.update(id, patch),
            #[cfg(feature = "sqlite")]
            RepoKind::Sqlite(r) => OrganizationRepository::update(r, id, patch),
        }
    }

    fn delete_organization(&self, id: &EntityId) -> Result<(), CoreError> {
        match &*self.kind {
            RepoKind::Memory(m) => m.orgs.delete(id),
            #[cfg(feature = "sqlite")]
            RepoKind::Sqlite(r) => OrganizationRepository::delete(r, id),
        }
    }

    fn create_contact(&self, contact: Contact) -> Result<(), CoreError> {
        match &*self.kind {
            RepoKind::Memory(m) => m.contacts.create(contact),
            #[cfg(feature = "sqlite")]
            RepoKind::Sqlite(r) => ContactRepository::create(r, contact),
        }
    }

    fn list_contacts(&self, limit: usize) -> Result<Vec<Contact>, CoreError> {
        match &*self.kind {
            RepoKind::Memory(m) => m.contacts.list(limit),
            #[cfg(feature = "sqlite")]
            RepoKind::Sqlite(r) => ContactRepository::list(r, limit),
        }
    }

    fn list_contacts_by_organization(
        &self,
        organization_id: &EntityId,
        limit: usize,
    ) -> Result<Vec<Contact>, CoreError> {
        match &*self.kind {
            RepoKind::Memory(m) => m.contacts.list_by_organization(organization_id, limit),
            #[cfg(feature = "sqlite")]
            RepoKind::Sqlite(r) => r.list_by_organization(organization_id, limit),
        }
    }

    fn update_contact(&self, id: &EntityId, patch: ContactPatch) -> Result<Contact, CoreError> {
        match &*self.kind {
            RepoKind::Memory(m) => m.contacts.update(id, patch),
            #[cfg(feature = "sqlite")]
            RepoKind::Sqlite(r) => ContactRepository::update(r, id, patch),
        }
    }

    fn delete_contact(&self, id: &EntityId) -> Result<(), CoreError> {
        match &*self.kind {
            RepoKind::Memory(m) => m.contacts.delete(id),
            #[cfg(feature = "sqlite")]
            RepoKind::Sqlite(r) => ContactRepository::delete(r, id),
        }
    }

    fn create_demand(&self, demand: Demand) -> Result<(), CoreError> {
        match &*self.kind {
            RepoKind::Memory(m) => m.demands.create(demand),
            #[cfg(feature = "sqlite")]
            RepoKind::Sqlite(r) => DemandRepository::create(r, demand),
        }
    }

    fn get_demand(&self, id: &EntityId) -> Result<Option<Demand>, CoreError> {
        match &*self.kind {
            RepoKind::Memory(m) => m.demands.get(id),
            #[cfg(feature = "sqlite")]
            RepoKind::Sqlite(r) => DemandRepository::get(r, id),
        }
    }

    fn list_demands(&self, options: &ListOptions) -> Result<ListResult<Demand>, CoreError> {
        match &*self.kind {
            RepoKind::Memory(m) => m.demands.list_paginated(options),
            #[cfg(feature = "sqlite")]
            RepoKind::Sqlite(r) => r.list_paginated(options),
        }
    }

    fn update_demand(&self, id: &EntityId, patch: DemandPatch) -> Result<Demand, CoreError> {
        match &*self.kind {
            RepoKind::Memory(m) => m.demands.update(id, patch),
            #[cfg(feature = "sqlite")]
            RepoKind::Sqlite(r) => DemandRepository::update(r, id, patch),
        }
    }

    fn delete_demand(&self, id: &EntityId) -> Result<(), CoreError> {
        match &*self.kind {
            RepoKind::Memory(m) => m.demands.delete(id),
            #[cfg(feature = "sqlite")]
            RepoKind::Sqlite(r) => DemandRepository::delete(r, id),
        }
    }

    fn create_user(&self, user: User) -> Result<(), CoreError> {
        match &*self.kind {
            RepoKind::Memory(m) => m.users.create(user),
            #[cfg(feature = "sqlite")]
            RepoKind::Sqlite(r) => UserRepository::create(r, user),
        }
    }

    fn find_user_by_email(&self, email: &Email) -> Result<Option<User>, CoreError> {
        match &*self.kind {
            RepoKind::Memory(m) => m.users.find_by_email(email),
            #[cfg(feature = "sqlite")]
            RepoKind::Sqlite(r) => r.find_by_email(email),
        }
    }
}

#[derive(Clone)]
struct AppState {
    repo: AnyRepo,
    ids: UuidIds,
    clock: StdClock,
    auth_provider: config::AuthProvider,
    auth_secret: Option<String>,
    admin_emails: Vec<String>,
}

#[derive(Clone)]
struct StdClock;
impl Clock for StdClock {
    fn now(&self) -> std::time::SystemTime {
        std::time::SystemTime::now()
    }
}

#[derive(Clone)]
struct UuidIds;
impl IdGenerator for UuidIds {
    fn next_id(&self) -> EntityId {
        let raw = uuid::Uuid::new_v4().to_string();
        // Valid by construction — hyphenated uuid is ascii alnum plus '-'
        EntityId::new(raw).unwrap_or_else(|_| EntityId::new("0").expect("'0' is valid"))
    }
}

#[tokio::main]
async fn main() {
    // Load and validate config first (fail fast on misconfiguration)
    let cfg = match config::Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    init_tracing(&cfg);
    cfg.warn_if_insecure();

    let repo = build_repo_from_env(&cfg);
    let state = AppState {
        repo,
        ids: UuidIds,
        clock: StdClock,
        auth_provider: cfg.auth_provider.clone(),
        auth_secret: cfg.auth_secret.clone(),
        admin_emails: cfg.admin_emails.clone(),
    };

    // Request ID header name
    let x_request_id = axum::http::HeaderName::from_static("x-request-id");

    let mut app = api_router(state)
        .layer(PropagateRequestIdLayer::new(x_request_id.clone()))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get("x-request-id")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("-");
                tracing::info_span!(
                    "http_request",
                    method = %request.method(),
                    uri = %request.uri(),
                    request_id = %request_id,
                )
            }),
        )
        .layer(SetRequestIdLayer::new(x_request_id, MakeRequestUuid));

    // CORS - already validated in Config::from_env()
    let cors = if cfg.cors_allow_origin == HeaderValue::from_static("*") {
        CorsLayer::permissive()
    } else {
        CorsLayer::new()
            .allow_origin(AllowOrigin::list([cfg.cors_allow_origin]))
            .allow_methods([
                axum::http::Method::GET,
                axum::http::Method::POST,
                axum::http::Method::PATCH,
                axum::http::Method::DELETE,
                axum::http::Method::OPTIONS,
            ])
            .allow_headers([
                axum::http::header::AUTHORIZATION,
                axum::http::header::CONTENT_TYPE,
                axum::http::HeaderName::from_static("x-debug-user"),
            ])
    };
    app = app.layer(cors);

    let addr: SocketAddr = ([0, 0, 0, 0], cfg.port).into();
    info!(%addr, "api-server listening");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("bind port");
    axum::serve(listener, app).await.expect("server error");
}

fn api_router(state: AppState) -> Router {
    Router::new()
        .route("/api/auth/login", post(login).options(preflight))
        .route("/api/me", get(get_me).options(preflight))
        .route(
            "/api/organizations",
            post(create_organization)
                .get(list_organizations)
                .options(preflight),
        )
        .route(
            "/api/organizations/:id",
            get(get_organization)
                .patch(update_organization)
                .delete(delete_organization)
                .options(preflight),
        )
        .route(
            "/api/contacts",
            post(create_contact).get(list_contacts).options(preflight),
        )
        .route(
            "/api/contacts/:id",
            axum::routing::patch(update_contact)
                .delete(delete_contact)
                .options(preflight),
        )
        .route(
            "/api/demands",
            post(create_demand).get(list_demands).options(preflight),
        )
        .route(
            "/api/demands/:id",
            get(get_demand)
                .patch(update_demand)
                .delete(delete_demand)
                .options(preflight),
        )
        .route("/api/users", post(create_user).options(preflight))
        .with_state(state)
}

fn init_tracing(cfg: &config::Config) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(env_filter);
    match cfg.log_format {
        config::LogFormat::Json => {
            registry
                .with(
                    fmt::layer()
                        .json()
                        .with_target(true)
                        .with_timer(fmt::time::SystemTime)
                        .with_writer(std::io::stdout),
                )
                .init();
        }
        config::LogFormat::Pretty => {
            registry
                .with(
                    fmt::layer()
                        .pretty()
                        .with_target(true)
                        .with_writer(std::io::stdout),
                )
                .init();
        }
    }
}

// Construct a repository instance based on config and feature flags.
fn build_repo_from_env(cfg: &config::Config) -> AnyRepo {
    match cfg.storage_provider {
        #[cfg(feature = "sqlite")]
        config::StorageProvider::Sqlite => match AnyRepo::sqlite_from_env() {
            Ok(r) => r,
            Err(e) => {
                eprintln!("failed to init SqliteRepo from env: {e}");
                AnyRepo::memory()
            }
        },
        _ => AnyRepo::memory(),
    }
}

// ============================================================================
// Auth
// ============================================================================

enum AuthHttp {
    Unauthorized,
    Forbidden,
}

fn auth_failure(err: AuthHttp) -> axum::response::Response {
    match err {
        AuthHttp::Unauthorized => (
            StatusCode::UNAUTHORIZED,
            Json(http_common::json_error_with_message(
                "unauthorized",
                "missing or invalid token",
            )),
        )
            .into_response(),
        AuthHttp::Forbidden => (
            StatusCode::FORBIDDEN,
            Json(http_common::json_error_with_message(
                "forbidden",
                "admin required",
            )),
        )
            .into_response(),
    }
}

fn verify_request_user(headers: &HeaderMap, state: &AppState) -> Result<VerifiedUser, AuthHttp> {
    if state.auth_provider == config::AuthProvider::None {
        let email = headers
            .get("X-Debug-User")
            .and_then(|v| v.to_str().ok())
            .ok_or(AuthHttp::Unauthorized)?;
        return Ok(VerifiedUser {
            email: email.to_string(),
            sub: "debug".into(),
        });
    }

    // Token mode
    let auth = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(AuthHttp::Unauthorized)?;
    let token = auth.strip_prefix("Bearer ").ok_or(AuthHttp::Unauthorized)?;
    // Validated at startup when auth_provider=token
    let secret = state.auth_secret.as_ref().ok_or(AuthHttp::Unauthorized)?;
    session_auth::verify_token(token, secret).map_err(|e| {
        warn!(err = ?e, "auth failed");
        AuthHttp::Unauthorized
    })
}

fn is_admin(state: &AppState, email: &str) -> bool {
    if state
        .admin_emails
        .iter()
        .any(|a| a.eq_ignore_ascii_case(email))
    {
        return true;
    }
    // A stored admin role grants the same rights as the env list
    let Ok(parsed) = Email::new(email.to_string()) else {
        return false;
    };
    matches!(
        state.repo.find_user_by_email(&parsed),
        Ok(Some(user)) if user.role.can_manage()
    )
}

async fn preflight() -> impl IntoResponse {
    StatusCode::NO_CONTENT
}

fn internal_error<E: std::fmt::Debug>(what: &str, e: E) -> axum::response::Response {
    error!(err = ?e, "{what} error");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(http_common::json_error_with_message(
            "internal",
            "server error",
        )),
    )
        .into_response()
}

fn bad_request(message: &str) -> axum::response::Response {
    (
        StatusCode::BAD_REQUEST,
        Json(http_common::json_error_with_message(
            "invalid_request",
            message,
        )),
    )
        .into_response()
}

fn not_found() -> axum::response::Response {
    (
        StatusCode::NOT_FOUND,
        Json(http_common::json_err("not_found")),
    )
        .into_response()
}

fn parse_path_id(raw: &str) -> Result<EntityId, axum::response::Response> {
    EntityId::new(raw.to_string()).map_err(|_| bad_request("invalid id"))
}

// ============================================================================
// DTOs
// ============================================================================

#[derive(Deserialize)]
struct LoginReq {
    email: String,
    password: String,
}

#[derive(Serialize)]
struct LoginOut {
    token: String,
    email: String,
    display_name: String,
    role: String,
}

#[derive(Serialize)]
struct UserInfo {
    email: String,
    is_admin: bool,
}

#[derive(Deserialize)]
struct CreateOrgReq {
    name: String,
    #[serde(default)]
    street: Option<String>,
    #[serde(default)]
    postal_code: Option<String>,
    #[serde(default)]
    city: Option<String>,
    #[serde(default)]
    phone: Option<String>,
    #[serde(default)]
    email: Option<String>,
}

#[derive(Deserialize)]
struct UpdateOrgReq {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    street: Option<Option<String>>,
    #[serde(default)]
    postal_code: Option<Option<String>>,
    #[serde(default)]
    city: Option<Option<String>>,
    #[serde(default)]
    phone: Option<Option<String>>,
    #[serde(default)]
    email: Option<Option<String>>,
}

#[derive(Serialize)]
struct OrgOut {
    id: String,
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    street: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    postal_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    city: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    email: Option<String>,
    created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    updated_at: Option<String>,
}

#[derive(Serialize)]
struct OrgListOut {
    organizations: Vec<OrgOut>,
    total: usize,
}

fn org_to_out(org: Organization) -> OrgOut {
    OrgOut {
        id: org.id.as_str().to_string(),
        name: org.name,
        street: org.street,
        postal_code: org.postal_code,
        city: org.city,
        phone: org.phone,
        email: org.email.map(|e| e.as_str().to_string()),
        created_at: http_common::system_time_to_rfc3339(org.created_at),
        updated_at: org.updated_at.map(http_common::system_time_to_rfc3339),
    }
}

#[derive(Deserialize)]
struct CreateContactReq {
    first_name: String,
    last_name: String,
    #[serde(default)]
    organization_id: Option<String>,
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    phone: Option<String>,
}

#[derive(Deserialize)]
struct UpdateContactReq {
    #[serde(default)]
    first_name: Option<String>,
    #[serde(default)]
    last_name: Option<String>,
    #[serde(default)]
    organization_id: Option<Option<String>>,
    #[serde(default)]
    role: Option<Option<String>>,
    #[serde(default)]
    email: Option<Option<String>>,
    #[serde(default)]
    phone: Option<Option<String>>,
}

#[derive(Serialize)]
struct ContactOut {
    id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    organization_id: Option<String>,
    first_name: String,
    last_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    phone: Option<String>,
    created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    updated_at: Option<String>,
}

#[derive(Serialize)]
struct ContactListOut {
    contacts: Vec<ContactOut>,
    total: usize,
}

fn contact_to_out(contact: Contact) -> ContactOut {
    ContactOut {
        id: contact.id.as_str().to_string(),
        organization_id: contact.organization_id.map(|i| i.as_str().to_string()),
        first_name: contact.first_name,
        last_name: contact.last_name,
        role: contact.role,
        email: contact.email.map(|e| e.as_str().to_string()),
        phone: contact.phone,
        created_at: http_common::system_time_to_rfc3339(contact.created_at),
        updated_at: contact.updated_at.map(http_common::system_time_to_rfc3339),
    }
}

#[derive(Deserialize)]
struct CreateDemandReq {
    organization_id: String,
    title: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    priority: Option<String>,
}

#[derive(Deserialize)]
struct UpdateDemandReq {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    description: Option<Option<String>>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    priority: Option<String>,
    #[serde(default)]
    assigned_to: Option<Option<String>>,
}

#[derive(Serialize)]
struct DemandOut {
    id: String,
    organization_id: String,
    title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    status: String,
    priority: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    assigned_to: Option<String>,
    created_by: String,
    created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    updated_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    closed_at: Option<String>,
}

#[derive(Serialize)]
struct DemandListOut {
    demands: Vec<DemandOut>,
    total: usize,
    has_more: bool,
}

fn demand_to_out(demand: Demand) -> DemandOut {
    DemandOut {
        id: demand.id.as_str().to_string(),
        organization_id: demand.organization_id.as_str().to_string(),
        title: demand.title,
        description: demand.description,
        status: demand.status.as_str().to_string(),
        priority: demand.priority.as_str().to_string(),
        assigned_to: demand.assigned_to.map(|e| e.as_str().to_string()),
        created_by: demand.created_by.as_str().to_string(),
        created_at: http_common::system_time_to_rfc3339(demand.created_at),
        updated_at: demand.updated_at.map(http_common::system_time_to_rfc3339),
        closed_at: demand.closed_at.map(http_common::system_time_to_rfc3339),
    }
}

#[derive(Deserialize)]
struct CreateUserReq {
    email: String,
    display_name: String,
    password: String,
    #[serde(default)]
    role: Option<String>,
}

#[derive(Serialize)]
struct UserOut {
    id: String,
    email: String,
    display_name: String,
    role: String,
    created_at: String,
}

// ============================================================================
// Handlers — auth
// ============================================================================

async fn login(State(state): State<AppState>, Json(body): Json<LoginReq>) -> impl IntoResponse {
    if state.auth_provider == config::AuthProvider::None {
        return bad_request("auth is disabled; use the X-Debug-User header");
    }
    let Some(secret) = state.auth_secret.clone() else {
        return internal_error("login", "missing auth secret");
    };

    let email = match Email::new(body.email.clone()) {
        Ok(e) => e,
        Err(_) => return bad_request("invalid email"),
    };

    let user = match state.repo.find_user_by_email(&email) {
        Ok(Some(u)) => u,
        Ok(None) => {
            warn!(email = %email.as_str(), "login unknown user");
            return (
                StatusCode::UNAUTHORIZED,
                Json(http_common::json_error_with_message(
                    "unauthorized",
                    "invalid credentials",
                )),
            )
                .into_response();
        }
        Err(e) => return internal_error("login", e),
    };

    if session_auth::verify_password(&body.password, &user.password_digest).is_err() {
        warn!(email = %email.as_str(), "login bad password");
        return (
            StatusCode::UNAUTHORIZED,
            Json(http_common::json_error_with_message(
                "unauthorized",
                "invalid credentials",
            )),
        )
            .into_response();
    }

    match session_auth::issue_token(&secret, user.id.as_str(), user.email.as_str(), TOKEN_TTL) {
        Ok(token) => {
            info!(email = %user.email.as_str(), "login ok");
            (
                StatusCode::OK,
                Json(LoginOut {
                    token,
                    email: user.email.as_str().to_string(),
                    display_name: user.display_name,
                    role: user.role.as_str().to_string(),
                }),
            )
                .into_response()
        }
        Err(e) => internal_error("login", e),
    }
}

async fn get_me(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    let verified = match verify_request_user(&headers, &state) {
        Ok(v) => v,
        Err(e) => return auth_failure(e),
    };

    let user_info = UserInfo {
        email: verified.email.clone(),
        is_admin: is_admin(&state, &verified.email),
    };
    (StatusCode::OK, Json(user_info)).into_response()
}

async fn create_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<CreateUserReq>,
) -> impl IntoResponse {
    let verified = match verify_request_user(&headers, &state) {
        Ok(v) => v,
        Err(e) => return auth_failure(e),
    };
    if !is_admin(&state, &verified.email) {
        return auth_failure(AuthHttp::Forbidden);
    }

    let email = match Email::new(body.email.clone()) {
        Ok(e) => e,
        Err(_) => return bad_request("invalid email"),
    };
    if let Err(e) = domain::validate::validate_name("display_name", &body.display_name) {
        return bad_request(&format!("{}", e));
    }
    if body.password.len() < 8 {
        return bad_request("password must be at least 8 characters");
    }
    let role = match body.role.as_deref() {
        None => UserRole::Agent,
        Some(raw) => match UserRole::parse(raw) {
            Some(r) => r,
            None => return bad_request("invalid role"),
        },
    };

    let salt = uuid::Uuid::new_v4().simple().to_string();
    let digest = session_auth::hash_password(&body.password, &salt);
    let user = User::new(
        state.ids.next_id(),
        email,
        body.display_name,
        digest,
        role,
        state.clock.now(),
    );

    match state.repo.create_user(user.clone()) {
        Ok(()) => {
            info!(email = %user.email.as_str(), "user create ok");
            (
                StatusCode::CREATED,
                Json(UserOut {
                    id: user.id.as_str().to_string(),
                    email: user.email.as_str().to_string(),
                    display_name: user.display_name,
                    role: user.role.as_str().to_string(),
                    created_at: http_common::system_time_to_rfc3339(user.created_at),
                }),
            )
                .into_response()
        }
        Err(CoreError::AlreadyExists) => (
            StatusCode::CONFLICT,
            Json(http_common::json_error_with_message(
                "conflict",
                "email already registered",
            )),
        )
            .into_response(),
        Err(e) => internal_error("user create", e),
    }
}

// ============================================================================
// Handlers — organizations
// ============================================================================

async fn create_organization(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<CreateOrgReq>,
) -> impl IntoResponse {
    if let Err(e) = verify_request_user(&headers, &state) {
        return auth_failure(e);
    }

    if let Err(e) = domain::validate::validate_name("name", &body.name) {
        return bad_request(&format!("{}", e));
    }
    if let Some(ref phone) = body.phone {
        if let Err(e) = domain::validate::validate_phone(phone) {
            return bad_request(&format!("{}", e));
        }
    }
    if let Some(ref postal_code) = body.postal_code {
        if let Err(e) = domain::validate::validate_postal_code(postal_code) {
            return bad_request(&format!("{}", e));
        }
    }
    let email = match body.email {
        None => None,
        Some(raw) => match Email::new(raw) {
            Ok(e) => Some(e),
            Err(_) => return bad_request("invalid email"),
        },
    };

    let mut org = Organization::new(state.ids.next_id(), body.name, state.clock.now());
    org.street = body.street;
    org.postal_code = body.postal_code;
    org.city = body.city;
    org.phone = body.phone;
    org.email = email;

    match state.repo.create_organization(org.clone()) {
        Ok(()) => {
            info!(id = %org.id.as_str(), "organization create ok");
            (StatusCode::CREATED, Json(org_to_out(org))).into_response()
        }
        Err(CoreError::AlreadyExists) => (
            StatusCode::CONFLICT,
            Json(http_common::json_err("conflict")),
        )
            .into_response(),
        Err(e) => internal_error("organization create", e),
    }
}

#[derive(Deserialize)]
struct OrgListQuery {
    limit: Option<usize>,
    q: Option<String>,
}

async fn list_organizations(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<OrgListQuery>,
) -> impl IntoResponse {
    if let Err(e) = verify_request_user(&headers, &state) {
        return auth_failure(e);
    }

    let limit = match query.limit {
        Some(n) if (1..=500).contains(&n) => n,
        Some(_) => return bad_request("limit must be between 1 and 500"),
        None => 50, // default
    };

    let result = match query.q {
        Some(ref q) if !q.is_empty() => state.repo.search_organizations(q, limit),
        _ => state.repo.list_organizations(limit),
    };

    match result {
        Ok(orgs) => {
            let organizations: Vec<OrgOut> = orgs.into_iter().map(org_to_out).collect();
            let total = organizations.len();
            (
                StatusCode::OK,
                Json(OrgListOut {
                    organizations,
                    total,
                }),
            )
                .into_response()
        }
        Err(e) => internal_error("organization list", e),
    }
}

async fn get_organization(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id_str): Path<String>,
) -> impl IntoResponse {
    if let Err(e) = verify_request_user(&headers, &state) {
        return auth_failure(e);
    }
    let id = match parse_path_id(&id_str) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match state.repo.get_organization(&id) {
        Ok(Some(org)) => (StatusCode::OK, Json(org_to_out(org))).into_response(),
        Ok(None) => not_found(),
        Err(e) => internal_error("organization get", e),
    }
}

async fn update_organization(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id_str): Path<String>,
    Json(body): Json<UpdateOrgReq>,
) -> impl IntoResponse {
    if let Err(e) = verify_request_user(&headers, &state) {
        return auth_failure(e);
    }
    let id = match parse_path_id(&id_str) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    if let Some(ref name) = body.name {
        if let Err(e) = domain::validate::validate_name("name", name) {
            return bad_request(&format!("{}", e));
        }
    }
    if let Some(Some(ref phone)) = body.phone {
        if let Err(e) = domain::validate::validate_phone(phone) {
            return bad_request(&format!("{}", e));
        }
    }
    if let Some(Some(ref postal_code)) = body.postal_code {
        if let Err(e) = domain::validate::validate_postal_code(postal_code) {
            return bad_request(&format!("{}", e));
        }
    }
    let email = match body.email {
        None => None,
        Some(None) => Some(None),
        Some(Some(raw)) => match Email::new(raw) {
            Ok(e) => Some(Some(e)),
            Err(_) => return bad_request("invalid email"),
        },
    };

    let patch = OrganizationPatch {
        name: body.name,
        street: body.street,
        postal_code: body.postal_code,
        city: body.city,
        phone: body.phone,
        email,
        updated_at: Some(state.clock.now()),
    };

    match state.repo.update_organization(&id, patch) {
        Ok(org) => {
            info!(id = %id_str, "organization update ok");
            (StatusCode::OK, Json(org_to_out(org))).into_response()
        }
        Err(CoreError::NotFound) => not_found(),
        Err(e) => internal_error("organization update", e),
    }
}

async fn delete_organization(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id_str): Path<String>,
) -> impl IntoResponse {
    let verified = match verify_request_user(&headers, &state) {
        Ok(v) => v,
        Err(e) => return auth_failure(e),
    };
    // Removing an organization discards the record for good; admins only
    if !is_admin(&state, &verified.email) {
        return auth_failure(AuthHttp::Forbidden);
    }
    let id = match parse_path_id(&id_str) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match state.repo.delete_organization(&id) {
        Ok(()) => {
            info!(id = %id_str, "organization delete ok");
            (StatusCode::NO_CONTENT, ()).into_response()
        }
        Err(CoreError::NotFound) => not_found(),
        Err(e) => internal_error("organization delete", e),
    }
}

// ============================================================================
// Handlers — contacts
// ============================================================================

async fn create_contact(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<CreateContactReq>,
) -> impl IntoResponse {
    if let Err(e) = verify_request_user(&headers, &state) {
        return auth_failure(e);
    }

    if let Err(e) = domain::validate::validate_name("first_name", &body.first_name) {
        return bad_request(&format!("{}", e));
    }
    if let Err(e) = domain::validate::validate_name("last_name", &body.last_name) {
        return bad_request(&format!("{}", e));
    }
    if let Some(ref phone) = body.phone {
        if let Err(e) = domain::validate::validate_phone(phone) {
            return bad_request(&format!("{}", e));
        }
    }
    let organization_id = match body.organization_id {
        None => None,
        Some(raw) => match EntityId::new(raw) {
            Ok(id) => Some(id),
            Err(_) => return bad_request("invalid organization_id"),
        },
    };
    if let Some(ref org_id) = organization_id {
        match state.repo.get_organization(org_id) {
            Ok(Some(_)) => {}
            Ok(None) => return bad_request("unknown organization"),
            Err(e) => return internal_error("contact create", e),
        }
    }
    let email = match body.email {
        None => None,
        Some(raw) => match Email::new(raw) {
            Ok(e) => Some(e),
            Err(_) => return bad_request("invalid email"),
        },
    };

    let mut contact = Contact::new(
        state.ids.next_id(),
        body.first_name,
        body.last_name,
        state.clock.now(),
    );
    contact.organization_id = organization_id;
    contact.role = body.role;
    contact.email = email;
    contact.phone = body.phone;

    match state.repo.create_contact(contact.clone()) {
        Ok(()) => {
            info!(id = %contact.id.as_str(), "contact create ok");
            (StatusCode::CREATED, Json(contact_to_out(contact))).into_response()
        }
        Err(CoreError::AlreadyExists) => (
            StatusCode::CONFLICT,
            Json(http_common::json_err("conflict")),
        )
            .into_response(),
        Err(e) => internal_error("contact create", e),
    }
}

#[derive(Deserialize)]
struct ContactListQuery {
    limit: Option<usize>,
    organization_id: Option<String>,
}

async fn list_contacts(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ContactListQuery>,
) -> impl IntoResponse {
    if let Err(e) = verify_request_user(&headers, &state) {
        return auth_failure(e);
    }

    let limit = match query.limit {
        Some(n) if (1..=500).contains(&n) => n,
        Some(_) => return bad_request("limit must be between 1 and 500"),
        None => 50, // default
    };

    let result = match query.organization_id {
        Some(ref raw) if !raw.is_empty() => match EntityId::new(raw.clone()) {
            Ok(org_id) => state.repo.list_contacts_by_organization(&org_id, limit),
            Err(_) => return bad_request("invalid organization_id"),
        },
        _ => state.repo.list_contacts(limit),
    };

    match result {
        Ok(contacts) => {
            let contacts: Vec<ContactOut> = contacts.into_iter().map(contact_to_out).collect();
            let total = contacts.len();
            (StatusCode::OK, Json(ContactListOut { contacts, total })).into_response()
        }
        Err(e) => internal_error("contact list", e),
    }
}

async fn update_contact(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id_str): Path<String>,
    Json(body): Json<UpdateContactReq>,
) -> impl IntoResponse {
    if let Err(e) = verify_request_user(&headers, &state) {
        return auth_failure(e);
    }
    let id = match parse_path_id(&id_str) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    if let Some(ref first_name) = body.first_name {
        if let Err(e) = domain::validate::validate_name("first_name", first_name) {
            return bad_request(&format!("{}", e));
        }
    }
    if let Some(ref last_name) = body.last_name {
        if let Err(e) = domain::validate::validate_name("last_name", last_name) {
            return bad_request(&format!("{}", e));
        }
    }
    if let Some(Some(ref phone)) = body.phone {
        if let Err(e) = domain::validate::validate_phone(phone) {
            return bad_request(&format!("{}", e));
        }
    }
    let organization_id = match body.organization_id {
        None => None,
        Some(None) => Some(None),
        Some(Some(raw)) => match EntityId::new(raw) {
            Ok(org_id) => {
                match state.repo.get_organization(&org_id) {
                    Ok(Some(_)) => {}
                    Ok(None) => return bad_request("unknown organization"),
                    Err(e) => return internal_error("contact update", e),
                }
                Some(Some(org_id))
            }
            Err(_) => return bad_request("invalid organization_id"),
        },
    };
    let email = match body.email {
        None => None,
        Some(None) => Some(None),
        Some(Some(raw)) => match Email::new(raw) {
            Ok(e) => Some(Some(e)),
            Err(_) => return bad_request("invalid email"),
        },
    };

    let patch = ContactPatch {
        organization_id,
        first_name: body.first_name,
        last_name: body.last_name,
        role: body.role,
        email,
        phone: body.phone,
        updated_at: Some(state.clock.now()),
    };

    match state.repo.update_contact(&id, patch) {
        Ok(contact) => {
            info!(id = %id_str, "contact update ok");
            (StatusCode::OK, Json(contact_to_out(contact))).into_response()
        }
        Err(CoreError::NotFound) => not_found(),
        Err(e) => internal_error("contact update", e),
    }
}

async fn delete_contact(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id_str): Path<String>,
) -> impl IntoResponse {
    if let Err(e) = verify_request_user(&headers, &state) {
        return auth_failure(e);
    }
    let id = match parse_path_id(&id_str) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match state.repo.delete_contact(&id) {
        Ok(()) => {
            info!(id = %id_str, "contact delete ok");
            (StatusCode::NO_CONTENT, ()).into_response()
        }
        Err(CoreError::NotFound) => not_found(),
        Err(e) => internal_error("contact delete", e),
    }
}

// ============================================================================
// Handlers — demands
// ============================================================================

async fn create_demand(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<CreateDemandReq>,
) -> impl IntoResponse {
    let verified = match verify_request_user(&headers, &state) {
        Ok(v) => v,
        Err(e) => return auth_failure(e),
    };
    let created_by = match Email::new(verified.email.clone()) {
        Ok(e) => e,
        Err(_) => {
            return (
                StatusCode::UNAUTHORIZED,
                Json(http_common::json_error_with_message(
                    "unauthorized",
                    "invalid user email in token",
                )),
            )
                .into_response()
        }
    };

    if let Err(e) = domain::validate::validate_title(&body.title) {
        return bad_request(&format!("{}", e));
    }
    let organization_id = match EntityId::new(body.organization_id) {
        Ok(id) => id,
        Err(_) => return bad_request("invalid organization_id"),
    };
    match state.repo.get_organization(&organization_id) {
        Ok(Some(_)) => {}
        Ok(None) => return bad_request("unknown organization"),
        Err(e) => return internal_error("demand create", e),
    }
    let priority = match body.priority.as_deref() {
        None => None,
        Some(raw) => match DemandPriority::parse(raw) {
            Some(p) => Some(p),
            None => return bad_request("invalid priority"),
        },
    };

    let mut demand = Demand::new(
        state.ids.next_id(),
        organization_id,
        body.title,
        created_by,
        state.clock.now(),
    );
    demand.description = body.description;
    if let Some(priority) = priority {
        demand.priority = priority;
    }

    match state.repo.create_demand(demand.clone()) {
        Ok(()) => {
            info!(id = %demand.id.as_str(), "demand create ok");
            (StatusCode::CREATED, Json(demand_to_out(demand))).into_response()
        }
        Err(CoreError::AlreadyExists) => (
            StatusCode::CONFLICT,
            Json(http_common::json_err("conflict")),
        )
            .into_response(),
        Err(e) => internal_error("demand create", e),
    }
}

#[derive(Deserialize)]
struct DemandListQuery {
    limit: Option<usize>,
    offset: Option<usize>,
    status: Option<String>,
    organization_id: Option<String>,
    assigned_to: Option<String>,
    q: Option<String>,
}

async fn list_demands(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<DemandListQuery>,
) -> impl IntoResponse {
    if let Err(e) = verify_request_user(&headers, &state) {
        return auth_failure(e);
    }

    let limit = match query.limit {
        Some(n) if (1..=500).contains(&n) => n,
        Some(_) => return bad_request("limit must be between 1 and 500"),
        None => 50, // default
    };
    let offset = query.offset.unwrap_or(0);

    let status = match query.status.as_deref() {
        None => None,
        Some("") => None,
        Some(raw) => match DemandStatus::parse(raw) {
            Some(s) => Some(s),
            None => return bad_request("invalid status"),
        },
    };
    let organization_id = match query.organization_id {
        None => None,
        Some(ref raw) if raw.is_empty() => None,
        Some(raw) => match EntityId::new(raw) {
            Ok(id) => Some(id),
            Err(_) => return bad_request("invalid organization_id"),
        },
    };
    let assigned_to = query
        .assigned_to
        .as_ref()
        .and_then(|e| Email::new(e.clone()).ok());

    let options = ListOptions {
        limit,
        offset,
        status,
        organization_id,
        assigned_to,
        search: query.q.clone(),
    };

    match state.repo.list_demands(&options) {
        Ok(result) => {
            let demands: Vec<DemandOut> = result.items.into_iter().map(demand_to_out).collect();
            (
                StatusCode::OK,
                Json(DemandListOut {
                    demands,
                    total: result.total,
                    has_more: result.has_more,
                }),
            )
                .into_response()
        }
        Err(e) => internal_error("demand list", e),
    }
}

async fn get_demand(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id_str): Path<String>,
) -> impl IntoResponse {
    if let Err(e) = verify_request_user(&headers, &state) {
        return auth_failure(e);
    }
    let id = match parse_path_id(&id_str) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match state.repo.get_demand(&id) {
        Ok(Some(demand)) => (StatusCode::OK, Json(demand_to_out(demand))).into_response(),
        Ok(None) => not_found(),
        Err(e) => internal_error("demand get", e),
    }
}

async fn update_demand(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id_str): Path<String>,
    Json(body): Json<UpdateDemandReq>,
) -> impl IntoResponse {
    if let Err(e) = verify_request_user(&headers, &state) {
        return auth_failure(e);
    }
    let id = match parse_path_id(&id_str) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    if let Some(ref title) = body.title {
        if let Err(e) = domain::validate::validate_title(title) {
            return bad_request(&format!("{}", e));
        }
    }
    let status = match body.status.as_deref() {
        None => None,
        Some(raw) => match DemandStatus::parse(raw) {
            Some(s) => Some(s),
            None => return bad_request("invalid status"),
        },
    };
    let priority = match body.priority.as_deref() {
        None => None,
        Some(raw) => match DemandPriority::parse(raw) {
            Some(p) => Some(p),
            None => return bad_request("invalid priority"),
        },
    };
    let assigned_to = match body.assigned_to {
        None => None,
        Some(None) => Some(None),
        Some(Some(raw)) => match Email::new(raw) {
            Ok(e) => Some(Some(e)),
            Err(_) => return bad_request("invalid assigned_to"),
        },
    };

    let now = state.clock.now();
    // Closing stamps closed_at; any other explicit transition clears it
    let closed_at = match status {
        Some(DemandStatus::Closed) => Some(Some(now)),
        Some(_) => Some(None),
        None => None,
    };

    let patch = DemandPatch {
        title: body.title,
        description: body.description,
        status,
        priority,
        assigned_to,
        updated_at: Some(now),
        closed_at,
    };

    match state.repo.update_demand(&id, patch) {
        Ok(demand) => {
            info!(id = %id_str, "demand update ok");
            (StatusCode::OK, Json(demand_to_out(demand))).into_response()
        }
        Err(CoreError::NotFound) => not_found(),
        Err(e) => internal_error("demand update", e),
    }
}

async fn delete_demand(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id_str): Path<String>,
) -> impl IntoResponse {
    let verified = match verify_request_user(&headers, &state) {
        Ok(v) => v,
        Err(e) => return auth_failure(e),
    };
    let id = match parse_path_id(&id_str) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    // Check ownership or admin
    let demand = match state.repo.get_demand(&id) {
        Ok(Some(d)) => d,
        Ok(None) => return not_found(),
        Err(e) => return internal_error("demand get", e),
    };
    if demand.created_by.as_str() != verified.email && !is_admin(&state, &verified.email) {
        return (
            StatusCode::FORBIDDEN,
            Json(http_common::json_error_with_message(
                "forbidden",
                "not demand creator",
            )),
        )
            .into_response();
    }

    match state.repo.delete_demand(&id) {
        Ok(()) => {
            info!(id = %id_str, "demand delete ok");
            (StatusCode::NO_CONTENT, ()).into_response()
        }
        Err(CoreError::NotFound) => not_found(),
        Err(e) => internal_error("demand delete", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::util::ServiceExt;

    fn app() -> Router {
        let state = AppState {
            repo: AnyRepo::memory(),
            ids: UuidIds,
            clock: StdClock,
            auth_provider: config::AuthProvider::None,
            auth_secret: None,
            admin_emails: vec!["boss@carebase.example".into()],
        };
        api_router(state)
    }

    fn authed(req: axum::http::request::Builder) -> axum::http::request::Builder {
        req.header("X-Debug-User", "agent@carebase.example")
    }

    async fn body_json(resp: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn requires_auth() {
        let router = app();
        let resp = router
            .oneshot(
                Request::builder()
                    .uri("/api/organizations")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn create_and_list_organizations() {
        let router = app();

        // Create
        let req = authed(Request::builder().method("POST").uri("/api/organizations"))
            .header("content-type", "application/json")
            .body(Body::from(
                "{\"name\":\"Clinique du Parc\",\"city\":\"Lyon\"}",
            ))
            .unwrap();
        let resp = router.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        let created = body_json(resp).await;
        assert_eq!(created["name"], "Clinique du Parc");

        // List
        let resp = router
            .clone()
            .oneshot(
                authed(Request::builder().uri("/api/organizations"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let listed = body_json(resp).await;
        assert_eq!(listed["total"], 1);

        // Search that matches nothing
        let resp = router
            .clone()
            .oneshot(
                authed(Request::builder().uri("/api/organizations?q=nothing"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let listed = body_json(resp).await;
        assert_eq!(listed["total"], 0);
    }

    #[tokio::test]
    async fn invalid_body_is_rejected() {
        let router = app();
        let req = authed(Request::builder().method("POST").uri("/api/organizations"))
            .header("content-type", "application/json")
            .body(Body::from("{\"name\":\"   \"}"))
            .unwrap();
        let resp = router.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn demand_flow_create_update_close() {
        let router = app();

        // Need an organization first
        let req = authed(Request::builder().method("POST").uri("/api/organizations"))
            .header("content-type", "application/json")
            .body(Body::from("{\"name\":\"EHPAD Les Tilleuls\"}"))
            .unwrap();
        let resp = router.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        let org = body_json(resp).await;
        let org_id = org["id"].as_str().unwrap().to_string();

        // Demand against an unknown org is refused
        let req = authed(Request::builder().method("POST").uri("/api/demands"))
            .header("content-type", "application/json")
            .body(Body::from(
                "{\"organization_id\":\"missing\",\"title\":\"T\"}",
            ))
            .unwrap();
        let resp = router.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        // Create
        let req = authed(Request::builder().method("POST").uri("/api/demands"))
            .header("content-type", "application/json")
            .body(Body::from(format!(
                "{{\"organization_id\":\"{org_id}\",\"title\":\"Renew accreditation\",\"priority\":\"high\"}}"
            )))
            .unwrap();
        let resp = router.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        let demand = body_json(resp).await;
        assert_eq!(demand["status"], "new");
        assert_eq!(demand["priority"], "high");
        let demand_id = demand["id"].as_str().unwrap().to_string();

        // Close it
        let req = authed(
            Request::builder()
                .method("PATCH")
                .uri(format!("/api/demands/{demand_id}")),
        )
        .header("content-type", "application/json")
        .body(Body::from("{\"status\":\"closed\"}"))
        .unwrap();
        let resp = router.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let closed = body_json(resp).await;
        assert_eq!(closed["status"], "closed");
        assert!(closed["closed_at"].is_string());

        // Filtered list sees it
        let resp = router
            .clone()
            .oneshot(
                authed(Request::builder().uri("/api/demands?status=closed"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let listed = body_json(resp).await;
        assert_eq!(listed["total"], 1);

        // Creator may delete their own demand
        let resp = router
            .clone()
            .oneshot(
                authed(
                    Request::builder()
                        .method("DELETE")
                        .uri(format!("/api/demands/{demand_id}")),
                )
                .body(Body::empty())
                .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn organization_delete_is_admin_only() {
        let router = app();

        let req = authed(Request::builder().method("POST").uri("/api/organizations"))
            .header("content-type", "application/json")
            .body(Body::from("{\"name\":\"Clinique du Parc\"}"))
            .unwrap();
        let resp = router.clone().oneshot(req).await.unwrap();
        let org = body_json(resp).await;
        let org_id = org["id"].as_str().unwrap().to_string();

        // Plain agent is refused
        let resp = router
            .clone()
            .oneshot(
                authed(
                    Request::builder()
                        .method("DELETE")
                        .uri(format!("/api/organizations/{org_id}")),
                )
                .body(Body::empty())
                .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);

        // Admin from ADMIN_EMAILS may delete
        let resp = router
            .clone()
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri(format!("/api/organizations/{org_id}"))
                    .header("X-Debug-User", "boss@carebase.example")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn login_is_disabled_in_debug_mode() {
        let router = app();
        let resp = router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/auth/login")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        "{\"email\":\"a@b.example\",\"password\":\"hunter22\"}",
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
