//! HTTP API for the planline server

use axum::{
    Extension, Json, Router,
    extract::{
        Path, Query, State,
        rejection::{JsonRejection, QueryRejection},
    },
    http::{StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, patch},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::config::{Config, token_id, verify_token};
use crate::construction::{ConstructionSchedule, flatten_schedule};
use crate::dates::{parse_instant, utc_day};
use crate::db::Database;
use crate::error::DomainError;
use crate::models::{
    CreateIssue, CreateMilestone, CreateProject, CreateTask, Issue, IssueChange, Milestone,
    Project, ProjectDashboard, ProjectDetail, ProjectMember, ProjectSummary, RemoveMember,
    SessionUser, Task, UpdateIssue, UpdateMilestone, UpdateProject, UpdateTask, UpsertMember,
};
use crate::schedule::{ReportOptions, ScheduleReport, ScheduleTask, to_csv};
use crate::service::{IssueFilter, Planner};

/// Application state shared across handlers
pub struct AppState {
    pub db: Database,
    pub config: Config,
}

impl AppState {
    pub fn new(db: Database, config: Config) -> Arc<Self> {
        Arc::new(Self { db, config })
    }

    fn planner(&self) -> Planner<'_> {
        Planner::new(&self.db)
    }
}

/// Caller resolved by [`auth_middleware`]; `None` for anonymous requests
#[derive(Debug, Clone, Default)]
pub struct Session(pub Option<SessionUser>);

impl Session {
    fn user(&self) -> Option<&SessionUser> {
        self.0.as_ref()
    }
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/projects", get(list_projects).post(create_project))
        .route(
            "/api/v1/projects/{id}",
            get(get_project).patch(update_project).delete(delete_project),
        )
        .route("/api/v1/projects/{id}/dashboard", get(project_dashboard))
        .route("/api/v1/projects/{id}/schedule", get(project_schedule))
        .route(
            "/api/v1/projects/{id}/members",
            get(list_members).post(upsert_member).delete(remove_member),
        )
        .route("/api/v1/tasks", get(list_tasks).post(create_task))
        .route(
            "/api/v1/tasks/{id}",
            get(get_task).patch(update_task).delete(delete_task),
        )
        .route("/api/v1/issues", get(list_issues).post(create_issue))
        .route("/api/v1/issues/{id}", patch(update_issue).delete(delete_issue))
        .route(
            "/api/v1/milestones",
            get(list_milestones).post(create_milestone),
        )
        .route(
            "/api/v1/milestones/{id}",
            patch(update_milestone).delete(delete_milestone),
        )
        .route("/api/v1/schedule", get(schedule_report))
        .route("/api/v1/schedule/csv", get(schedule_csv))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Health check endpoint (no auth required)
async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "planline",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Resolves the Bearer token to a session user. Never rejects; the
/// permission checks decide between 401 and 403.
async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Response {
    if request.uri().path() == "/health" {
        return next.run(request).await;
    }

    let token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(|t| t.trim().to_string());

    match resolve_session(&state, token).await {
        Ok(user) => {
            request.extensions_mut().insert(Session(user));
            next.run(request).await
        }
        Err(err) => err.into_response(),
    }
}

async fn resolve_session(
    state: &AppState,
    token: Option<String>,
) -> Result<Option<SessionUser>, ApiError> {
    let Some(token) = token else {
        if state.config.auth.dev_admin_fallback {
            return Ok(state.db.read(|store| store.first_admin())?.map(SessionUser::from));
        }
        return Ok(None);
    };

    let holder = match token_id(&token) {
        Some(id) => state.db.read(|store| store.find_token_holder(id))?,
        None => None,
    };
    let Some((user, token_hash)) = holder else {
        tracing::debug!("Bearer token matched no user");
        return Ok(None);
    };

    // argon2 verification blocks
    let verified = tokio::task::spawn_blocking(move || verify_token(&token, &token_hash))
        .await
        .map_err(|e| ApiError::Internal(anyhow::Error::new(e)))?;
    if !verified {
        tracing::debug!(user_id = %user.id, "Bearer token failed verification");
        return Ok(None);
    }
    Ok(Some(SessionUser::from(user)))
}

#[derive(Debug, Serialize)]
pub struct Data<T> {
    pub data: T,
}

fn data<T: Serialize>(value: T) -> Json<Data<T>> {
    Json(Data { data: value })
}

type ApiResult<T> = Result<Json<Data<T>>, ApiError>;
type Created<T> = Result<(StatusCode, Json<Data<T>>), ApiError>;

fn created<T: Serialize>(value: T) -> Created<T> {
    Ok((StatusCode::CREATED, data(value)))
}

fn deleted() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "ok": true }))
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload.map(|Json(value)| value).map_err(ApiError::from)
}

fn query<T>(params: Result<Query<T>, QueryRejection>) -> Result<T, ApiError> {
    params.map(|Query(value)| value).map_err(ApiError::from)
}

// ---- projects ----

async fn list_projects(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<Session>,
) -> ApiResult<Vec<ProjectSummary>> {
    Ok(data(state.planner().list_projects(session.user())?))
}

async fn create_project(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<Session>,
    payload: Result<Json<CreateProject>, JsonRejection>,
) -> Created<ProjectDetail> {
    let req = body(payload)?;
    created(state.planner().create_project(session.user(), req)?)
}

async fn get_project(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<Session>,
    Path(id): Path<String>,
) -> ApiResult<ProjectDetail> {
    Ok(data(state.planner().get_project(session.user(), &id)?))
}

async fn update_project(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<Session>,
    Path(id): Path<String>,
    payload: Result<Json<UpdateProject>, JsonRejection>,
) -> ApiResult<Project> {
    let req = body(payload)?;
    Ok(data(state.planner().update_project(session.user(), &id, req)?))
}

async fn delete_project(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<Session>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.planner().delete_project(session.user(), &id)?;
    Ok(deleted())
}

async fn project_dashboard(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<Session>,
    Path(id): Path<String>,
) -> ApiResult<ProjectDashboard> {
    let today = utc_day(Utc::now());
    Ok(data(state.planner().project_dashboard(
        session.user(),
        &id,
        today,
    )?))
}

async fn project_schedule(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<Session>,
    Path(id): Path<String>,
    params: Result<Query<ScheduleQuery>, QueryRejection>,
) -> ApiResult<ScheduleReport> {
    let options = query(params)?.report_options(&state.config);
    Ok(data(state.planner().project_report(
        session.user(),
        &id,
        &options,
    )?))
}

// ---- members ----

async fn list_members(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<Session>,
    Path(id): Path<String>,
) -> ApiResult<Vec<ProjectMember>> {
    Ok(data(state.planner().list_members(session.user(), &id)?))
}

async fn upsert_member(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<Session>,
    Path(id): Path<String>,
    payload: Result<Json<UpsertMember>, JsonRejection>,
) -> Created<ProjectMember> {
    let req = body(payload)?;
    created(state.planner().upsert_member(session.user(), &id, req)?)
}

async fn remove_member(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<Session>,
    Path(id): Path<String>,
    payload: Result<Json<RemoveMember>, JsonRejection>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let req = body(payload)?;
    state
        .planner()
        .remove_member(session.user(), &id, &req.user_id)?;
    Ok(deleted())
}

// ---- tasks ----

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TaskQuery {
    project_id: Option<String>,
}

async fn list_tasks(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<Session>,
    params: Result<Query<TaskQuery>, QueryRejection>,
) -> ApiResult<Vec<Task>> {
    let params = query(params)?;
    Ok(data(state.planner().list_tasks(
        session.user(),
        params.project_id.as_deref(),
    )?))
}

async fn create_task(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<Session>,
    payload: Result<Json<CreateTask>, JsonRejection>,
) -> Created<Task> {
    let req = body(payload)?;
    created(state.planner().create_task(session.user(), req)?)
}

async fn get_task(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<Session>,
    Path(id): Path<String>,
) -> ApiResult<Task> {
    Ok(data(state.planner().get_task(session.user(), &id)?))
}

async fn update_task(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<Session>,
    Path(id): Path<String>,
    payload: Result<Json<UpdateTask>, JsonRejection>,
) -> ApiResult<Task> {
    let req = body(payload)?;
    Ok(data(state.planner().update_task(session.user(), &id, req)?))
}

async fn delete_task(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<Session>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.planner().delete_task(session.user(), &id)?;
    Ok(deleted())
}

// ---- issues ----

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IssueQuery {
    task_id: Option<String>,
    project_id: Option<String>,
}

async fn list_issues(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<Session>,
    params: Result<Query<IssueQuery>, QueryRejection>,
) -> ApiResult<Vec<Issue>> {
    let params = query(params)?;
    let filter = IssueFilter {
        task_id: params.task_id,
        project_id: params.project_id,
    };
    Ok(data(state.planner().list_issues(session.user(), &filter)?))
}

async fn create_issue(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<Session>,
    payload: Result<Json<CreateIssue>, JsonRejection>,
) -> Created<IssueChange> {
    let req = body(payload)?;
    created(state.planner().create_issue(session.user(), req)?)
}

async fn update_issue(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<Session>,
    Path(id): Path<String>,
    payload: Result<Json<UpdateIssue>, JsonRejection>,
) -> ApiResult<IssueChange> {
    let req = body(payload)?;
    Ok(data(state.planner().update_issue(session.user(), &id, req)?))
}

async fn delete_issue(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<Session>,
    Path(id): Path<String>,
) -> ApiResult<IssueChange> {
    Ok(data(state.planner().delete_issue(session.user(), &id)?))
}

// ---- milestones ----

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MilestoneQuery {
    project_id: Option<String>,
}

async fn list_milestones(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<Session>,
    params: Result<Query<MilestoneQuery>, QueryRejection>,
) -> ApiResult<Vec<Milestone>> {
    let project_id = query(params)?
        .project_id
        .ok_or_else(|| DomainError::validation("projectId is required"))?;
    Ok(data(state.planner().list_milestones(session.user(), &project_id)?))
}

async fn create_milestone(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<Session>,
    payload: Result<Json<CreateMilestone>, JsonRejection>,
) -> Created<Milestone> {
    let req = body(payload)?;
    created(state.planner().create_milestone(session.user(), req)?)
}

async fn update_milestone(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<Session>,
    Path(id): Path<String>,
    payload: Result<Json<UpdateMilestone>, JsonRejection>,
) -> ApiResult<Milestone> {
    let req = body(payload)?;
    Ok(data(state.planner().update_milestone(session.user(), &id, req)?))
}

async fn delete_milestone(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<Session>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.planner().delete_milestone(session.user(), &id)?;
    Ok(deleted())
}

// ---- schedule analytics ----

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScheduleQuery {
    horizon_days: Option<String>,
    resource: Option<String>,
    date: Option<String>,
}

impl ScheduleQuery {
    /// Lenient: a bad horizon falls back to the configured default, a
    /// negative one clamps to zero, and a bad date means "now".
    fn report_options(self, config: &Config) -> ReportOptions {
        let horizon_days = self
            .horizon_days
            .as_deref()
            .and_then(|h| h.trim().parse::<i64>().ok())
            .map(|h| u32::try_from(h.max(0)).unwrap_or(u32::MAX))
            .unwrap_or(config.schedule.default_horizon_days);

        ReportOptions {
            reference: self
                .date
                .as_deref()
                .and_then(|d| parse_instant(d).ok())
                .unwrap_or_else(Utc::now),
            horizon_days,
            resource: self.resource.filter(|r| !r.is_empty()),
        }
    }
}

/// Configured schedule plus its analytics
#[derive(Debug, Serialize)]
pub struct ScheduleResponse {
    pub schedule: ConstructionSchedule,
    #[serde(flatten)]
    pub report: ScheduleReport,
}

fn configured_tasks(config: &Config) -> Result<(ConstructionSchedule, Vec<ScheduleTask>), ApiError> {
    let schedule =
        ConstructionSchedule::resolve(config.schedule.source.as_deref()).map_err(ApiError::Internal)?;
    let tasks = flatten_schedule(&schedule);
    Ok((schedule, tasks))
}

async fn schedule_report(
    State(state): State<Arc<AppState>>,
    params: Result<Query<ScheduleQuery>, QueryRejection>,
) -> ApiResult<ScheduleResponse> {
    let options = query(params)?.report_options(&state.config);
    let (schedule, tasks) = configured_tasks(&state.config)?;
    let report = ScheduleReport::build(tasks, &options)?;

    tracing::debug!(
        tasks = report.tasks.len(),
        overlaps = report.overlaps.len(),
        alerts = report.alerts.len(),
        "Schedule report built"
    );

    Ok(data(ScheduleResponse { schedule, report }))
}

async fn schedule_csv(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let (_, tasks) = configured_tasks(&state.config)?;
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"schedule.csv\"",
            ),
        ],
        to_csv(&tasks),
    )
        .into_response())
}

/// API error type
#[derive(Debug)]
pub enum ApiError {
    Domain(DomainError),
    /// Body or query string the extractor could not decode
    Rejected(StatusCode, String),
    Internal(anyhow::Error),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::Domain(err) => StatusCode::from_u16(err.status_code())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            Self::Rejected(status, _) => *status,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            Self::Domain(err) => err.code(),
            Self::Rejected(..) => "INVALID_REQUEST",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            Self::Domain(err) => err.to_string(),
            Self::Rejected(_, text) => text.clone(),
            Self::Internal(err) => format!("{err:#}"),
        };

        if status.is_server_error() {
            tracing::error!(error = %message, code = self.code(), "API error");
        } else {
            tracing::debug!(error = %message, code = self.code(), "Request refused");
        }

        (
            status,
            Json(serde_json::json!({ "error": self.code(), "message": message })),
        )
            .into_response()
    }
}

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        Self::Domain(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::Rejected(rejection.status(), rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::Rejected(rejection.status(), rejection.body_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;
    use axum::body::{Body, to_bytes};
    use axum::http::{Method, Request};
    use serde_json::{Value, json};
    use tower::ServiceExt;

    fn state(dev_admin_fallback: bool) -> Arc<AppState> {
        let db = Database::open_in_memory().unwrap();
        db.transaction(|store| {
            store.insert_user("admin@example.com", Some("Admin User"), Role::Admin)?;
            Ok(())
        })
        .unwrap();
        let mut config = Config::default();
        config.auth.dev_admin_fallback = dev_admin_fallback;
        AppState::new(db, config)
    }

    async fn send(
        state: &Arc<AppState>,
        method: Method,
        uri: &str,
        payload: Option<Value>,
        token: Option<&str>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let request = match payload {
            Some(payload) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(payload.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = create_router(state.clone()).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    async fn create_project(state: &Arc<AppState>) -> String {
        let (status, body) = send(
            state,
            Method::POST,
            "/api/v1/projects",
            Some(json!({ "name": "Alpha Expansion", "startDate": "2025-01-01" })),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        body["data"]["id"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn health_needs_no_session() {
        let state = state(false);
        let (status, body) = send(&state, Method::GET, "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn anonymous_requests_are_unauthenticated() {
        let state = state(false);
        let (status, body) = send(&state, Method::GET, "/api/v1/projects", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "UNAUTHENTICATED");

        let (status, _) = send(
            &state,
            Method::GET,
            "/api/v1/projects",
            None,
            Some("plk_not-a-real-token"),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn bearer_token_resolves_user() {
        let state = state(false);
        let token = "plk_test1234_s3cret";
        let hash = crate::config::hash_token(token).unwrap();
        state
            .db
            .transaction(|store| {
                let user = store.find_user_by_email("admin@example.com")?.unwrap();
                store.set_token(&user.id, Some(("test1234", &hash)))
            })
            .unwrap();

        let (status, body) =
            send(&state, Method::GET, "/api/v1/projects", None, Some(token)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"], json!([]));

        // Known id, wrong secret
        let (status, _) = send(
            &state,
            Method::GET,
            "/api/v1/projects",
            None,
            Some("plk_test1234_guess"),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn unknown_token_id_skips_verification() {
        let state = state(false);
        assert!(
            resolve_session(&state, Some("plk_nobody00_s3cret".to_string()))
                .await
                .unwrap()
                .is_none()
        );
        assert!(
            resolve_session(&state, Some("plk_malformed".to_string()))
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn project_detail_round_trip() {
        let state = state(true);
        let id = create_project(&state).await;

        let (status, body) =
            send(&state, Method::GET, &format!("/api/v1/projects/{id}"), None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["name"], "Alpha Expansion");
        assert_eq!(body["data"]["members"][0]["role"], "ADMIN");

        let (status, body) = send(
            &state,
            Method::GET,
            "/api/v1/projects/missing",
            None,
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn issues_push_final_end_date() {
        let state = state(true);
        let project_id = create_project(&state).await;

        let (status, body) = send(
            &state,
            Method::POST,
            "/api/v1/tasks",
            Some(json!({
                "projectId": project_id,
                "title": "Pour slab",
                "startDate": "2025-01-01",
                "endDateOriginal": "2025-01-05",
                "priority": "HIGH"
            })),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let task_id = body["data"]["id"].as_str().unwrap().to_string();

        let (status, body) = send(
            &state,
            Method::POST,
            "/api/v1/issues",
            Some(json!({
                "taskId": task_id,
                "title": "Concrete shortage",
                "startDate": "2025-01-03",
                "durationDays": 5
            })),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["data"]["task"]["endDateFinal"], "2025-01-10");
        let issue_id = body["data"]["issueId"].as_str().unwrap().to_string();

        let (status, body) = send(
            &state,
            Method::DELETE,
            &format!("/api/v1/issues/{issue_id}"),
            None,
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["task"]["endDateFinal"], "2025-01-05");
    }

    #[tokio::test]
    async fn validation_failures_are_bad_requests() {
        let state = state(true);
        let project_id = create_project(&state).await;

        let (status, body) = send(
            &state,
            Method::POST,
            "/api/v1/tasks",
            Some(json!({
                "projectId": project_id,
                "title": "Backwards",
                "startDate": "2025-01-10",
                "endDateOriginal": "2025-01-05"
            })),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "VALIDATION_ERROR");

        let (status, body) = send(
            &state,
            Method::POST,
            "/api/v1/tasks",
            Some(json!({ "projectId": project_id })),
            None,
        )
        .await;
        assert!(status.is_client_error());
        assert_eq!(body["error"], "INVALID_REQUEST");

        let (status, _) = send(&state, Method::GET, "/api/v1/milestones", None, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn schedule_report_uses_bundled_schedule() {
        let state = state(false);
        let (status, body) = send(
            &state,
            Method::GET,
            "/api/v1/schedule?date=2025-11-04&horizonDays=-4",
            None,
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let data = &body["data"];
        assert_eq!(data["schedule"]["baselineStart"], "2025-11-05");
        assert_eq!(data["timeline"]["totalDurationDays"], 30);
        assert_eq!(data["tasks"].as_array().unwrap().len(), 10);
        assert!(data["alerts"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn schedule_csv_is_plain_text() {
        let state = state(false);
        let request = Request::builder()
            .uri("/api/v1/schedule/csv")
            .body(Body::empty())
            .unwrap();
        let response = create_router(state).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(
            response.headers()[header::CONTENT_TYPE]
                .to_str()
                .unwrap()
                .starts_with("text/csv")
        );
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.starts_with(crate::schedule::CSV_HEADER));
    }

    #[test]
    fn horizon_and_date_are_lenient() {
        let config = Config::default();
        let options = ScheduleQuery {
            horizon_days: Some("abc".to_string()),
            resource: Some(String::new()),
            date: Some("not a date".to_string()),
        }
        .report_options(&config);
        assert_eq!(options.horizon_days, 3);
        assert!(options.resource.is_none());

        let options = ScheduleQuery {
            horizon_days: Some("-2".to_string()),
            resource: Some("crane".to_string()),
            date: Some("2025-11-05".to_string()),
        }
        .report_options(&config);
        assert_eq!(options.horizon_days, 0);
        assert_eq!(options.resource.as_deref(), Some("crane"));
        assert_eq!(options.reference.to_rfc3339(), "2025-11-05T00:00:00+00:00");
    }
}
