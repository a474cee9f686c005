use std::{
    str::FromStr,
    sync::Arc,
    time::{Duration, Instant},
};

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::{Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::{format_description::well_known::Rfc3339, macros::format_description, Date, OffsetDateTime, UtcOffset};

use costreport_core::{
    parse_integral, Category, CostRecord, CreateCostCommand, CreateUserCommand, Report, ReportKey,
    User,
};

use crate::{error::Error, services::Services, users::UserSummary};

#[derive(Clone)]
pub struct AppState {
    pub services: Arc<Services>,
    pub timeout: Duration,
    pub metrics: Option<PrometheusHandle>,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Service(#[from] Error),
    #[error("Request timed out")]
    Timeout,
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Service(Error::Validation(_)) | ApiError::Service(Error::AlreadyExists(_)) => StatusCode::BAD_REQUEST,
            ApiError::Service(Error::NotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Service(Error::StoreUnavailable(_)) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Timeout => StatusCode::GATEWAY_TIMEOUT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    id: u16,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }
        (status, Json(ErrorBody {
            id: status.as_u16(),
            message: self.to_string(),
        }))
        .into_response()
    }
}

/// Unreadable bodies (bad JSON, wrong field types, missing content type) are
/// validation failures like any other.
impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::Service(Error::Validation(rejection.body_text()))
    }
}

fn invalid(message: &str) -> ApiError {
    ApiError::Service(Error::Validation(message.to_string()))
}

/// Runs a blocking store operation off the async workers, bounded by the
/// configured timeout. Every store mutation is a single statement or
/// transaction, so a call abandoned on timeout either commits fully or not at
/// all.
async fn run_blocking<T, F>(state: &AppState, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&Services) -> Result<T, Error> + Send + 'static,
    T: Send + 'static,
{
    let services = state.services.clone();
    let task = tokio::task::spawn_blocking(move || f(&services));
    match tokio::time::timeout(state.timeout, task).await {
        Ok(Ok(result)) => Ok(result?),
        Ok(Err(e)) => Err(ApiError::Internal(e.to_string())),
        Err(_) => Err(ApiError::Timeout),
    }
}

pub fn build_router(state: AppState, cleanup_routes: bool) -> Router {
    let report_routes = if cleanup_routes {
        get(get_report).delete(delete_report)
    } else {
        get(get_report)
    };

    Router::new()
        .route("/api/report", report_routes.clone())
        .route("/api/report/", report_routes)
        .route("/api/add", post(add_cost))
        .route("/api/add/", post(add_cost))
        .route("/api/users", get(list_users).post(add_user))
        .route("/api/users/:id", get(get_user))
        .route("/health", get(health))
        .route("/metrics", get(render_metrics))
        .layer(middleware::from_fn(log_requests))
        .with_state(state)
}

async fn log_requests<B>(req: Request<B>, next: Next<B>) -> Response {
    let method = req.method().clone();
    let uri = req.uri().clone();
    let start = Instant::now();

    let response = next.run(req).await;

    tracing::info!(
        %method,
        %uri,
        status = response.status().as_u16(),
        latency_ms = start.elapsed().as_millis() as u64,
        "{} {} {}",
        method,
        uri,
        response.status().as_u16()
    );
    response
}

async fn health() -> &'static str {
    "OK"
}

async fn render_metrics(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => handle.render().into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

// --- reports ---

#[derive(Debug, Default, Deserialize)]
struct ReportQuery {
    id: Option<String>,
    user_id: Option<String>,
    year: Option<String>,
    month: Option<String>,
}

impl ReportQuery {
    fn key(&self) -> Result<ReportKey, Error> {
        fn given(v: &Option<String>) -> Option<&str> {
            v.as_deref().filter(|s| !s.trim().is_empty())
        }
        // An empty `user_id=` falls back to `id`.
        let user_id = given(&self.user_id).or(given(&self.id)).unwrap_or_default();
        Ok(ReportKey::parse(
            user_id,
            self.year.as_deref().unwrap_or_default(),
            self.month.as_deref().unwrap_or_default(),
        )?)
    }
}

async fn get_report(
    State(state): State<AppState>,
    Query(query): Query<ReportQuery>,
) -> Result<Json<Report>, ApiError> {
    let key = query.key()?;
    let report = run_blocking(&state, move |s| s.reports.get_or_create(&key)).await?;
    Ok(Json(report))
}

#[derive(Debug, Deserialize)]
struct ReportKeyBody {
    #[serde(default)]
    user_id: Value,
    #[serde(default)]
    year: Value,
    #[serde(default)]
    month: Value,
}

#[derive(Serialize)]
struct DeleteResponse {
    status: &'static str,
    removed: bool,
}

async fn delete_report(
    State(state): State<AppState>,
    payload: Result<Json<ReportKeyBody>, JsonRejection>,
) -> Result<Json<DeleteResponse>, ApiError> {
    let Json(body) = payload?;
    let key = ReportKey::parse(&value_text(&body.user_id), &value_text(&body.year), &value_text(&body.month))
        .map_err(Error::from)?;
    let removed = run_blocking(&state, move |s| s.reports.evict(&key)).await?;
    Ok(Json(DeleteResponse {
        status: "success",
        removed,
    }))
}

// --- costs ---

#[derive(Debug, Default, Deserialize)]
struct AddCostRequest {
    description: Option<String>,
    category: Option<String>,
    userid: Option<Value>,
    user_id: Option<Value>,
    sum: Option<Value>,
    #[serde(rename = "createdAt")]
    created_at: Option<String>,
}

impl AddCostRequest {
    fn into_command(self) -> Result<CreateCostCommand, ApiError> {
        let (Some(description), Some(category), Some(user_id), Some(sum)) =
            (self.description, self.category, self.userid.or(self.user_id), self.sum)
        else {
            return Err(invalid("Missing required fields"));
        };
        if description.is_empty() || category.is_empty() {
            return Err(invalid("Missing required fields"));
        }

        let user_id = value_to_i64(&user_id).ok_or_else(|| invalid("Invalid numeric fields"))?;
        let amount = value_to_decimal(&sum).ok_or_else(|| invalid("Invalid numeric fields"))?;
        let category = Category::from_str(&category).map_err(Error::from)?;
        let date = match self.created_at {
            Some(raw) => Some(parse_date(&raw).ok_or_else(|| invalid("Invalid createdAt"))?),
            None => None,
        };

        Ok(CreateCostCommand {
            user_id,
            description,
            category,
            amount,
            date,
        })
    }
}

#[derive(Debug, Serialize)]
struct CostResponse {
    id: u64,
    userid: i64,
    description: String,
    category: Category,
    #[serde(with = "rust_decimal::serde::float")]
    sum: Decimal,
    year: i32,
    month: u8,
    day: u8,
}

impl From<CostRecord> for CostResponse {
    fn from(cost: CostRecord) -> Self {
        Self {
            id: cost.id,
            userid: cost.user_id,
            year: cost.year(),
            month: cost.month(),
            day: cost.day(),
            description: cost.description,
            category: cost.category,
            sum: cost.amount,
        }
    }
}

async fn add_cost(
    State(state): State<AppState>,
    payload: Result<Json<AddCostRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<CostResponse>), ApiError> {
    let Json(body) = payload?;
    let command = body.into_command()?;
    let cost = run_blocking(&state, move |s| s.costs.add_cost(command)).await?;
    Ok((StatusCode::CREATED, Json(cost.into())))
}

// --- users ---

#[derive(Debug, Default, Deserialize)]
struct AddUserRequest {
    id: Option<Value>,
    first_name: Option<String>,
    last_name: Option<String>,
    birthday: Option<String>,
}

impl AddUserRequest {
    fn into_command(self) -> Result<CreateUserCommand, ApiError> {
        let (Some(id), Some(first_name), Some(last_name), Some(birthday)) =
            (self.id, self.first_name, self.last_name, self.birthday)
        else {
            return Err(invalid("Missing required fields"));
        };
        if id.is_null() {
            return Err(invalid("Missing required fields"));
        }

        Ok(CreateUserCommand {
            id: value_to_i64(&id).ok_or_else(|| invalid("Invalid id"))?,
            first_name,
            last_name,
            birthday: parse_date(&birthday).ok_or_else(|| invalid("Invalid birthday format"))?,
        })
    }
}

#[derive(Debug, Serialize)]
struct UserResponse {
    id: i64,
    first_name: String,
    last_name: String,
    birthday: String,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            birthday: user.birthday.to_string(),
            first_name: user.first_name,
            last_name: user.last_name,
        }
    }
}

#[derive(Debug, Serialize)]
struct UserSummaryResponse {
    first_name: String,
    last_name: String,
    id: i64,
    #[serde(with = "rust_decimal::serde::float")]
    total: Decimal,
}

impl From<UserSummary> for UserSummaryResponse {
    fn from(summary: UserSummary) -> Self {
        Self {
            first_name: summary.user.first_name,
            last_name: summary.user.last_name,
            id: summary.user.id,
            total: summary.total,
        }
    }
}

async fn add_user(
    State(state): State<AppState>,
    payload: Result<Json<AddUserRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<UserResponse>), ApiError> {
    let Json(body) = payload?;
    let command = body.into_command()?;
    let user = run_blocking(&state, move |s| s.users.add_user(command)).await?;
    Ok((StatusCode::CREATED, Json(user.into())))
}

async fn get_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<UserSummaryResponse>, ApiError> {
    let id = parse_integral(&id).ok_or_else(|| invalid("Invalid user id"))?;
    let summary = run_blocking(&state, move |s| s.users.get_user_summary(id)).await?;
    Ok(Json(summary.into()))
}

async fn list_users(State(state): State<AppState>) -> Result<Json<Vec<UserResponse>>, ApiError> {
    let users = run_blocking(&state, |s| s.users.list_users()).await?;
    Ok(Json(users.into_iter().map(UserResponse::from).collect()))
}

// --- value coercion ---

fn value_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => String::new(),
    }
}

fn value_to_i64(v: &Value) -> Option<i64> {
    match v {
        Value::Number(_) | Value::String(_) => parse_integral(&value_text(v)),
        _ => None,
    }
}

fn value_to_decimal(v: &Value) -> Option<Decimal> {
    let text = match v {
        Value::Number(_) | Value::String(_) => value_text(v),
        _ => return None,
    };
    let text = text.trim();
    Decimal::from_str(text)
        .or_else(|_| Decimal::from_scientific(text))
        .ok()
}

/// Accepts a bare `YYYY-MM-DD` or a full RFC 3339 timestamp
/// (`2024-05-10T08:00:00+02:00`), which is taken as its UTC date.
fn parse_date(raw: &str) -> Option<Date> {
    let raw = raw.trim();
    if let Ok(date) = Date::parse(raw, &format_description!("[year]-[month]-[day]")) {
        return Some(date);
    }
    OffsetDateTime::parse(raw, &Rfc3339)
        .ok()
        .map(|dt| dt.to_offset(UtcOffset::UTC).date())
}
