use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::db::{Db, ReadingRow};
use crate::device::{ClockTime, ScheduleMode};
use crate::mail::Notifier;
use crate::scheduler::{Edge, ScheduleError, ScheduleSnapshot, Scheduler};
use crate::state::{SharedState, StatusResponse};

const INDEX_HTML: &str = include_str!("ui/index.html");

/// Upper bound on points returned for one chart.
const MAX_CHART_POINTS: usize = 1000;

#[derive(Clone)]
pub struct AppState {
    pub shared: SharedState,
    pub scheduler: Scheduler,
    pub db: Db,
    pub notifier: Arc<dyn Notifier>,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl From<ScheduleError> for ApiError {
    fn from(e: ScheduleError) -> Self {
        let status = match e {
            ScheduleError::UnknownGroup(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::BAD_REQUEST,
        };
        Self {
            status,
            message: e.to_string(),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        error!("request failed: {e:#}");
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: "internal error".to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

// ---------------------------------------------------------------------------
// Request / response bodies
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct DashboardStatus {
    #[serde(flatten)]
    system: StatusResponse,
    schedule: ScheduleSnapshot,
}

#[derive(Deserialize)]
struct ModeRequest {
    edge: Edge,
    mode: ScheduleMode,
    #[serde(default)]
    time: Option<String>,
}

#[derive(Deserialize)]
struct TimerRequest {
    enabled: bool,
}

#[derive(Deserialize)]
struct PowerRequest {
    on: bool,
}

#[derive(Deserialize)]
struct BrightnessRequest {
    value: i64,
}

#[derive(Deserialize)]
struct ReadingsQuery {
    range: Option<String>,
}

#[derive(Serialize)]
struct ReadingsResponse {
    range: String,
    points: Vec<ReadingRow>,
}

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/api/status", get(api_status))
        .route("/api/groups/{name}/mode", post(api_set_mode))
        .route("/api/groups/{name}/timer", post(api_set_timer))
        .route("/api/groups/{name}/power", post(api_set_power))
        .route("/api/groups/{name}/brightness", post(api_set_brightness))
        .route("/api/readings", get(api_readings))
        .route("/api/test-email", post(api_test_email))
        .with_state(state)
}

async fn index() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "text/html; charset=utf-8")], INDEX_HTML)
}

async fn api_status(State(state): State<AppState>) -> impl IntoResponse {
    let schedule = state.scheduler.status().await;
    let system = state.shared.read().await.to_status();
    Json(DashboardStatus { system, schedule })
}

async fn api_set_mode(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(req): Json<ModeRequest>,
) -> ApiResult<Json<ScheduleSnapshot>> {
    let time = match req.time.as_deref() {
        None => None,
        Some(raw) => match raw.parse::<ClockTime>() {
            Ok(t) => Some(t),
            Err(e) => {
                warn!(group = %name, time = %raw, error = %e, "rejected schedule time");
                return Err(ScheduleError::InvalidTime.into());
            }
        },
    };
    state
        .scheduler
        .set_mode(&name, req.edge, req.mode, time)
        .await?;
    Ok(Json(state.scheduler.status().await))
}

async fn api_set_timer(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(req): Json<TimerRequest>,
) -> ApiResult<Json<ScheduleSnapshot>> {
    state.scheduler.set_timer(&name, req.enabled).await?;
    Ok(Json(state.scheduler.status().await))
}

async fn api_set_power(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(req): Json<PowerRequest>,
) -> ApiResult<Json<ScheduleSnapshot>> {
    state.scheduler.force(&name, req.on).await?;
    Ok(Json(state.scheduler.status().await))
}

async fn api_set_brightness(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(req): Json<BrightnessRequest>,
) -> ApiResult<Json<ScheduleSnapshot>> {
    state.scheduler.set_brightness(&name, req.value).await?;
    Ok(Json(state.scheduler.status().await))
}

async fn api_readings(
    State(state): State<AppState>,
    Query(q): Query<ReadingsQuery>,
) -> ApiResult<Json<ReadingsResponse>> {
    let range = q.range.unwrap_or_else(|| "day".to_string());
    let days = match range.as_str() {
        "day" => 1,
        "month" => 30,
        "year" => 365,
        other => return Err(ApiError::bad_request(format!("unknown range '{other}'"))),
    };
    let since = Utc::now() - Duration::days(days);
    let points = state.db.readings_since(since, MAX_CHART_POINTS).await?;
    Ok(Json(ReadingsResponse { range, points }))
}

async fn api_test_email(State(state): State<AppState>) -> impl IntoResponse {
    state.notifier.notify(
        "pi-home test e-mail",
        "This is a test message from the pi-home hub.",
    );
    state
        .shared
        .write()
        .await
        .record_system("test e-mail requested".to_string());
    (StatusCode::ACCEPTED, Json(json!({ "status": "queued" })))
}

// ---------------------------------------------------------------------------
// Server entry-point
// ---------------------------------------------------------------------------

pub async fn serve(state: AppState, port: u16) {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = match TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            error!(%addr, error = %e, "failed to bind web port");
            return;
        }
    };

    info!("web ui listening on http://{addr}");

    if let Err(e) = axum::serve(listener, router(state)).await {
        error!(error = %e, "web server error");
    }
}

// ===========================================================================
// Tests
// ===========================================================================
