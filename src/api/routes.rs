//! API route definitions.

use super::state::AppState;
use crate::detect::engine::ActionOutcome;
use crate::detect::AlertStatus;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt::Display;
use tracing::{error, info};
use uuid::Uuid;

const DEFAULT_LOOKBACK_DAYS: u32 = 90;
const DEFAULT_SINCE_DAYS: i64 = 30;
const DEFAULT_RECENT_DAYS: i64 = 7;

type ApiResponse = (StatusCode, Json<Value>);

pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/detect/{metric}", post(run_detection))
        .route("/alerts", get(list_alerts))
        .route("/alerts/{id}", get(get_alert))
        .route("/alerts/{id}/acknowledge", post(acknowledge_alert))
        .route("/alerts/{id}/resolve", post(resolve_alert))
        .route("/dashboard/summary", get(dashboard_summary))
        .route("/records", post(add_record))
}

fn meta() -> Value {
    json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION")
    })
}

fn respond<T: Serialize>(status: StatusCode, data: &T) -> ApiResponse {
    match serde_json::to_value(data) {
        Ok(data) => (status, Json(json!({ "data": data, "meta": meta() }))),
        Err(e) => failure(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

fn failure(status: StatusCode, err: impl Display) -> ApiResponse {
    (
        status,
        Json(json!({ "error": { "message": err.to_string() }, "meta": meta() })),
    )
}

/// Day windows must be non-negative; values past the calendar mean "everything".
fn day_window(name: &str, value: Option<i64>, default: i64) -> Result<i64, ApiResponse> {
    match value.unwrap_or(default) {
        days if days < 0 => Err(failure(
            StatusCode::BAD_REQUEST,
            format!("{} must not be negative", name),
        )),
        days => Ok(days),
    }
}

async fn health(State(state): State<AppState>) -> ApiResponse {
    let registry = state.engine.registry();
    let unavailable: Vec<Value> = registry
        .unavailable()
        .iter()
        .map(|u| json!({ "method": u.method, "reason": u.reason }))
        .collect();

    respond(
        StatusCode::OK,
        &json!({
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION"),
            "detectors": {
                "available": registry.available_methods(),
                "unavailable": unavailable
            }
        }),
    )
}

#[derive(Debug, Deserialize)]
struct DetectQuery {
    lookback_days: Option<u32>,
}

async fn run_detection(
    State(state): State<AppState>,
    Path(metric): Path<String>,
    Query(query): Query<DetectQuery>,
) -> ApiResponse {
    let lookback = query.lookback_days.unwrap_or(DEFAULT_LOOKBACK_DAYS);
    match state.engine.run_detection(&metric, lookback).await {
        Ok(report) => respond(StatusCode::OK, &report),
        Err(e) => {
            error!(metric = %metric, "Detection request failed: {:#}", e);
            failure(StatusCode::INTERNAL_SERVER_ERROR, format!("{:#}", e))
        }
    }
}

#[derive(Debug, Deserialize)]
struct AlertsQuery {
    metric_name: Option<String>,
    status: Option<AlertStatus>,
    since_days: Option<i64>,
}

async fn list_alerts(State(state): State<AppState>, Query(query): Query<AlertsQuery>) -> ApiResponse {
    let since = match day_window("since_days", query.since_days, DEFAULT_SINCE_DAYS) {
        Ok(days) => days,
        Err(rejected) => return rejected,
    };
    match state.engine.list_alerts(query.metric_name, query.status, since).await {
        Ok(alerts) => {
            let total = alerts.len();
            match serde_json::to_value(&alerts) {
                Ok(data) => (
                    StatusCode::OK,
                    Json(json!({ "data": data, "meta": { "total": total, "since_days": since } })),
                ),
                Err(e) => failure(StatusCode::INTERNAL_SERVER_ERROR, e),
            }
        }
        Err(e) => failure(StatusCode::INTERNAL_SERVER_ERROR, format!("{:#}", e)),
    }
}

async fn get_alert(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResponse {
    match state.engine.get_alert(id).await {
        Ok(Some(alert)) => respond(StatusCode::OK, &alert),
        Ok(None) => failure(StatusCode::NOT_FOUND, format!("alert {} not found", id)),
        Err(e) => failure(StatusCode::INTERNAL_SERVER_ERROR, format!("{:#}", e)),
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct AcknowledgeRequest {
    assigned_to: Option<String>,
    notes: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResolveRequest {
    resolution: String,
}

fn outcome_response(outcome: ActionOutcome) -> ApiResponse {
    let status = if outcome.success {
        StatusCode::OK
    } else if outcome.not_found {
        StatusCode::NOT_FOUND
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    respond(status, &outcome)
}

async fn acknowledge_alert(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<AcknowledgeRequest>,
) -> ApiResponse {
    let outcome = state.engine.acknowledge_alert(id, req.assigned_to, req.notes).await;
    outcome_response(outcome)
}

async fn resolve_alert(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<ResolveRequest>,
) -> ApiResponse {
    let outcome = state.engine.resolve_alert(id, req.resolution).await;
    outcome_response(outcome)
}

#[derive(Debug, Deserialize)]
struct SummaryQuery {
    recent_days: Option<i64>,
}

async fn dashboard_summary(State(state): State<AppState>, Query(query): Query<SummaryQuery>) -> ApiResponse {
    let recent = match day_window("recent_days", query.recent_days, DEFAULT_RECENT_DAYS) {
        Ok(days) => days,
        Err(rejected) => return rejected,
    };
    match state.engine.get_dashboard_summary(recent).await {
        Ok(summary) => respond(StatusCode::OK, &summary),
        Err(e) => failure(StatusCode::INTERNAL_SERVER_ERROR, format!("{:#}", e)),
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct RecordRequest {
    metric_name: String,
    date: NaiveDate,
    amount: f64,
}

async fn add_record(State(state): State<AppState>, Json(req): Json<RecordRequest>) -> ApiResponse {
    if req.metric_name.trim().is_empty() {
        return failure(StatusCode::BAD_REQUEST, "metric_name must not be empty");
    }
    if !req.amount.is_finite() {
        return failure(StatusCode::BAD_REQUEST, "amount must be a finite number");
    }

    let records = state.records.clone();
    let (metric, date, amount) = (req.metric_name.clone(), req.date, req.amount);
    let result = tokio::task::spawn_blocking(move || records.record(&metric, date, amount)).await;

    match result {
        Ok(Ok(())) => {
            info!(metric = %req.metric_name, date = %req.date, amount = req.amount, "Record stored");
            respond(StatusCode::CREATED, &req)
        }
        Ok(Err(e)) => failure(StatusCode::INTERNAL_SERVER_ERROR, format!("{:#}", e)),
        Err(e) => failure(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}
