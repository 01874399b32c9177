use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use serde_json::json;
use tracing::{error, info, warn};

use regpulse_common::RegPulseError;
use regpulse_crawler::Pipeline;
use regpulse_store::EventFilter;

use crate::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/crawl", post(crawl_trigger))
        .route("/api/crawl/status", get(crawl_status))
        .route("/api/brief", get(brief))
        .route("/api/events", get(events))
        .route("/api/events/{id}", get(event_detail))
        .route("/api/laws", get(laws))
        .route("/api/laws/rebuild", post(rebuild_laws))
        .route("/api/laws/{law_key}", get(law_detail))
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

/// Start a crawl in the background. Returns immediately with `started`, or
/// `conflict` while another run is in flight.
async fn crawl_trigger(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let pipeline = match Pipeline::new(state.store.clone(), &state.config) {
        Ok(pipeline) => pipeline,
        Err(RegPulseError::Config(message)) => {
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({"error": message})),
            )
                .into_response();
        }
        Err(e) => return internal_error(e),
    };

    match state.store.latest_run().await {
        Ok(Some(run)) if run.status == "running" => {
            return (
                StatusCode::CONFLICT,
                Json(json!({"status": "conflict", "run_id": run.id})),
            )
                .into_response();
        }
        Ok(_) => {}
        Err(e) => return internal_error(e),
    }

    tokio::spawn(async move {
        match pipeline.run().await {
            Ok(result) => info!(run_id = result.run_id, "Background crawl finished"),
            Err(RegPulseError::CrawlConflict) => {
                // Lost a race with another trigger; the winner's run covers us.
                warn!("Crawl skipped: another run won the start race");
            }
            Err(e) => error!(error = %e, "Background crawl failed"),
        }
    });

    (StatusCode::ACCEPTED, Json(json!({"status": "started"}))).into_response()
}

/// Latest crawl run row; `never_run` sentinel when the table is empty.
async fn crawl_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.store.latest_run().await {
        Ok(Some(run)) => Json(json!(run)).into_response(),
        Ok(None) => Json(json!({"status": "never_run"})).into_response(),
        Err(e) => internal_error(e),
    }
}

async fn brief(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let limit = params
        .get("limit")
        .and_then(|v| v.parse().ok())
        .unwrap_or(10);
    match state.store.brief(limit).await {
        Ok(brief) => Json(json!(brief)).into_response(),
        Err(e) => internal_error(e),
    }
}

/// Paginated, filtered event list. Multi-valued filters come in as
/// comma-separated query params.
async fn events(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let filter = EventFilter {
        jurisdictions: csv_param(&params, "jurisdictions"),
        stages: csv_param(&params, "stages"),
        age_bracket: params.get("age_bracket").cloned(),
        min_risk: params.get("min_risk").and_then(|v| v.parse().ok()),
        max_risk: params.get("max_risk").and_then(|v| v.parse().ok()),
        date_from: params.get("date_from").cloned(),
        date_to: params.get("date_to").cloned(),
        q: params.get("q").cloned(),
        sort: params.get("sort").cloned(),
        order: params.get("order").cloned(),
    };
    let page = params.get("page").and_then(|v| v.parse().ok()).unwrap_or(1);
    let limit = params
        .get("limit")
        .and_then(|v| v.parse().ok())
        .unwrap_or(25);

    match state.store.events_page(&filter, page, limit).await {
        Ok(events_page) => {
            let mut headers = HeaderMap::new();
            headers.insert("X-Total-Count", header_value(events_page.total));
            headers.insert("X-Total-Pages", header_value(events_page.total_pages));
            headers.insert("X-Current-Page", header_value(events_page.page));
            (headers, Json(json!(events_page))).into_response()
        }
        Err(e) => internal_error(e),
    }
}

async fn event_detail(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.store.event_detail(&id).await {
        Ok(Some(detail)) => Json(json!(detail)).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": "Event not found"})),
        )
            .into_response(),
        Err(e) => internal_error(e),
    }
}

async fn laws(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let jurisdiction = params.get("jurisdiction").map(String::as_str);
    let min_risk = params.get("min_risk").and_then(|v| v.parse().ok());
    match state.store.laws_list(jurisdiction, min_risk).await {
        Ok(laws) => Json(json!(laws)).into_response(),
        Err(e) => internal_error(e),
    }
}

async fn law_detail(
    State(state): State<Arc<AppState>>,
    Path(law_key): Path<String>,
) -> impl IntoResponse {
    match state.store.law_detail(&law_key).await {
        Ok(Some(detail)) => Json(json!(detail)).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": "Law not found"})),
        )
            .into_response(),
        Err(e) => internal_error(e),
    }
}

/// On-demand law backfill.
async fn rebuild_laws(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.store.backfill_laws().await {
        Ok(summary) => Json(json!(summary)).into_response(),
        Err(e) => {
            error!(error = %e, "On-demand backfill failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "Backfill failed"})),
            )
                .into_response()
        }
    }
}

// --- helpers ---

fn csv_param(params: &HashMap<String, String>, key: &str) -> Vec<String> {
    params
        .get(key)
        .map(|raw| {
            raw.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

fn header_value(n: i64) -> HeaderValue {
    HeaderValue::from_str(&n.to_string()).unwrap_or_else(|_| HeaderValue::from_static("0"))
}

fn internal_error(e: impl std::fmt::Display) -> axum::response::Response {
    error!(error = %e, "Request failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"error": "Internal error"})),
    )
        .into_response()
}
