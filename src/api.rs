use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::json;

use crate::phase::Phase;
use crate::runner;
use crate::state::{AppState, RunnerPhase};
use crate::stats::{RunReport, SessionStats};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/start", post(start_run))
        .route("/stop", post(stop_run))
        .route("/reset", post(reset_session))
        .route("/status", get(get_status))
        .route("/report", get(get_report))
        .route("/fights", get(get_fights))
        .with_state(state)
}

fn check_auth(headers: &HeaderMap, expected_token: &str) -> Result<(), StatusCode> {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .ok_or(StatusCode::UNAUTHORIZED)?;

    if let Some(token) = auth.strip_prefix("Bearer ")
        && token == expected_token
    {
        return Ok(());
    }

    Err(StatusCode::UNAUTHORIZED)
}

/// Spawn a run unless one is already going. Shared with autostart.
pub async fn spawn_run(state: &AppState) -> bool {
    let mut s = state.lock().await;
    if s.runner != RunnerPhase::Idle {
        return false;
    }
    s.begin_run();

    let app_state = state.clone();
    s.runner_handle = Some(tokio::spawn(async move {
        runner::run_arena(app_state).await;
    }));
    true
}

async fn start_run(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, StatusCode> {
    {
        let s = state.lock().await;
        check_auth(&headers, &s.config.auth_token)?;
    }

    if !spawn_run(&state).await {
        return Err(StatusCode::CONFLICT);
    }
    Ok(Json(json!({"status": "started"})))
}

async fn stop_run(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, StatusCode> {
    let mut s = state.lock().await;
    check_auth(&headers, &s.config.auth_token)?;

    let Some(handle) = s.runner_handle.take() else {
        return Ok(Json(json!({"status": "idle"})));
    };
    handle.abort();

    let started_at = s.started_at.unwrap_or_else(chrono::Utc::now);
    let report = RunReport::failed(&s.config.profile, "stopped by operator", s.live_stats, started_at);
    s.finish_run(report);

    Ok(Json(json!({"status": "stopped"})))
}

async fn reset_session(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, StatusCode> {
    {
        let s = state.lock().await;
        check_auth(&headers, &s.config.auth_token)?;
    }

    match runner::reset_session(&state).await {
        Ok(true) => Ok(Json(json!({"status": "reset"}))),
        Ok(false) => Err(StatusCode::CONFLICT),
        Err(e) => {
            tracing::error!("session reset failed: {e:#}");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

#[derive(Serialize)]
struct StatusResponse {
    profile: String,
    runner: RunnerPhase,
    running: bool,
    arena_phase: Option<Phase>,
    stats: SessionStats,
    fights_target: u32,
}

async fn get_status(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, StatusCode> {
    let s = state.lock().await;
    check_auth(&headers, &s.config.auth_token)?;

    Ok(Json(StatusResponse {
        profile: s.config.profile.clone(),
        runner: s.runner,
        running: s.runner != RunnerPhase::Idle,
        arena_phase: s.arena_phase,
        stats: s.live_stats,
        fights_target: s.config.arena.fights,
    }))
}

async fn get_report(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, StatusCode> {
    let s = state.lock().await;
    check_auth(&headers, &s.config.auth_token)?;

    let report = s.last_report.clone().ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(report))
}

async fn get_fights(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, StatusCode> {
    let s = state.lock().await;
    check_auth(&headers, &s.config.auth_token)?;

    Ok(Json(s.fights.clone()))
}
