//! HTTP handlers for the calculation API.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use uuid::Uuid;

use crate::error::Result;
use crate::AppState;

use super::framework::FrameworkCatalog;
use super::requests::{
    CompareRequest, ForwardRequest, ModeRequest, ReverseRequest, SelectModelsRequest,
    SelectionRequest, UpdateInputsRequest,
};
use super::responses::{ComparisonResponse, ForwardResponse, ModelResponse, ReverseResponse, RunResponse};
use super::services;
use super::state::CalculationState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/models", get(list_models))
        .route("/api/models/:id", get(get_model))
        .route("/api/framework", get(framework))
        .route("/api/calculate/forward", post(forward))
        .route("/api/calculate/reverse", post(reverse))
        .route("/api/calculate/compare", post(compare))
        .route("/api/sessions", post(create_session))
        .route("/api/sessions/:id", get(get_session).delete(delete_session))
        .route("/api/sessions/:id/inputs", put(update_inputs))
        .route("/api/sessions/:id/models", put(select_models))
        .route("/api/sessions/:id/selection", put(set_selection))
        .route("/api/sessions/:id/mode", post(set_mode))
        .route("/api/sessions/:id/run", post(run))
}

async fn list_models(State(state): State<AppState>) -> Json<Vec<ModelResponse>> {
    Json(
        state
            .engine
            .registry
            .list()
            .map(|m| ModelResponse::from(m.as_ref()))
            .collect(),
    )
}

async fn get_model(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ModelResponse>> {
    let model = state.engine.registry.get(&id)?;
    Ok(Json(ModelResponse::from(model.as_ref())))
}

async fn framework(State(state): State<AppState>) -> Json<FrameworkCatalog> {
    Json((*state.engine.catalog).clone())
}

async fn forward(
    State(state): State<AppState>,
    Json(req): Json<ForwardRequest>,
) -> Result<Json<ForwardResponse>> {
    Ok(Json(services::calculate_forward(&state.engine, &req)?))
}

async fn reverse(
    State(state): State<AppState>,
    Json(req): Json<ReverseRequest>,
) -> Result<Json<ReverseResponse>> {
    Ok(Json(services::calculate_reverse(&state.engine, &req)?))
}

async fn compare(
    State(state): State<AppState>,
    Json(req): Json<CompareRequest>,
) -> Result<Json<ComparisonResponse>> {
    Ok(Json(services::calculate_comparison(&state.engine, &req)?))
}

async fn create_session(State(state): State<AppState>) -> (StatusCode, Json<CalculationState>) {
    (StatusCode::CREATED, Json(state.sessions.create().await))
}

async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<CalculationState>> {
    state
        .sessions
        .get(id)
        .await
        .map(Json)
        .ok_or(crate::error::AppError::SessionNotFound(id))
}

async fn delete_session(State(state): State<AppState>, Path(id): Path<Uuid>) -> StatusCode {
    if state.sessions.remove(id).await {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

async fn update_inputs(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateInputsRequest>,
) -> Result<Json<CalculationState>> {
    let updated = services::update_session(&state.sessions, id, |session| {
        services::apply_inputs(&state.engine, session, req)
    })
    .await?;
    Ok(Json(updated))
}

async fn select_models(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<SelectModelsRequest>,
) -> Result<Json<CalculationState>> {
    let updated = services::update_session(&state.sessions, id, |session| {
        services::apply_model_selection(&state.engine, session, req.model_ids)
    })
    .await?;
    Ok(Json(updated))
}

async fn set_selection(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<SelectionRequest>,
) -> Result<Json<CalculationState>> {
    let updated = services::update_session(&state.sessions, id, |session| {
        services::apply_framework_selection(&state.engine, session, req.selection)
    })
    .await?;
    Ok(Json(updated))
}

async fn set_mode(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<ModeRequest>,
) -> Result<Json<CalculationState>> {
    let updated =
        services::update_session(&state.sessions, id, |session| services::apply_mode(session, req))
            .await?;
    Ok(Json(updated))
}

async fn run(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<RunResponse>> {
    let snapshot = state
        .sessions
        .get(id)
        .await
        .ok_or(crate::error::AppError::SessionNotFound(id))?;
    Ok(Json(services::run_session(&state.engine, &snapshot)?))
}
