//! API request handlers

use super::middleware::RequestId;
use super::models::{
    ChatCompletionRequest, ChatRequest, DrainRequest, DrainResponse, HealthResponse, ModelCard,
    ModelsResponse, StopResponse, SwitchRequest,
};
use super::routes::AppState;
use crate::error::SwitchboardError;
use crate::orchestrator::{
    CancelOutcome, GatewayStatus, JobResult, JobStatusView, QueueInfo, SubmittedJob, SwitchOutcome,
};
use crate::slot::LifecycleState;
use axum::{
    Extension, Json,
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};

/// GET /health - Gateway and job store liveness
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let store_ok = match state.orchestrator.store().len().await {
        Ok(_) => true,
        Err(e) => {
            tracing::warn!(error = %e, "Job store unreachable");
            false
        }
    };

    (
        StatusCode::OK,
        Json(HealthResponse {
            status: if store_ok { "ok" } else { "degraded" }.to_string(),
            store_ok,
            timestamp: chrono::Utc::now(),
        }),
    )
}

/// GET /metrics - Prometheus metrics
pub async fn metrics(State(state): State<AppState>) -> String {
    state.prometheus_handle.render()
}

/// GET /status - Slot state, queue length and uptime
pub async fn status(State(state): State<AppState>) -> Result<Json<GatewayStatus>, SwitchboardError> {
    Ok(Json(state.orchestrator.status().await?))
}

/// GET /queue - Queue length, current job and drain flag
pub async fn queue_info(State(state): State<AppState>) -> Result<Json<QueueInfo>, SwitchboardError> {
    Ok(Json(state.orchestrator.queue_info().await?))
}

/// POST /admin/switch - Switch now, or queue the switch at the front
pub async fn admin_switch(
    State(state): State<AppState>,
    Json(req): Json<SwitchRequest>,
) -> Result<Json<SwitchOutcome>, SwitchboardError> {
    tracing::info!(model = %req.model, "Admin switch requested");
    Ok(Json(state.orchestrator.force_switch(&req.model).await?))
}

/// POST /admin/drain - Toggle drain mode; an empty body enables it
pub async fn admin_drain(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<DrainResponse>, SwitchboardError> {
    let req = if body.iter().all(u8::is_ascii_whitespace) {
        DrainRequest::default()
    } else {
        serde_json::from_slice::<DrainRequest>(&body)
            .map_err(|e| SwitchboardError::BadRequest(format!("Invalid drain request: {e}")))?
    };

    state.orchestrator.set_drain_mode(req.enabled);
    Ok(Json(DrainResponse {
        drain_mode: state.orchestrator.drain_mode(),
    }))
}

/// POST /admin/stop - Tear down the active backend
pub async fn admin_stop(State(state): State<AppState>) -> Result<Json<StopResponse>, SwitchboardError> {
    let controller = state.orchestrator.controller();
    controller.stop_current().await?;

    Ok(Json(StopResponse {
        stopped: true,
        active_model: controller.active_model().await,
    }))
}

/// GET /v1/models - Configured models plus the active one
pub async fn list_models(State(state): State<AppState>) -> Json<ModelsResponse> {
    let controller = state.orchestrator.controller();
    let snapshot = controller.snapshot().await;

    Json(ModelsResponse {
        object: "list".to_string(),
        data: controller
            .models()
            .map(|model| ModelCard::new(model.name.clone()))
            .collect(),
        active_model: snapshot.active_model,
        backend_ready: snapshot.state == LifecycleState::Ready,
    })
}

/// POST /v1/chat/completions - Queue by default, proxy directly with `"async": false`
pub async fn chat_completions(
    State(state): State<AppState>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    Json(req): Json<ChatCompletionRequest>,
) -> Result<Response, SwitchboardError> {
    reject_streaming(&req.chat)?;
    let payload = req.chat.to_payload();

    if !req.async_mode {
        let response = state
            .orchestrator
            .submit_sync(&req.chat.model, payload)
            .await?;
        return Ok(Json(response).into_response());
    }

    let submitted = state
        .orchestrator
        .submit_async(&req.chat.model, payload, Some(request_id))
        .await?;
    Ok(Json(submitted).into_response())
}

/// POST /jobs - Queue a chat job
pub async fn create_job(
    State(state): State<AppState>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<SubmittedJob>, SwitchboardError> {
    reject_streaming(&req)?;

    let submitted = state
        .orchestrator
        .submit_async(&req.model, req.to_payload(), Some(request_id))
        .await?;
    Ok(Json(submitted))
}

/// GET /jobs/{id} - Derived job status
pub async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<JobStatusView>, SwitchboardError> {
    Ok(Json(state.orchestrator.get_status(&id).await?))
}

/// GET /jobs/{id}/result - Backend response of a finished job
pub async fn get_job_result(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<JobResult>, SwitchboardError> {
    Ok(Json(state.orchestrator.job_result(&id).await?))
}

/// POST /jobs/{id}/cancel - Remove a queued job or hard-cancel a running one
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<CancelOutcome>, SwitchboardError> {
    Ok(Json(state.orchestrator.cancel(&id).await?))
}

fn reject_streaming(req: &ChatRequest) -> Result<(), SwitchboardError> {
    if req.stream {
        return Err(SwitchboardError::BadRequest(
            "Streaming responses are not supported".to_string(),
        ));
    }
    Ok(())
}
