use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::error::ServiceError;
use crate::event::{RideRecord, RideRequest};
use crate::service::ModelService;
use crate::types::{DurationOut, InvocationResponse};

/// Invocation path of the function runtime interface emulator.
pub const INVOCATION_PATH: &str = "/2015-03-31/functions/function/invocations";

// ---------- Server state ----------

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<ModelService>,
}

type ApiError = (StatusCode, Json<Value>);

fn error_response(status: StatusCode, message: impl std::fmt::Display) -> ApiError {
    (status, Json(json!({ "error": message.to_string() })))
}

/// Run blocking service work off the async workers.
async fn run_blocking<T, F>(state: &AppState, f: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&ModelService) -> Result<T, ServiceError> + Send + 'static,
{
    let service = state.service.clone();
    tokio::task::spawn_blocking(move || f(&service))
        .await
        .map_err(|e| error_response(StatusCode::INTERNAL_SERVER_ERROR, e))?
        .map_err(|e| {
            tracing::warn!(error = %e, "request failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e)
        })
}

// ---------- Handlers ----------

async fn invoke(
    State(state): State<AppState>,
    Json(event): Json<Value>,
) -> Result<Json<InvocationResponse>, ApiError> {
    let out = run_blocking(&state, move |svc| svc.handle_value(&event)).await?;
    tracing::info!(predictions = out.predictions.len(), "invocation handled");
    Ok(Json(out))
}

async fn predict(
    State(state): State<AppState>,
    Json(req): Json<RideRequest>,
) -> Result<Json<DurationOut>, ApiError> {
    let ride = RideRecord::from(&req);
    let duration = run_blocking(&state, move |svc| svc.predict_ride(&ride)).await?;
    Ok(Json(DurationOut {
        duration,
        model_version: state.service.run_id().to_string(),
    }))
}

pub fn router(service: Arc<ModelService>) -> Router {
    Router::new()
        .route(INVOCATION_PATH, post(invoke))
        .route("/predict", post(predict))
        .with_state(AppState { service })
}

/// Serve until ctrl-c.
pub async fn serve(listener: tokio::net::TcpListener, service: Arc<ModelService>) -> std::io::Result<()> {
    let app = router(service);
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutting down");
        })
        .await
}
