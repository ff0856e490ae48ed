//! Completion endpoints.

use crate::error::ApiResult;
use crate::reconciler::CompletionOutcome;
use crate::state::AppState;
use axum::Json;
use axum::extract::{Path, State};
use berth_core::{CompletionResult, UploadKey};

/// POST /v1/uploads/{upload_key}/complete - Retry completion.
///
/// Reruns reconciliation for a received session. When the session was
/// already committed, returns the record it produced.
#[tracing::instrument(skip(state))]
pub async fn complete_upload(
    State(state): State<AppState>,
    Path(upload_key): Path<String>,
) -> ApiResult<Json<CompletionOutcome>> {
    let upload_key = UploadKey::parse(&upload_key)?;
    let outcome = state.engine.complete(&upload_key).await?;
    Ok(Json(outcome))
}

/// GET /v1/uploads/{upload_key} - Completion result of a committed upload.
pub async fn get_upload(
    State(state): State<AppState>,
    Path(upload_key): Path<String>,
) -> ApiResult<Json<CompletionResult>> {
    let upload_key = UploadKey::parse(&upload_key)?;
    let result = state.engine.committed_result(&upload_key).await?;
    Ok(Json(result))
}
