use super::*;
use axum::body::Bytes;
use tracing::warn;

use crate::transcription::transcribe_audio;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct TranscribeRequest {
    #[serde(default)]
    audio_url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct TranscriptionQuery {
    #[serde(default)]
    task_id: Option<String>,
}

pub(super) async fn api_transcribe(
    headers: HeaderMap,
    State(state): State<WebState>,
    body: Bytes,
) -> Result<Response, ApiError> {
    authenticate(&state, &headers).await?;
    let body: TranscribeRequest = serde_json::from_slice(&body)
        .map_err(|e| ApiError::new(StatusCode::BAD_REQUEST, format!("Invalid request body: {e}")))?;
    let audio_url = body
        .audio_url
        .filter(|u| !u.trim().is_empty())
        .ok_or_else(|| ApiError::new(StatusCode::BAD_REQUEST, "Audio URL is required"))?;
    let Some(transcriber) = state.app_state.transcriber.clone() else {
        return Err(ApiError::internal("Transcription is not configured"));
    };

    let outcome = transcribe_audio(
        &state.app_state.transcription_tasks,
        transcriber.as_ref(),
        &audio_url,
    )
    .await;
    Ok(match outcome.result {
        Ok(text) => Json(json!({"text": text, "taskId": outcome.task_id})).into_response(),
        Err(e) => {
            warn!(target: "web", task_id = ?outcome.task_id, error = %e, "Transcription failed");
            let mut body = json!({"error": e.to_string()});
            if let Some(task_id) = outcome.task_id {
                body["taskId"] = json!(task_id);
            }
            (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
        }
    })
}

/// Unknown or expired ids answer 200 with a `not_found` status so clients
/// can poll this route without special-casing errors.
pub(super) async fn api_transcription_status(
    headers: HeaderMap,
    State(state): State<WebState>,
    Query(query): Query<TranscriptionQuery>,
) -> Result<Response, ApiError> {
    authenticate(&state, &headers).await?;
    let task_id = query
        .task_id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| ApiError::new(StatusCode::BAD_REQUEST, "Task ID is required"))?;
    Ok(match state.app_state.transcription_tasks.get(&task_id).await? {
        Some(record) => Json(record).into_response(),
        None => Json(json!({"status": "not_found", "result": null})).into_response(),
    })
}
