use std::sync::Arc;

use axum::{
    extract::{Path, State},
    Json,
};

use super::ApiError;
use crate::extractors::{ValidatedJson, ValidatedQuery};
use crate::models::{ChallengeChatRequest, ChatSessionQuery, SessionSnapshot};
use crate::services::AppState;

/// POST /api/v1/challenges/{challenge_id}/chat
pub async fn send_message(
    State(state): State<Arc<AppState>>,
    Path(challenge_id): Path<String>,
    ValidatedJson(payload): ValidatedJson<ChallengeChatRequest>,
) -> Result<Json<SessionSnapshot>, ApiError> {
    let engine = state.engine.clone();

    // Spawned so a client disconnect cannot cancel a turn halfway through.
    let turn = tokio::spawn(async move {
        engine
            .process_turn(&challenge_id, &payload.user_id, &payload.message)
            .await
    });

    let snapshot = turn
        .await
        .map_err(|e| anyhow::anyhow!("Chat turn task failed: {}", e))??;

    Ok(Json(snapshot))
}

/// GET /api/v1/challenges/{challenge_id}/chat?user_id=
pub async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(challenge_id): Path<String>,
    ValidatedQuery(query): ValidatedQuery<ChatSessionQuery>,
) -> Result<Json<SessionSnapshot>, ApiError> {
    let snapshot = state
        .engine
        .get_session(&challenge_id, &query.user_id)
        .await?;
    Ok(Json(snapshot))
}

/// GET /api/v1/users/{user_id}/chat-sessions
pub async fn list_user_sessions(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<Json<Vec<SessionSnapshot>>, ApiError> {
    if user_id.trim().is_empty() {
        return Err(ApiError::bad_request("user_id must not be empty"));
    }
    let sessions = state.engine.list_user_sessions(&user_id).await?;
    Ok(Json(sessions))
}
