use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use tracing::error;

use roost_types::models::MessageRecord;

use crate::auth::AppState;
use crate::middleware::Claims;

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
    /// Id-cursor pagination — pass the id of the oldest message from the
    /// previous page to fetch older messages.
    pub before: Option<i64>,
}

fn default_limit() -> u32 {
    50
}

/// Channel authorization model — all authenticated users can read all
/// channels. Per-channel ACLs are enforced before channel ids are handed
/// out, not here.
pub async fn channel_history(
    State(state): State<AppState>,
    Path(channel_id): Path<i64>,
    Query(query): Query<HistoryQuery>,
    Extension(_claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let db = state.db.clone();
    let limit = query.limit.min(200);
    let before = query.before;

    // Run blocking DB queries off the async runtime
    let rows = tokio::task::spawn_blocking(move || db.channel_messages(channel_id, limit, before))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let messages: Vec<MessageRecord> = rows.into_iter().map(Into::into).collect();
    Ok(Json(messages))
}

/// DM history is only visible to the two fixed participants.
pub async fn dm_history(
    State(state): State<AppState>,
    Path(dm_id): Path<i64>,
    Query(query): Query<HistoryQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let dm = state
        .db
        .get_dm(dm_id)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::NOT_FOUND)?;

    if dm.user1_id != claims.sub && dm.user2_id != claims.sub {
        return Err(StatusCode::FORBIDDEN);
    }

    let db = state.db.clone();
    let limit = query.limit.min(200);
    let before = query.before;

    let rows = tokio::task::spawn_blocking(move || db.dm_messages(dm_id, limit, before))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let messages: Vec<MessageRecord> = rows.into_iter().map(Into::into).collect();
    Ok(Json(messages))
}
