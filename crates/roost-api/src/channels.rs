use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};

use roost_types::api::{
    CreateChannelRequest, CreateServerRequest, CreateServerResponse, OpenDmRequest,
    OpenDmResponse,
};
use roost_types::models::Channel;

use crate::auth::AppState;
use crate::middleware::Claims;

pub async fn create_server(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateServerRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    if req.name.is_empty() || req.name.len() > 100 {
        return Err(StatusCode::BAD_REQUEST);
    }

    let server_id = state
        .db
        .create_server(&req.name, claims.sub)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let default_channel_id = state
        .db
        .create_channel(server_id, "general")
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok((
        StatusCode::CREATED,
        Json(CreateServerResponse {
            server_id,
            default_channel_id,
        }),
    ))
}

pub async fn create_channel(
    State(state): State<AppState>,
    Path(server_id): Path<i64>,
    Extension(_claims): Extension<Claims>,
    Json(req): Json<CreateChannelRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    if req.name.is_empty() || req.name.len() > 100 {
        return Err(StatusCode::BAD_REQUEST);
    }

    let channel_id = state
        .db
        .create_channel(server_id, &req.name)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok((
        StatusCode::CREATED,
        Json(Channel {
            id: channel_id,
            server_id,
            name: req.name,
        }),
    ))
}

pub async fn list_channels(
    State(state): State<AppState>,
    Path(server_id): Path<i64>,
    Extension(_claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let rows = state
        .db
        .list_channels(server_id)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let channels: Vec<Channel> = rows
        .into_iter()
        .map(|row| Channel {
            id: row.id,
            server_id: row.server_id,
            name: row.name,
        })
        .collect();

    Ok(Json(channels))
}

/// Open (or reuse) the DM between the caller and another user.
pub async fn open_dm(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<OpenDmRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    if state
        .db
        .get_user_by_id(req.user_id)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .is_none()
    {
        return Err(StatusCode::NOT_FOUND);
    }

    let dm_id = state
        .db
        .open_dm(claims.sub, req.user_id)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(OpenDmResponse { dm_id }))
}
