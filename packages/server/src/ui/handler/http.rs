//! HTTP API endpoint handlers.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};

use crate::{
    domain::RoomId,
    infrastructure::dto::http::{GlobalStatsDto, HealthDto, RoomStatsDto, RoomSummaryDto},
    ui::state::AppState,
};
use majlis_shared::time::timestamp_to_rfc3339;

/// Health check endpoint
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthDto> {
    Json(HealthDto {
        status: "ok".to_string(),
        timestamp: timestamp_to_rfc3339(state.coordinator.now().value()),
    })
}

/// Get process-wide presence counters
pub async fn get_stats(State(state): State<Arc<AppState>>) -> Json<GlobalStatsDto> {
    Json(state.coordinator.global_stats().into())
}

/// Get list of rooms that currently have members
pub async fn get_rooms(State(state): State<Arc<AppState>>) -> Json<Vec<RoomSummaryDto>> {
    // Domain Model から DTO への変換
    let rooms: Vec<RoomSummaryDto> = state
        .coordinator
        .active_rooms()
        .iter()
        .map(RoomSummaryDto::from)
        .collect();

    Json(rooms)
}

/// Get member count and activity of a room
///
/// Unknown rooms report zero members; malformed ids are rejected.
pub async fn get_room_stats(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<String>,
) -> Result<Json<RoomStatsDto>, StatusCode> {
    let room_id = match RoomId::new(room_id) {
        Ok(room_id) => room_id,
        Err(e) => {
            tracing::warn!("Invalid room id in path: {}", e);
            return Err(StatusCode::BAD_REQUEST);
        }
    };

    Ok(Json(state.coordinator.room_stats(&room_id).into()))
}
