//! Conversion logic from domain entities to DTOs.

use majlis_shared::time::timestamp_to_rfc3339;

use crate::domain::{BroadcastState, GlobalStats, RoomState, RoomStats, UserId};
use crate::infrastructure::dto::{http, websocket::ServerEvent};

// ========================================
// Domain Entity → WebSocket DTO
// ========================================

impl From<BroadcastState> for ServerEvent {
    fn from(state: BroadcastState) -> Self {
        ServerEvent::BroadcastState {
            room_id: state.room_id.into_string(),
            speaker_ids: state.speaker_ids,
            mic_queue: state.mic_queue,
        }
    }
}

// ========================================
// Domain Entity → HTTP DTO
// ========================================

fn raw_ids(ids: Vec<UserId>) -> Vec<i64> {
    ids.into_iter().map(|id| id.value()).collect()
}

impl From<&RoomState> for http::RoomSummaryDto {
    fn from(room: &RoomState) -> Self {
        Self {
            id: room.id.as_str().to_string(),
            member_ids: raw_ids(room.member_ids()),
            member_count: room.member_count(),
            speaker_ids: raw_ids(room.speaker_ids()),
            created_at: timestamp_to_rfc3339(room.created_at.value()),
            last_activity: timestamp_to_rfc3339(room.last_activity.value()),
        }
    }
}

impl From<RoomStats> for http::RoomStatsDto {
    fn from(stats: RoomStats) -> Self {
        Self {
            room_id: stats.room_id.into_string(),
            member_count: stats.member_count,
            is_active: stats.is_active,
        }
    }
}

impl From<GlobalStats> for http::GlobalStatsDto {
    fn from(stats: GlobalStats) -> Self {
        Self {
            total_users: stats.total_users,
            total_rooms: stats.total_rooms,
            active_rooms: stats.active_rooms,
        }
    }
}
