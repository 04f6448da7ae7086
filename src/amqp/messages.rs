//! AMQP message definitions and serialization

use crate::error::{MatchmakingError, Result};
use crate::types::*;
use serde_json;

/// AMQP queue names
pub const WAITING_ROOM_REQUEST_QUEUE: &str = "sparring.waiting_room_requests";
pub const PLAYER_EVENTS_EXCHANGE: &str = "sparring.player_events";
pub const MATCH_EVENTS_EXCHANGE: &str = "sparring.match_events";

/// Routing keys for events
pub const PLAYER_ENTERED_ROUTING_KEY: &str = "player.entered";
pub const PLAYER_LEFT_ROUTING_KEY: &str = "player.left";
pub const MATCH_FOUND_ROUTING_KEY: &str = "match.found";

/// Message envelope with metadata
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct MessageEnvelope<T> {
    pub payload: T,
    pub correlation_id: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub routing_key: String,
}

impl<T> MessageEnvelope<T>
where
    T: serde::Serialize + serde::de::DeserializeOwned,
{
    /// Create a new message envelope
    pub fn new(payload: T, routing_key: String) -> Self {
        Self {
            payload,
            correlation_id: uuid::Uuid::new_v4().to_string(),
            timestamp: chrono::Utc::now(),
            routing_key,
        }
    }

    /// Serialize the envelope to JSON bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| {
            MatchmakingError::InternalError {
                message: format!("Failed to serialize message: {}", e),
            }
            .into()
        })
    }

    /// Deserialize envelope from JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| {
            MatchmakingError::InvalidRequest {
                reason: format!("Failed to deserialize message: {}", e),
            }
            .into()
        })
    }
}

/// Message serialization and validation utilities
pub struct MessageUtils;

impl MessageUtils {
    /// Serialize a waiting-room request to bytes
    pub fn serialize_request(request: &WaitingRoomRequest) -> Result<Vec<u8>> {
        Self::validate_request(request)?;
        serde_json::to_vec(request).map_err(|e| {
            MatchmakingError::InternalError {
                message: format!("Failed to serialize waiting room request: {}", e),
            }
            .into()
        })
    }

    /// Deserialize a waiting-room request from bytes
    pub fn deserialize_request(bytes: &[u8]) -> Result<WaitingRoomRequest> {
        let request: WaitingRoomRequest =
            serde_json::from_slice(bytes).map_err(|e| MatchmakingError::InvalidRequest {
                reason: format!("Failed to deserialize waiting room request: {}", e),
            })?;

        Self::validate_request(&request)?;
        Ok(request)
    }

    /// Validate a waiting-room request
    pub fn validate_request(request: &WaitingRoomRequest) -> Result<()> {
        if request.token().trim().is_empty() {
            return Err(MatchmakingError::InvalidRequest {
                reason: "Token cannot be empty".to_string(),
            }
            .into());
        }

        if request.exercise_type() <= 0 {
            return Err(MatchmakingError::InvalidRequest {
                reason: format!(
                    "Exercise type must be positive, got {}",
                    request.exercise_type()
                ),
            }
            .into());
        }

        Ok(())
    }

    /// Exchange and routing key for an outbound event
    /// Stable identity of an event, the same for every publish of it
    pub fn event_key(event: &WaitingRoomEvent) -> String {
        match event {
            WaitingRoomEvent::MatchFound(found) => {
                let result = &found.match_result;
                format!(
                    "match:{}:{}:{}:{}",
                    result.session_id,
                    result.token_a,
                    result.token_b,
                    result.matched_at.timestamp_millis()
                )
            }
            WaitingRoomEvent::PlayerEnteredWaitingRoom(entered) => format!(
                "entered:{}:{}:{}",
                entered.exercise_type,
                entered.token,
                entered.timestamp.timestamp_millis()
            ),
            WaitingRoomEvent::PlayerLeftWaitingRoom(left) => format!(
                "left:{}:{}:{:?}:{}",
                left.exercise_type,
                left.token,
                left.reason,
                left.timestamp.timestamp_millis()
            ),
        }
    }

    pub fn route(event: &WaitingRoomEvent) -> (&'static str, &'static str) {
        match event {
            WaitingRoomEvent::MatchFound(_) => (MATCH_EVENTS_EXCHANGE, MATCH_FOUND_ROUTING_KEY),
            WaitingRoomEvent::PlayerEnteredWaitingRoom(_) => {
                (PLAYER_EVENTS_EXCHANGE, PLAYER_ENTERED_ROUTING_KEY)
            }
            WaitingRoomEvent::PlayerLeftWaitingRoom(_) => {
                (PLAYER_EVENTS_EXCHANGE, PLAYER_LEFT_ROUTING_KEY)
            }
        }
    }
}
