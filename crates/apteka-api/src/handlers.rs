//! Route handlers for the Apteka API.

use apteka_chat::{ChatError, TurnInput, TurnOutput, DEFAULT_AUDIO_MIME};
use apteka_core::types::Coordinates;
use axum::extract::{Multipart, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::ApiError;
use crate::state::AppState;

// =============================================================================
// Health
// =============================================================================

/// Response body for `GET /health`.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub active_sessions: usize,
}

/// GET /health - liveness plus a session count.
pub async fn health(State(state): State<AppState>) -> Result<Json<HealthResponse>, ApiError> {
    let active_sessions = state
        .orchestrator
        .sessions()
        .len()
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    Ok(Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        active_sessions,
    }))
}

// =============================================================================
// Chat
// =============================================================================

/// POST /chat - one voice turn.
///
/// Multipart parts: `audio` (required file), `latitude` and `longitude`
/// (optional, both or neither), `session_id` (optional).
pub async fn chat(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<TurnOutput>, ApiError> {
    let input = parse_turn(multipart).await?;
    info!(
        session_id = input.session_id.as_deref().unwrap_or(""),
        audio_bytes = input.audio.len(),
        mime_type = %input.mime_type,
        has_coordinates = input.coordinates.is_some(),
        "Chat turn received"
    );

    let output = state.orchestrator.handle_turn(input).await.map_err(|e| {
        if e.is_client_error() {
            info!(error = %e, "Chat turn rejected");
        } else {
            warn!(error = %e, "Chat turn failed");
        }
        ApiError::from(e)
    })?;

    Ok(Json(output))
}

/// Collect the multipart parts of a chat turn.
pub async fn parse_turn(mut multipart: Multipart) -> Result<TurnInput, ApiError> {
    let mut audio: Option<(Vec<u8>, String)> = None;
    let mut latitude: Option<String> = None;
    let mut longitude: Option<String> = None;
    let mut session_id: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Malformed multipart body: {}", e)))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "audio" => {
                let mime_type = field
                    .content_type()
                    .map(str::trim)
                    .filter(|m| !m.is_empty())
                    .unwrap_or(DEFAULT_AUDIO_MIME)
                    .to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("Failed to read audio: {}", e)))?;
                audio = Some((bytes.to_vec(), mime_type));
            }
            "latitude" | "longitude" | "session_id" => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("Failed to read {}: {}", name, e)))?;
                let value = Some(value.trim().to_string()).filter(|v| !v.is_empty());
                match name.as_str() {
                    "latitude" => latitude = value,
                    "longitude" => longitude = value,
                    _ => session_id = value,
                }
            }
            _ => {}
        }
    }

    let (audio, mime_type) =
        audio.ok_or_else(|| ApiError::BadRequest("Missing audio part".to_string()))?;

    Ok(TurnInput {
        audio,
        mime_type,
        coordinates: parse_coordinates(latitude.as_deref(), longitude.as_deref())?,
        session_id,
    })
}

/// Both or neither; each must parse and be in range.
pub fn parse_coordinates(
    latitude: Option<&str>,
    longitude: Option<&str>,
) -> Result<Option<Coordinates>, ChatError> {
    match (latitude, longitude) {
        (None, None) => Ok(None),
        (Some(lat), Some(lon)) => {
            let lat: f64 = lat
                .parse()
                .map_err(|_| ChatError::InvalidCoordinates(format!("latitude {:?}", lat)))?;
            let lon: f64 = lon
                .parse()
                .map_err(|_| ChatError::InvalidCoordinates(format!("longitude {:?}", lon)))?;
            Ok(Some(Coordinates::new(lat, lon)?))
        }
        _ => Err(ChatError::InvalidCoordinates(
            "latitude and longitude must be sent together".to_string(),
        )),
    }
}
