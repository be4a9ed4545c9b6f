use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;
use validator::Validate;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema, Validate)]
pub struct Coordinate {
    #[validate(range(min = -90.0, max = 90.0, message = "Latitude out of range"))]
    pub latitude: f64,
    #[validate(range(min = -180.0, max = 180.0, message = "Longitude out of range"))]
    pub longitude: f64,
}

/// Position message exchanged over the location relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct PositionUpdate {
    #[validate(nested)]
    pub coordinate: Coordinate,
    pub timestamp: DateTime<Utc>,
    /// Set by the relay on the way out; whatever the client sends is replaced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<String>,
}

#[derive(Debug, Error)]
pub enum PositionError {
    #[error("payload is not a position update: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("position update failed validation: {0}")]
    Invalid(#[from] validator::ValidationErrors),
}

impl PositionUpdate {
    /// Parses and validates an inbound relay payload. JSON has no NaN or
    /// infinity literals, so a parsed coordinate is always finite.
    pub fn parse(payload: &str) -> Result<Self, PositionError> {
        let update: PositionUpdate = serde_json::from_str(payload)?;
        update.validate()?;
        Ok(update)
    }

    pub fn with_sender(mut self, sender_id: impl Into<String>) -> Self {
        self.sender_id = Some(sender_id.into());
        self
    }
}
