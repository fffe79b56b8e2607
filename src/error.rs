// Error types for the engagement core

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;
use tracing::error;

use crate::models::ParticipationStatus;

/// Failures returned by the engagement operations.
///
/// Every variant carries a human-readable message; [`EngagementError::kind`]
/// groups them into the coarse categories callers branch on.
#[derive(Debug, thiserror::Error)]
pub enum EngagementError {
    #[error("authentication required")]
    Unauthenticated,

    #[error("administrator role required")]
    Forbidden,

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("already registered for this activity")]
    AlreadyRegistered,

    #[error("not registered for this activity")]
    NotRegistered,

    #[error("activity is full")]
    ActivityFull,

    #[error("activity has already started")]
    ActivityEnded,

    #[error("challenge is not active")]
    ChallengeInactive,

    #[error("already participating in this challenge")]
    AlreadyJoined,

    #[error("not participating in this challenge")]
    NotParticipating,

    #[error("challenge already completed")]
    AlreadyCompleted,

    #[error("challenge participation is {0} and cannot be completed")]
    InvalidState(ParticipationStatus),

    #[error("points must be positive, got {0}")]
    InvalidPoints(i64),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Coarse error categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    Conflict,
    CapacityExceeded,
    WindowClosed,
    InvalidInput,
    Unauthenticated,
    Forbidden,
    Internal,
}

impl EngagementError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) | Self::NotRegistered | Self::NotParticipating => ErrorKind::NotFound,
            Self::AlreadyRegistered
            | Self::AlreadyJoined
            | Self::AlreadyCompleted
            | Self::InvalidState(_) => ErrorKind::Conflict,
            Self::ActivityFull => ErrorKind::CapacityExceeded,
            Self::ActivityEnded | Self::ChallengeInactive => ErrorKind::WindowClosed,
            Self::InvalidPoints(_) | Self::InvalidInput(_) => ErrorKind::InvalidInput,
            Self::Unauthenticated => ErrorKind::Unauthenticated,
            Self::Forbidden => ErrorKind::Forbidden,
            Self::Database(_) => ErrorKind::Internal,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self.kind() {
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Conflict | ErrorKind::CapacityExceeded => StatusCode::CONFLICT,
            ErrorKind::WindowClosed => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
            ErrorKind::Unauthenticated => StatusCode::UNAUTHORIZED,
            ErrorKind::Forbidden => StatusCode::FORBIDDEN,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for EngagementError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let kind = self.kind();
        let message = match &self {
            Self::Database(e) => {
                error!("Database failure: {}", e);
                "internal server error".to_string()
            }
            other => other.to_string(),
        };
        let body = Json(json!({
            "error": message,
            "kind": kind,
        }));
        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, EngagementError>;
