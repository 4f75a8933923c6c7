use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use appointment_cell::AppointmentError;
use shared_models::error::AppError;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Queue not found: {0}")]
    QueueNotFound(Uuid),

    #[error("Queue ticket not found: {0}")]
    TicketNotFound(Uuid),

    #[error("{0} not found")]
    NotFound(String),

    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Record was modified at {actual}, expected {expected}")]
    OptimisticLockConflict {
        expected: DateTime<Utc>,
        actual: DateTime<Utc>,
    },

    #[error("Record was modified concurrently")]
    ConcurrentModification,

    #[error("Queue {0} is closed")]
    QueueClosed(Uuid),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Upstream dependency failed: {0}")]
    Upstream(String),

    #[error("Redis error: {0}")]
    RedisError(#[from] redis::RedisError),

    #[error("Redis pool error: {0}")]
    PoolError(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Queue storage error: {0}")]
    Storage(String),
}

impl QueueError {
    pub fn invalid_transition(from: impl ToString, to: impl ToString) -> Self {
        QueueError::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }
}

impl From<anyhow::Error> for QueueError {
    fn from(e: anyhow::Error) -> Self {
        let message = e.to_string();
        // PostgREST answers 409 for unique index violations
        if message.starts_with("Constraint violation") {
            QueueError::Conflict(message)
        } else {
            QueueError::Storage(message)
        }
    }
}

impl From<deadpool_redis::PoolError> for QueueError {
    fn from(e: deadpool_redis::PoolError) -> Self {
        QueueError::PoolError(e.to_string())
    }
}

impl From<AppointmentError> for QueueError {
    fn from(e: AppointmentError) -> Self {
        match e {
            AppointmentError::NotFound(id) => QueueError::NotFound(format!("Appointment {}", id)),
            AppointmentError::Upstream(msg) => QueueError::Upstream(msg),
            other => QueueError::Storage(other.to_string()),
        }
    }
}

impl From<QueueError> for AppError {
    fn from(e: QueueError) -> Self {
        match e {
            QueueError::QueueNotFound(_) | QueueError::TicketNotFound(_) | QueueError::NotFound(_) => {
                AppError::NotFound(e.to_string())
            }
            QueueError::InvalidTransition { .. }
            | QueueError::Conflict(_)
            | QueueError::QueueClosed(_) => AppError::Conflict(e.to_string()),
            QueueError::OptimisticLockConflict { .. } | QueueError::ConcurrentModification => {
                AppError::OptimisticLock(e.to_string())
            }
            QueueError::InvalidInput(msg) => AppError::ValidationError(msg),
            QueueError::Upstream(msg) => AppError::ExternalService(msg),
            QueueError::RedisError(_) | QueueError::PoolError(_) => {
                AppError::ExternalService(e.to_string())
            }
            QueueError::SerializationError(_) => AppError::Internal(e.to_string()),
            QueueError::Storage(msg) => AppError::Database(msg),
        }
    }
}
