use thiserror::Error;
use uuid::Uuid;

use shared_models::error::AppError;

#[derive(Error, Debug)]
pub enum ScheduleError {
    #[error("Invalid schedule: {0}")]
    InvalidInput(String),

    #[error("Schedule not found: {0}")]
    NotFound(Uuid),

    #[error("Schedule {0} already covers past appointments and cannot be changed")]
    InUse(Uuid),

    #[error("Schedule storage error: {0}")]
    Storage(String),
}

impl From<anyhow::Error> for ScheduleError {
    fn from(e: anyhow::Error) -> Self {
        ScheduleError::Storage(e.to_string())
    }
}

impl From<ScheduleError> for AppError {
    fn from(e: ScheduleError) -> Self {
        match e {
            ScheduleError::InvalidInput(msg) => AppError::ValidationError(msg),
            ScheduleError::NotFound(_) => AppError::NotFound(e.to_string()),
            ScheduleError::InUse(_) => AppError::Conflict(e.to_string()),
            ScheduleError::Storage(msg) => AppError::Database(msg),
        }
    }
}
