use thiserror::Error;
use uuid::Uuid;

use doctor_cell::ScheduleError;
use shared_models::error::AppError;

#[derive(Error, Debug)]
pub enum AppointmentError {
    #[error("Invalid appointment: {0}")]
    InvalidInput(String),

    #[error("Requested time is outside the doctor's schedule")]
    OutsideSchedule,

    #[error("Requested time overlaps an existing appointment")]
    Overlap,

    #[error("Appointment not found: {0}")]
    NotFound(Uuid),

    #[error("Cancelled appointment {0} cannot be rescheduled")]
    Cancelled(Uuid),

    #[error("Upstream dependency failed: {0}")]
    Upstream(String),

    #[error("Appointment storage error: {0}")]
    Storage(String),
}

impl From<anyhow::Error> for AppointmentError {
    fn from(e: anyhow::Error) -> Self {
        AppointmentError::Storage(e.to_string())
    }
}

impl From<ScheduleError> for AppointmentError {
    fn from(e: ScheduleError) -> Self {
        match e {
            ScheduleError::InvalidInput(msg) => AppointmentError::InvalidInput(msg),
            other => AppointmentError::Storage(other.to_string()),
        }
    }
}

impl From<AppointmentError> for AppError {
    fn from(e: AppointmentError) -> Self {
        match e {
            AppointmentError::InvalidInput(msg) => AppError::ValidationError(msg),
            AppointmentError::OutsideSchedule => AppError::ValidationError(e.to_string()),
            AppointmentError::Overlap | AppointmentError::Cancelled(_) => {
                AppError::Conflict(e.to_string())
            }
            AppointmentError::NotFound(_) => AppError::NotFound(e.to_string()),
            AppointmentError::Upstream(msg) => AppError::ExternalService(msg),
            AppointmentError::Storage(msg) => AppError::Database(msg),
        }
    }
}
