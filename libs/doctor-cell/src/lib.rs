pub mod error;
pub mod handlers;
pub mod models;
pub mod router;
pub mod services;

pub use error::ScheduleError;
pub use handlers::ScheduleState;
pub use models::{CreateScheduleRequest, ScheduleWindow, TimeSlot, UpdateScheduleRequest};
pub use services::{ScheduleIndex, ScheduleReferences, ScheduleService, ScheduleStore};
