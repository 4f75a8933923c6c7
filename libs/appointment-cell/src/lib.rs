pub mod error;
pub mod handlers;
pub mod models;
pub mod router;
pub mod services;

pub use error::AppointmentError;
pub use handlers::AppointmentState;
pub use models::{Appointment, AppointmentFilter, AppointmentStatus, BookAppointmentRequest};
pub use services::{AppointmentStore, BookingService, ClinicClock};
