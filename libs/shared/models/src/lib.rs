pub mod auth;
pub mod clinic;
pub mod error;

pub use clinic::Clinic;
pub use error::AppError;
