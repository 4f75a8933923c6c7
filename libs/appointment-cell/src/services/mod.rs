pub mod booking;
pub mod clock;
pub mod confirmation;
pub mod notification;
pub mod references;
pub mod store;
pub mod validator;

pub use booking::BookingService;
pub use clock::ClinicClock;
pub use confirmation::ConfirmationJob;
pub use notification::{LogNotificationSink, NotificationSink, Recipient, WebhookNotificationSink};
pub use references::AppointmentScheduleReferences;
pub use store::{AppointmentStore, InMemoryAppointmentStore, SupabaseAppointmentStore};
pub use validator::AppointmentValidator;
