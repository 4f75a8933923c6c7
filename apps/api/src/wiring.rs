//! Builds every service once at startup and hands them to the cell routers.

use std::sync::Arc;

use anyhow::Result;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use appointment_cell::services::{
    AppointmentScheduleReferences, AppointmentStore, AppointmentValidator, BookingService,
    ClinicClock, ConfirmationJob, InMemoryAppointmentStore, LogNotificationSink, NotificationSink,
    SupabaseAppointmentStore, WebhookNotificationSink,
};
use appointment_cell::AppointmentState;
use doctor_cell::services::{InMemoryScheduleStore, ScheduleService, ScheduleStore, SupabaseScheduleStore};
use doctor_cell::ScheduleState;
use queue_cell::services::{
    InMemoryQueueStore, InMemoryTicketStore, QueueLifecycle, QueueStore, RealtimeHub, RedisRelay,
    SupabaseQueueStore, SupabaseTicketStore, TicketStore,
};
use queue_cell::QueueState;
use shared_config::{AppConfig, StorageBackend};
use shared_database::directory::{
    InMemoryClinicDirectory, InMemoryPatientDirectory, SupabaseClinicDirectory,
    SupabasePatientDirectory,
};
use shared_database::{ClinicDirectory, PatientDirectory, SupabaseClient};
use shared_utils::RetryPolicy;

struct Stores {
    schedules: Arc<dyn ScheduleStore>,
    appointments: Arc<dyn AppointmentStore>,
    queues: Arc<dyn QueueStore>,
    tickets: Arc<dyn TicketStore>,
    clinics: Arc<dyn ClinicDirectory>,
    patients: Arc<dyn PatientDirectory>,
}

impl Stores {
    fn for_config(config: &AppConfig) -> Self {
        match config.storage_backend {
            StorageBackend::Supabase => {
                let supabase = Arc::new(SupabaseClient::new(config));
                Self {
                    schedules: Arc::new(SupabaseScheduleStore::new(supabase.clone())),
                    appointments: Arc::new(SupabaseAppointmentStore::new(supabase.clone())),
                    queues: Arc::new(SupabaseQueueStore::new(supabase.clone())),
                    tickets: Arc::new(SupabaseTicketStore::new(supabase.clone())),
                    clinics: Arc::new(SupabaseClinicDirectory::new(
                        supabase.clone(),
                        config.clinic_utc_offset.clone(),
                    )),
                    patients: Arc::new(SupabasePatientDirectory::new(supabase)),
                }
            }
            StorageBackend::Memory => {
                warn!("Using in-memory storage; data is lost on restart");
                Self {
                    schedules: Arc::new(InMemoryScheduleStore::new()),
                    appointments: Arc::new(InMemoryAppointmentStore::new()),
                    queues: Arc::new(InMemoryQueueStore::new()),
                    tickets: Arc::new(InMemoryTicketStore::new()),
                    clinics: Arc::new(InMemoryClinicDirectory::new()),
                    patients: Arc::new(InMemoryPatientDirectory::new()),
                }
            }
        }
    }
}

pub struct AppServices {
    pub schedules: ScheduleState,
    pub appointments: AppointmentState,
    pub queues: QueueState,
    pub bookings: Arc<BookingService>,
    relay: Option<RedisRelay>,
}

impl AppServices {
    pub async fn build(config: Arc<AppConfig>) -> Result<Self> {
        let stores = Stores::for_config(&config);

        let clock = Arc::new(ClinicClock::new(stores.clinics.clone(), &config.clinic_utc_offset));
        let references = Arc::new(AppointmentScheduleReferences::new(
            stores.appointments.clone(),
            clock.clone(),
        ));
        let schedule_service = Arc::new(ScheduleService::new(stores.schedules.clone(), references));

        let notifier: Arc<dyn NotificationSink> = match &config.notification_webhook_url {
            Some(url) => {
                info!("Appointment notifications go to webhook {}", url);
                Arc::new(WebhookNotificationSink::new(url.clone(), RetryPolicy::default()))
            }
            None => Arc::new(LogNotificationSink),
        };

        let validator = AppointmentValidator::new(
            schedule_service.clone(),
            stores.appointments.clone(),
            clock,
        );
        let bookings = Arc::new(BookingService::new(
            stores.appointments.clone(),
            validator,
            notifier,
            stores.patients.clone(),
        ));

        let hub = Arc::new(RealtimeHub::new(config.realtime_channel_capacity));
        let relay = match config.redis_url.as_deref() {
            Some(url) if config.is_realtime_relay_configured() => match RedisRelay::start(hub.clone(), url, RetryPolicy::default()).await {
                Ok(relay) => Some(relay),
                Err(e) => {
                    warn!("Redis relay unavailable, realtime events stay in-process: {}", e);
                    None
                }
            },
            _ => None,
        };

        let lifecycle = Arc::new(QueueLifecycle::new(
            stores.queues,
            stores.tickets,
            stores.appointments,
            stores.clinics,
            hub,
        ));

        Ok(Self {
            schedules: ScheduleState {
                config: config.clone(),
                schedules: schedule_service,
            },
            appointments: AppointmentState {
                config: config.clone(),
                bookings: bookings.clone(),
            },
            queues: QueueState {
                config,
                lifecycle,
                patients: stores.patients,
            },
            bookings,
            relay,
        })
    }

    pub fn spawn_background_jobs(&self) -> JoinHandle<()> {
        ConfirmationJob::new(self.bookings.clone()).spawn()
    }

    pub fn shutdown(self) {
        if let Some(relay) = self.relay {
            relay.shutdown();
        }
    }
}
