use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use shared_database::PatientDirectory;
use shared_utils::time::{advance_timestamp, now_micros};
use shared_utils::KeyedLocks;

use crate::error::AppointmentError;
use crate::models::{Appointment, AppointmentFilter, AppointmentStatus, BookAppointmentRequest};
use crate::services::notification::{NotificationSink, Recipient};
use crate::services::store::AppointmentStore;
use crate::services::validator::AppointmentValidator;

/// Booking entry point. Every write for a doctor runs under that doctor's lock
/// so check-then-insert cannot interleave within this process.
pub struct BookingService {
    store: Arc<dyn AppointmentStore>,
    validator: AppointmentValidator,
    doctor_locks: KeyedLocks<Uuid>,
    notifier: Arc<dyn NotificationSink>,
    patients: Arc<dyn PatientDirectory>,
}

impl BookingService {
    pub fn new(
        store: Arc<dyn AppointmentStore>,
        validator: AppointmentValidator,
        notifier: Arc<dyn NotificationSink>,
        patients: Arc<dyn PatientDirectory>,
    ) -> Self {
        Self {
            store,
            validator,
            doctor_locks: KeyedLocks::new(),
            notifier,
            patients,
        }
    }

    #[instrument(skip(self, request), fields(doctor_id = ?request.doctor_id))]
    pub async fn book(&self, request: BookAppointmentRequest) -> Result<Appointment, AppointmentError> {
        let doctor_id = request
            .doctor_id
            .ok_or_else(|| AppointmentError::InvalidInput("doctorId is required".to_string()))?;

        let appointment = {
            let _guard = self.doctor_locks.lock(&doctor_id).await;
            let appointment = self.validator.validate_and_build(request, now_micros()).await?;
            self.store.insert(appointment).await?
        };

        info!(
            "Appointment {} booked for doctor {} at {}",
            appointment.id, appointment.doctor_id, appointment.start_time
        );
        self.spawn_scheduled_notification(appointment.clone());
        Ok(appointment)
    }

    pub async fn get(&self, id: Uuid) -> Result<Appointment, AppointmentError> {
        self.store.get(id).await?.ok_or(AppointmentError::NotFound(id))
    }

    pub async fn list(&self, filter: &AppointmentFilter) -> Result<Vec<Appointment>, AppointmentError> {
        self.store.list(filter).await
    }

    /// Moves an appointment, excluding itself from the overlap count.
    #[instrument(skip(self))]
    pub async fn reschedule(
        &self,
        id: Uuid,
        new_start: DateTime<Utc>,
        new_end: DateTime<Utc>,
    ) -> Result<Appointment, AppointmentError> {
        let doctor_id = self.get(id).await?.doctor_id;
        let _guard = self.doctor_locks.lock(&doctor_id).await;

        // Re-read under the lock
        let current = self.get(id).await?;
        if current.status == AppointmentStatus::Cancelled {
            return Err(AppointmentError::Cancelled(id));
        }

        self.validator
            .check_interval(current.doctor_id, current.clinic_id, new_start, new_end, Some(id))
            .await?;

        let updated = self
            .store
            .update(Appointment {
                start_time: new_start,
                end_time: new_end,
                updated_at: advance_timestamp(current.updated_at, now_micros()),
                ..current
            })
            .await?;

        info!("Appointment {} moved to {} - {}", id, new_start, new_end);
        Ok(updated)
    }

    /// Cancelling twice returns the already-cancelled row.
    #[instrument(skip(self))]
    pub async fn cancel(&self, id: Uuid) -> Result<Appointment, AppointmentError> {
        let doctor_id = self.get(id).await?.doctor_id;
        let _guard = self.doctor_locks.lock(&doctor_id).await;

        let current = self.get(id).await?;
        if current.status == AppointmentStatus::Cancelled {
            debug!("Appointment {} already cancelled", id);
            return Ok(current);
        }

        let cancelled = self
            .store
            .update(Appointment {
                status: AppointmentStatus::Cancelled,
                updated_at: advance_timestamp(current.updated_at, now_micros()),
                ..current
            })
            .await?;

        info!("Appointment {} cancelled", id);
        Ok(cancelled)
    }

    /// Promotes scheduled appointments starting within `horizon` to confirmed.
    pub async fn confirm_upcoming(
        &self,
        now: DateTime<Utc>,
        horizon: Duration,
    ) -> Result<usize, AppointmentError> {
        let due = self
            .store
            .list_by_status_between(AppointmentStatus::Scheduled, now, now + horizon)
            .await?;

        let mut confirmed = 0;
        for candidate in due {
            let _guard = self.doctor_locks.lock(&candidate.doctor_id).await;

            // Skip rows cancelled or moved since the scan
            let Some(current) = self.store.get(candidate.id).await? else {
                continue;
            };
            if current.status != AppointmentStatus::Scheduled || current.start_time != candidate.start_time {
                continue;
            }

            self.store
                .update(Appointment {
                    status: AppointmentStatus::Confirmed,
                    updated_at: advance_timestamp(current.updated_at, now_micros()),
                    ..current
                })
                .await?;
            confirmed += 1;
        }

        Ok(confirmed)
    }

    fn spawn_scheduled_notification(&self, appointment: Appointment) {
        let notifier = self.notifier.clone();
        let patients = self.patients.clone();

        tokio::spawn(async move {
            let display_name = match appointment.patient_id {
                Some(patient_id) => patients
                    .resolve_display_name(patient_id)
                    .await
                    .unwrap_or_else(|e| {
                        warn!("Patient lookup for notification failed: {}", e);
                        None
                    }),
                None => None,
            };
            let recipient = Recipient {
                patient_id: appointment.patient_id,
                display_name,
            };

            if let Err(e) = notifier
                .notify_appointment_scheduled(&appointment, &recipient)
                .await
            {
                warn!("Notification for appointment {} failed: {}", appointment.id, e);
            }
        });
    }
}
