use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

use doctor_cell::ScheduleService;

use crate::error::AppointmentError;
use crate::models::{Appointment, AppointmentStatus, BookAppointmentRequest};
use crate::services::clock::ClinicClock;
use crate::services::store::AppointmentStore;

/// Checks a requested interval against schedule containment and overlap.
///
/// Callers serialise per doctor; the checks here are read-only.
pub struct AppointmentValidator {
    schedules: Arc<ScheduleService>,
    store: Arc<dyn AppointmentStore>,
    clock: Arc<ClinicClock>,
}

impl AppointmentValidator {
    pub fn new(
        schedules: Arc<ScheduleService>,
        store: Arc<dyn AppointmentStore>,
        clock: Arc<ClinicClock>,
    ) -> Self {
        Self {
            schedules,
            store,
            clock,
        }
    }

    /// A `scheduled` appointment ready to persist.
    pub async fn validate_and_build(
        &self,
        request: BookAppointmentRequest,
        now: DateTime<Utc>,
    ) -> Result<Appointment, AppointmentError> {
        let doctor_id = request
            .doctor_id
            .ok_or_else(|| AppointmentError::InvalidInput("doctorId is required".to_string()))?;

        self.check_interval(doctor_id, request.clinic_id, request.start_time, request.end_time, None)
            .await?;

        Ok(Appointment {
            id: Uuid::new_v4(),
            doctor_id,
            clinic_id: request.clinic_id,
            patient_id: request.patient_id,
            start_time: request.start_time,
            end_time: request.end_time,
            status: AppointmentStatus::Scheduled,
            created_at: now,
            updated_at: now,
        })
    }

    /// `exclude` skips one appointment in the overlap count, used when an
    /// appointment is moved.
    pub async fn check_interval(
        &self,
        doctor_id: Uuid,
        clinic_id: Option<Uuid>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        exclude: Option<Uuid>,
    ) -> Result<(), AppointmentError> {
        if start >= end {
            return Err(AppointmentError::InvalidInput(
                "startTime must be before endTime".to_string(),
            ));
        }

        let offset = self.clock.offset_for(clinic_id).await?;
        let local = ClinicClock::localize(offset, start, end)?;

        let index = self.schedules.index_for(doctor_id).await?;
        if !index.is_within_window_on(doctor_id, local.date, local.start, local.end) {
            debug!(
                "Doctor {} has no window covering {} {}-{}",
                doctor_id, local.date, local.start, local.end
            );
            return Err(AppointmentError::OutsideSchedule);
        }

        let overlapping = self
            .store
            .count_overlapping(doctor_id, start, end, exclude)
            .await?;
        if overlapping > 0 {
            debug!("Doctor {} has {} overlapping appointments", doctor_id, overlapping);
            return Err(AppointmentError::Overlap);
        }

        Ok(())
    }
}
