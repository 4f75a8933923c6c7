use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use shared_utils::time::{advance_timestamp, now_micros};

use crate::error::ScheduleError;
use crate::models::{
    iso_weekday, CreateScheduleRequest, ScheduleWindow, TimeSlot, UpdateScheduleRequest,
    DEFAULT_SLOT_MINUTES,
};
use crate::services::schedule_index::ScheduleIndex;
use crate::services::store::ScheduleStore;

/// Answers whether a window already covers appointments that have started.
/// Implemented by the appointment side so this crate does not depend on it.
#[async_trait]
pub trait ScheduleReferences: Send + Sync {
    async fn has_past_appointments(
        &self,
        window: &ScheduleWindow,
        now: DateTime<Utc>,
    ) -> Result<bool, ScheduleError>;
}

/// For deployments and tests with no appointment history.
pub struct NoScheduleReferences;

#[async_trait]
impl ScheduleReferences for NoScheduleReferences {
    async fn has_past_appointments(
        &self,
        _window: &ScheduleWindow,
        _now: DateTime<Utc>,
    ) -> Result<bool, ScheduleError> {
        Ok(false)
    }
}

pub struct ScheduleService {
    store: Arc<dyn ScheduleStore>,
    references: Arc<dyn ScheduleReferences>,
}

impl ScheduleService {
    pub fn new(store: Arc<dyn ScheduleStore>, references: Arc<dyn ScheduleReferences>) -> Self {
        Self { store, references }
    }

    #[instrument(skip(self, request))]
    pub async fn create_schedule(
        &self,
        doctor_id: Uuid,
        request: CreateScheduleRequest,
    ) -> Result<ScheduleWindow, ScheduleError> {
        let now = now_micros();
        let window = ScheduleWindow {
            id: Uuid::new_v4(),
            doctor_id,
            day_of_week: request.day_of_week,
            start_time: request.start_time,
            end_time: request.end_time,
            slot_duration_minutes: request.slot_duration_minutes.unwrap_or(DEFAULT_SLOT_MINUTES),
            valid_from: request.valid_from,
            valid_to: request.valid_to,
            created_at: now,
            updated_at: now,
        };
        validate_window(&window)?;

        let stored = self.store.insert(window).await?;
        info!(
            "Schedule {} created for doctor {} on day {}",
            stored.id, stored.doctor_id, stored.day_of_week
        );
        Ok(stored)
    }

    pub async fn get_schedule(&self, id: Uuid) -> Result<ScheduleWindow, ScheduleError> {
        self.store.get(id).await?.ok_or(ScheduleError::NotFound(id))
    }

    pub async fn list_for_doctor(&self, doctor_id: Uuid) -> Result<Vec<ScheduleWindow>, ScheduleError> {
        let windows = self.store.list_by_doctor(doctor_id).await?;
        debug!("Doctor {} has {} schedule windows", doctor_id, windows.len());
        Ok(windows)
    }

    #[instrument(skip(self, request))]
    pub async fn update_schedule(
        &self,
        id: Uuid,
        request: UpdateScheduleRequest,
    ) -> Result<ScheduleWindow, ScheduleError> {
        let existing = self.get_schedule(id).await?;
        let now = now_micros();
        self.ensure_unreferenced(&existing, now).await?;

        let updated = ScheduleWindow {
            day_of_week: request.day_of_week.unwrap_or(existing.day_of_week),
            start_time: request.start_time.unwrap_or(existing.start_time),
            end_time: request.end_time.unwrap_or(existing.end_time),
            slot_duration_minutes: request
                .slot_duration_minutes
                .unwrap_or(existing.slot_duration_minutes),
            valid_from: request.valid_from.unwrap_or(existing.valid_from),
            valid_to: request.valid_to.unwrap_or(existing.valid_to),
            updated_at: advance_timestamp(existing.updated_at, now),
            ..existing
        };
        validate_window(&updated)?;

        let stored = self.store.update(updated).await?;
        info!("Schedule {} updated", stored.id);
        Ok(stored)
    }

    #[instrument(skip(self))]
    pub async fn delete_schedule(&self, id: Uuid) -> Result<(), ScheduleError> {
        let existing = self.get_schedule(id).await?;
        self.ensure_unreferenced(&existing, now_micros()).await?;

        if !self.store.delete(id).await? {
            return Err(ScheduleError::NotFound(id));
        }
        info!("Schedule {} deleted", id);
        Ok(())
    }

    /// Snapshot of a doctor's windows for containment checks.
    pub async fn index_for(&self, doctor_id: Uuid) -> Result<ScheduleIndex, ScheduleError> {
        Ok(ScheduleIndex::new(self.store.list_by_doctor(doctor_id).await?))
    }

    pub async fn slots_on(&self, doctor_id: Uuid, date: NaiveDate) -> Result<Vec<TimeSlot>, ScheduleError> {
        Ok(self.index_for(doctor_id).await?.slots_on(doctor_id, date))
    }

    async fn ensure_unreferenced(
        &self,
        window: &ScheduleWindow,
        now: DateTime<Utc>,
    ) -> Result<(), ScheduleError> {
        if self.references.has_past_appointments(window, now).await? {
            return Err(ScheduleError::InUse(window.id));
        }
        Ok(())
    }
}

pub fn validate_window(window: &ScheduleWindow) -> Result<(), ScheduleError> {
    if iso_weekday(window.day_of_week).is_none() {
        return Err(ScheduleError::InvalidInput(
            "Day of week must be between 1 (Monday) and 7 (Sunday)".to_string(),
        ));
    }

    if window.start_time >= window.end_time {
        return Err(ScheduleError::InvalidInput(
            "Start time must be before end time".to_string(),
        ));
    }

    if window.slot_duration_minutes == 0 {
        return Err(ScheduleError::InvalidInput(
            "Slot duration must be greater than 0".to_string(),
        ));
    }

    let window_minutes = (window.end_time - window.start_time).num_minutes();
    if window_minutes < i64::from(window.slot_duration_minutes) {
        return Err(ScheduleError::InvalidInput(
            "Schedule is too short for the slot duration".to_string(),
        ));
    }

    if let (Some(from), Some(to)) = (window.valid_from, window.valid_to) {
        if from > to {
            return Err(ScheduleError::InvalidInput(
                "validFrom must not be after validTo".to_string(),
            ));
        }
    }

    Ok(())
}
