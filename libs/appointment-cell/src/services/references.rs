use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use uuid::Uuid;

use doctor_cell::models::ScheduleWindow;
use doctor_cell::{ScheduleError, ScheduleReferences};

use crate::models::AppointmentFilter;
use crate::services::clock::ClinicClock;
use crate::services::store::AppointmentStore;

/// Looks for started, still-active appointments that a window covers.
pub struct AppointmentScheduleReferences {
    store: Arc<dyn AppointmentStore>,
    clock: Arc<ClinicClock>,
}

impl AppointmentScheduleReferences {
    pub fn new(store: Arc<dyn AppointmentStore>, clock: Arc<ClinicClock>) -> Self {
        Self { store, clock }
    }
}

#[async_trait]
impl ScheduleReferences for AppointmentScheduleReferences {
    async fn has_past_appointments(
        &self,
        window: &ScheduleWindow,
        now: DateTime<Utc>,
    ) -> Result<bool, ScheduleError> {
        let filter = AppointmentFilter {
            doctor_id: Some(window.doctor_id),
            ..Default::default()
        };
        let appointments = self
            .store
            .list(&filter)
            .await
            .map_err(|e| ScheduleError::Storage(e.to_string()))?;

        let mut offsets: HashMap<Option<Uuid>, FixedOffset> = HashMap::new();
        for appointment in appointments
            .into_iter()
            .filter(|a| a.status.is_active() && a.start_time < now)
        {
            let offset = match offsets.get(&appointment.clinic_id) {
                Some(offset) => *offset,
                None => {
                    // Clinics that no longer resolve fall back to the default zone
                    let offset = self
                        .clock
                        .offset_for(appointment.clinic_id)
                        .await
                        .unwrap_or_else(|_| self.clock.default_offset());
                    offsets.insert(appointment.clinic_id, offset);
                    offset
                }
            };

            let Ok(local) = ClinicClock::localize(offset, appointment.start_time, appointment.end_time) else {
                continue;
            };
            if window.applies_to(local.date) && window.contains(local.start, local.end) {
                return Ok(true);
            }
        }

        Ok(false)
    }
}
