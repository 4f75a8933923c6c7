use std::sync::Arc;

use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, NaiveTime, Offset, Utc, Weekday};
use tracing::warn;
use uuid::Uuid;

use shared_database::ClinicDirectory;
use shared_models::clinic::parse_utc_offset;

use crate::error::AppointmentError;

/// An appointment interval as seen on the clinic's wall clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalInterval {
    pub date: NaiveDate,
    pub weekday: Weekday,
    pub start: NaiveTime,
    pub end: NaiveTime,
}

/// Resolves the fixed offset a clinic's schedules are written in.
pub struct ClinicClock {
    clinics: Arc<dyn ClinicDirectory>,
    default_offset: FixedOffset,
}

impl ClinicClock {
    pub fn new(clinics: Arc<dyn ClinicDirectory>, default_offset: &str) -> Self {
        let default_offset = parse_utc_offset(default_offset).unwrap_or_else(|| {
            warn!("Invalid default clinic offset '{}', using UTC", default_offset);
            Utc.fix()
        });
        Self {
            clinics,
            default_offset,
        }
    }

    pub fn default_offset(&self) -> FixedOffset {
        self.default_offset
    }

    pub async fn offset_for(&self, clinic_id: Option<Uuid>) -> Result<FixedOffset, AppointmentError> {
        let Some(clinic_id) = clinic_id else {
            return Ok(self.default_offset);
        };

        let clinic = self
            .clinics
            .get_clinic(clinic_id)
            .await
            .map_err(|e| AppointmentError::Upstream(format!("Clinic lookup failed: {}", e)))?
            .ok_or_else(|| AppointmentError::InvalidInput(format!("Unknown clinic {}", clinic_id)))?;

        Ok(clinic.offset().unwrap_or_else(|| {
            warn!(
                "Clinic {} has invalid offset '{}', using default",
                clinic.id, clinic.utc_offset
            );
            self.default_offset
        }))
    }

    /// Both instants must fall on the same local date.
    pub fn localize(
        offset: FixedOffset,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<LocalInterval, AppointmentError> {
        let local_start = start.with_timezone(&offset);
        let local_end = end.with_timezone(&offset);

        if local_start.date_naive() != local_end.date_naive() {
            return Err(AppointmentError::OutsideSchedule);
        }

        Ok(LocalInterval {
            date: local_start.date_naive(),
            weekday: local_start.weekday(),
            start: local_start.time(),
            end: local_end.time(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::TimeZone;

    fn sgt() -> FixedOffset {
        FixedOffset::east_opt(8 * 3600).unwrap()
    }

    #[test]
    fn utc_instants_map_to_clinic_wall_clock() {
        // 01:00Z is 09:00 in a +08:00 clinic
        let start = Utc.with_ymd_and_hms(2025, 3, 3, 1, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2025, 3, 3, 1, 30, 0).unwrap();

        let local = ClinicClock::localize(sgt(), start, end).unwrap();
        assert_eq!(local.weekday, Weekday::Mon);
        assert_eq!(local.start, NaiveTime::from_hms_opt(9, 0, 0).unwrap());
        assert_eq!(local.end, NaiveTime::from_hms_opt(9, 30, 0).unwrap());
    }

    #[test]
    fn weekday_follows_local_date_not_utc() {
        // Sunday 17:00Z is already Monday 01:00 in the clinic
        let start = Utc.with_ymd_and_hms(2025, 3, 2, 17, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2025, 3, 2, 17, 30, 0).unwrap();
        assert_eq!(ClinicClock::localize(sgt(), start, end).unwrap().weekday, Weekday::Mon);
    }

    #[test]
    fn interval_crossing_local_midnight_is_outside_schedule() {
        let start = Utc.with_ymd_and_hms(2025, 3, 3, 15, 30, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2025, 3, 3, 16, 30, 0).unwrap();
        assert_matches!(
            ClinicClock::localize(sgt(), start, end),
            Err(AppointmentError::OutsideSchedule)
        );
    }
}
