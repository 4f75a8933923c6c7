use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

pub const DEFAULT_SLOT_MINUTES: u32 = 30;

/// A recurring weekly block of bookable time for one doctor.
///
/// Times are local to the clinic and carry no zone.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleWindow {
    pub id: Uuid,
    pub doctor_id: Uuid,
    /// ISO weekday, 1 = Monday through 7 = Sunday.
    pub day_of_week: u32,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub slot_duration_minutes: u32,
    pub valid_from: Option<NaiveDate>,
    pub valid_to: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ScheduleWindow {
    pub fn weekday(&self) -> Option<Weekday> {
        iso_weekday(self.day_of_week)
    }

    /// `[start, end]` lies inside this window. Both bounds are inclusive.
    pub fn contains(&self, start: NaiveTime, end: NaiveTime) -> bool {
        self.start_time <= start && end <= self.end_time
    }

    pub fn is_valid_on(&self, date: NaiveDate) -> bool {
        self.valid_from.map_or(true, |from| from <= date) && self.valid_to.map_or(true, |to| date <= to)
    }

    /// Whether this window applies to `date`, weekday and validity range both.
    pub fn applies_to(&self, date: NaiveDate) -> bool {
        self.day_of_week == date.weekday().number_from_monday()
            && self.is_valid_on(date)
    }

    /// Consecutive slots from the window start. A trailing remainder shorter
    /// than one slot is dropped.
    pub fn slots_on(&self, date: NaiveDate) -> Vec<TimeSlot> {
        let mut slots = Vec::new();
        if !self.applies_to(date) || self.slot_duration_minutes == 0 {
            return slots;
        }

        let step = Duration::minutes(i64::from(self.slot_duration_minutes));
        let mut current = self.start_time;
        loop {
            let (next, wrapped) = current.overflowing_add_signed(step);
            if wrapped != 0 || next > self.end_time {
                break;
            }
            slots.push(TimeSlot {
                doctor_id: self.doctor_id,
                schedule_id: self.id,
                date,
                start_time: current,
                end_time: next,
            });
            current = next;
        }

        slots
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TimeSlot {
    pub doctor_id: Uuid,
    pub schedule_id: Uuid,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateScheduleRequest {
    pub day_of_week: u32,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub slot_duration_minutes: Option<u32>,
    pub valid_from: Option<NaiveDate>,
    pub valid_to: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateScheduleRequest {
    pub day_of_week: Option<u32>,
    pub start_time: Option<NaiveTime>,
    pub end_time: Option<NaiveTime>,
    pub slot_duration_minutes: Option<u32>,
    /// Absent keeps the current bound, `null` clears it.
    #[serde(default, deserialize_with = "nullable")]
    pub valid_from: Option<Option<NaiveDate>>,
    #[serde(default, deserialize_with = "nullable")]
    pub valid_to: Option<Option<NaiveDate>>,
}

fn nullable<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

pub fn iso_weekday(day_of_week: u32) -> Option<Weekday> {
    match day_of_week {
        1 => Some(Weekday::Mon),
        2 => Some(Weekday::Tue),
        3 => Some(Weekday::Wed),
        4 => Some(Weekday::Thu),
        5 => Some(Weekday::Fri),
        6 => Some(Weekday::Sat),
        7 => Some(Weekday::Sun),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window(start: (u32, u32), end: (u32, u32), slot: u32) -> ScheduleWindow {
        let now = Utc::now();
        ScheduleWindow {
            id: Uuid::new_v4(),
            doctor_id: Uuid::new_v4(),
            day_of_week: 1,
            start_time: NaiveTime::from_hms_opt(start.0, start.1, 0).unwrap(),
            end_time: NaiveTime::from_hms_opt(end.0, end.1, 0).unwrap(),
            slot_duration_minutes: slot,
            valid_from: None,
            valid_to: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn slots_stop_before_partial_remainder() {
        // 2025-03-03 is a Monday
        let monday = NaiveDate::from_ymd_opt(2025, 3, 3).unwrap();
        let slots = window((9, 0), (10, 40), 30).slots_on(monday);

        let starts: Vec<String> = slots.iter().map(|s| s.start_time.format("%H:%M").to_string()).collect();
        assert_eq!(starts, vec!["09:00", "09:30", "10:00"]);
        assert_eq!(slots.last().unwrap().end_time, NaiveTime::from_hms_opt(10, 30, 0).unwrap());
    }

    #[test]
    fn slots_do_not_wrap_past_midnight() {
        let monday = NaiveDate::from_ymd_opt(2025, 3, 3).unwrap();
        let slots = window((23, 0), (23, 59), 45).slots_on(monday);
        assert_eq!(slots.len(), 1);
    }

    #[test]
    fn validity_range_is_inclusive() {
        let mut w = window((9, 0), (12, 0), 30);
        w.valid_from = NaiveDate::from_ymd_opt(2025, 3, 3);
        w.valid_to = NaiveDate::from_ymd_opt(2025, 3, 10);

        assert!(w.applies_to(NaiveDate::from_ymd_opt(2025, 3, 3).unwrap()));
        assert!(w.applies_to(NaiveDate::from_ymd_opt(2025, 3, 10).unwrap()));
        assert!(!w.applies_to(NaiveDate::from_ymd_opt(2025, 3, 17).unwrap()));
        // Tuesday inside the range
        assert!(!w.applies_to(NaiveDate::from_ymd_opt(2025, 3, 4).unwrap()));
    }

    #[test]
    fn iso_weekday_bounds() {
        assert_eq!(iso_weekday(1), Some(Weekday::Mon));
        assert_eq!(iso_weekday(7), Some(Weekday::Sun));
        assert_eq!(iso_weekday(0), None);
        assert_eq!(iso_weekday(8), None);
    }

    #[test]
    fn update_request_tells_absent_from_null_bounds() {
        let request: UpdateScheduleRequest =
            serde_json::from_str(r#"{"validFrom": null, "endTime": "13:00:00"}"#).unwrap();
        assert_eq!(request.valid_from, Some(None));
        assert_eq!(request.valid_to, None);

        let request: UpdateScheduleRequest =
            serde_json::from_str(r#"{"validTo": "2030-01-31"}"#).unwrap();
        assert_eq!(request.valid_to, Some(NaiveDate::from_ymd_opt(2030, 1, 31)));
    }
}
