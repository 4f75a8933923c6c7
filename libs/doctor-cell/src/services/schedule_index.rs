use std::collections::HashMap;

use chrono::{Datelike, NaiveDate, NaiveTime, Weekday};
use uuid::Uuid;

use crate::models::{ScheduleWindow, TimeSlot};

/// Read-only lookup of weekly windows by doctor and weekday.
#[derive(Debug, Default, Clone)]
pub struct ScheduleIndex {
    windows: HashMap<(Uuid, u32), Vec<ScheduleWindow>>,
}

impl ScheduleIndex {
    pub fn new(windows: impl IntoIterator<Item = ScheduleWindow>) -> Self {
        let mut index: HashMap<(Uuid, u32), Vec<ScheduleWindow>> = HashMap::new();
        for window in windows {
            index
                .entry((window.doctor_id, window.day_of_week))
                .or_default()
                .push(window);
        }
        for entries in index.values_mut() {
            entries.sort_by_key(|w| (w.start_time, w.end_time));
        }
        Self { windows: index }
    }

    pub fn windows_for(&self, doctor_id: Uuid, weekday: Weekday) -> &[ScheduleWindow] {
        self.windows
            .get(&(doctor_id, weekday.number_from_monday()))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn is_within_window(
        &self,
        doctor_id: Uuid,
        weekday: Weekday,
        start: NaiveTime,
        end: NaiveTime,
    ) -> bool {
        self.windows_for(doctor_id, weekday)
            .iter()
            .any(|w| w.contains(start, end))
    }

    /// Windows for the date's weekday that are also inside their validity range.
    pub fn windows_on(&self, doctor_id: Uuid, date: NaiveDate) -> Vec<&ScheduleWindow> {
        self.windows_for(doctor_id, date.weekday())
            .iter()
            .filter(|w| w.is_valid_on(date))
            .collect()
    }

    pub fn is_within_window_on(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
        start: NaiveTime,
        end: NaiveTime,
    ) -> bool {
        self.windows_on(doctor_id, date)
            .into_iter()
            .any(|w| w.contains(start, end))
    }

    pub fn slots_on(&self, doctor_id: Uuid, date: NaiveDate) -> Vec<TimeSlot> {
        let mut slots: Vec<TimeSlot> = self
            .windows_on(doctor_id, date)
            .into_iter()
            .flat_map(|w| w.slots_on(date))
            .collect();
        slots.sort_by_key(|s| (s.start_time, s.end_time));
        slots
    }
}
