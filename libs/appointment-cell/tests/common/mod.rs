#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveTime, TimeZone, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use appointment_cell::models::{Appointment, BookAppointmentRequest};
use appointment_cell::services::{
    AppointmentScheduleReferences, AppointmentValidator, BookingService, ClinicClock,
    InMemoryAppointmentStore, NotificationSink, Recipient,
};
use appointment_cell::AppointmentError;
use doctor_cell::models::CreateScheduleRequest;
use doctor_cell::services::{InMemoryScheduleStore, ScheduleService};
use shared_database::directory::{InMemoryClinicDirectory, InMemoryPatientDirectory};
use shared_models::Clinic;

#[derive(Default)]
pub struct RecordingSink {
    pub sent: Mutex<Vec<(Uuid, Recipient)>>,
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn notify_appointment_scheduled(
        &self,
        appointment: &Appointment,
        recipient: &Recipient,
    ) -> Result<(), AppointmentError> {
        self.sent.lock().await.push((appointment.id, recipient.clone()));
        Ok(())
    }
}

pub struct Harness {
    pub bookings: Arc<BookingService>,
    pub schedules: Arc<ScheduleService>,
    pub store: Arc<InMemoryAppointmentStore>,
    pub patients: Arc<InMemoryPatientDirectory>,
    pub sink: Arc<RecordingSink>,
    pub clinic_id: Uuid,
    pub doctor_id: Uuid,
    pub schedule_id: Uuid,
}

impl Harness {
    pub fn request(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> BookAppointmentRequest {
        BookAppointmentRequest {
            doctor_id: Some(self.doctor_id),
            start_time: start,
            end_time: end,
            clinic_id: Some(self.clinic_id),
            patient_id: None,
        }
    }
}

/// Clinic at +08:00 with one doctor working Monday 09:00-12:00 in 15 minute slots.
pub async fn harness() -> Harness {
    let clinics = Arc::new(InMemoryClinicDirectory::new());
    let clinic_id = Uuid::new_v4();
    clinics
        .insert(Clinic {
            id: clinic_id,
            name: "Clementi".to_string(),
            utc_offset: "+08:00".to_string(),
        })
        .await;

    let store = Arc::new(InMemoryAppointmentStore::new());
    let clock = Arc::new(ClinicClock::new(clinics, "+08:00"));
    let schedules = Arc::new(ScheduleService::new(
        Arc::new(InMemoryScheduleStore::new()),
        Arc::new(AppointmentScheduleReferences::new(store.clone(), clock.clone())),
    ));

    let doctor_id = Uuid::new_v4();
    let window = schedules
        .create_schedule(
            doctor_id,
            CreateScheduleRequest {
                day_of_week: 1,
                start_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
                end_time: NaiveTime::from_hms_opt(12, 0, 0).unwrap(),
                slot_duration_minutes: Some(15),
                valid_from: None,
                valid_to: None,
            },
        )
        .await
        .unwrap();

    let patients = Arc::new(InMemoryPatientDirectory::new());
    let sink = Arc::new(RecordingSink::default());
    let validator = AppointmentValidator::new(schedules.clone(), store.clone(), clock);
    let bookings = Arc::new(BookingService::new(
        store.clone(),
        validator,
        sink.clone(),
        patients.clone(),
    ));

    Harness {
        bookings,
        schedules,
        store,
        patients,
        sink,
        clinic_id,
        doctor_id,
        schedule_id: window.id,
    }
}

/// Wall-clock time in the +08:00 clinic as a UTC instant.
pub fn local(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
    FixedOffset::east_opt(8 * 3600)
        .unwrap()
        .with_ymd_and_hms(y, m, d, h, min, 0)
        .unwrap()
        .with_timezone(&Utc)
}

/// 2030-03-04 is a Monday.
pub fn monday(h: u32, min: u32) -> DateTime<Utc> {
    local(2030, 3, 4, h, min)
}
