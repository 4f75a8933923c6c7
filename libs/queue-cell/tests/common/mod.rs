#![allow(dead_code)]

use std::sync::Arc;

use chrono::{Duration, Utc};
use uuid::Uuid;

use appointment_cell::models::{Appointment, AppointmentStatus};
use appointment_cell::services::{AppointmentStore, InMemoryAppointmentStore};
use queue_cell::models::{AdmitTicketRequest, Queue, QueueTicket};
use queue_cell::services::{InMemoryQueueStore, InMemoryTicketStore, QueueLifecycle, RealtimeHub};
use shared_database::directory::{InMemoryClinicDirectory, InMemoryPatientDirectory};
use shared_models::Clinic;

pub struct Harness {
    pub lifecycle: Arc<QueueLifecycle>,
    pub hub: Arc<RealtimeHub>,
    pub clinics: Arc<InMemoryClinicDirectory>,
    pub appointments: Arc<InMemoryAppointmentStore>,
    pub patients: Arc<InMemoryPatientDirectory>,
    pub clinic_id: Uuid,
}

impl Harness {
    pub async fn open_queue(&self) -> Queue {
        self.lifecycle.open(self.clinic_id).await.unwrap()
    }

    pub async fn admit(&self, queue_id: Uuid, ticket_number: i32, priority: i16) -> QueueTicket {
        self.lifecycle
            .admit(AdmitTicketRequest {
                ticket_number: Some(ticket_number),
                priority: Some(priority),
                ..AdmitTicketRequest::walk_in(queue_id)
            })
            .await
            .unwrap()
    }

    pub async fn add_clinic(&self, name: &str) -> Uuid {
        let id = Uuid::new_v4();
        self.clinics
            .insert(Clinic {
                id,
                name: name.to_string(),
                utc_offset: "+08:00".to_string(),
            })
            .await;
        id
    }

    pub async fn book_appointment(&self) -> Appointment {
        let start = Utc::now() + Duration::hours(1);
        self.appointments
            .insert(Appointment {
                id: Uuid::new_v4(),
                doctor_id: Uuid::new_v4(),
                clinic_id: Some(self.clinic_id),
                patient_id: Some(Uuid::new_v4()),
                start_time: start,
                end_time: start + Duration::minutes(15),
                status: AppointmentStatus::Scheduled,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            })
            .await
            .unwrap()
    }
}

pub async fn harness() -> Harness {
    harness_with_capacity(64).await
}

pub async fn harness_with_capacity(capacity: usize) -> Harness {
    let hub = Arc::new(RealtimeHub::new(capacity));
    let clinics = Arc::new(InMemoryClinicDirectory::new());
    let appointments = Arc::new(InMemoryAppointmentStore::new());
    let patients = Arc::new(InMemoryPatientDirectory::new());

    let clinic_id = Uuid::new_v4();
    clinics
        .insert(Clinic {
            id: clinic_id,
            name: "Toa Payoh Polyclinic".to_string(),
            utc_offset: "+08:00".to_string(),
        })
        .await;

    let lifecycle = Arc::new(QueueLifecycle::new(
        Arc::new(InMemoryQueueStore::new()),
        Arc::new(InMemoryTicketStore::new()),
        appointments.clone(),
        clinics.clone(),
        hub.clone(),
    ));

    Harness {
        lifecycle,
        hub,
        clinics,
        appointments,
        patients,
        clinic_id,
    }
}
