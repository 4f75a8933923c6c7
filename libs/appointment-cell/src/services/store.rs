use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use shared_database::supabase::{filter_value, timestamp_filter, SupabaseClient};

use crate::error::AppointmentError;
use crate::models::{Appointment, AppointmentFilter, AppointmentStatus};

#[async_trait]
pub trait AppointmentStore: Send + Sync {
    async fn insert(&self, appointment: Appointment) -> Result<Appointment, AppointmentError>;
    async fn get(&self, id: Uuid) -> Result<Option<Appointment>, AppointmentError>;
    async fn update(&self, appointment: Appointment) -> Result<Appointment, AppointmentError>;
    async fn list(&self, filter: &AppointmentFilter) -> Result<Vec<Appointment>, AppointmentError>;

    /// Active appointments of `doctor_id` overlapping `[start, end)`.
    async fn count_overlapping(
        &self,
        doctor_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        exclude: Option<Uuid>,
    ) -> Result<usize, AppointmentError>;

    /// Appointments in `status` starting in `[from, to)`.
    async fn list_by_status_between(
        &self,
        status: AppointmentStatus,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Appointment>, AppointmentError>;
}

#[derive(Default)]
pub struct InMemoryAppointmentStore {
    appointments: RwLock<HashMap<Uuid, Appointment>>,
}

impl InMemoryAppointmentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn sorted(mut appointments: Vec<Appointment>) -> Vec<Appointment> {
    appointments.sort_by_key(|a| (a.start_time, a.id));
    appointments
}

#[async_trait]
impl AppointmentStore for InMemoryAppointmentStore {
    async fn insert(&self, appointment: Appointment) -> Result<Appointment, AppointmentError> {
        self.appointments
            .write()
            .await
            .insert(appointment.id, appointment.clone());
        Ok(appointment)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Appointment>, AppointmentError> {
        Ok(self.appointments.read().await.get(&id).cloned())
    }

    async fn update(&self, appointment: Appointment) -> Result<Appointment, AppointmentError> {
        let mut appointments = self.appointments.write().await;
        match appointments.get_mut(&appointment.id) {
            Some(existing) => {
                *existing = appointment.clone();
                Ok(appointment)
            }
            None => Err(AppointmentError::NotFound(appointment.id)),
        }
    }

    async fn list(&self, filter: &AppointmentFilter) -> Result<Vec<Appointment>, AppointmentError> {
        let appointments = self.appointments.read().await;
        Ok(sorted(
            appointments
                .values()
                .filter(|a| filter.matches(a))
                .cloned()
                .collect(),
        ))
    }

    async fn count_overlapping(
        &self,
        doctor_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        exclude: Option<Uuid>,
    ) -> Result<usize, AppointmentError> {
        let appointments = self.appointments.read().await;
        Ok(appointments
            .values()
            .filter(|a| a.doctor_id == doctor_id && a.status.is_active())
            .filter(|a| Some(a.id) != exclude)
            .filter(|a| a.overlaps(start, end))
            .count())
    }

    async fn list_by_status_between(
        &self,
        status: AppointmentStatus,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Appointment>, AppointmentError> {
        let appointments = self.appointments.read().await;
        Ok(sorted(
            appointments
                .values()
                .filter(|a| a.status == status && a.start_time >= from && a.start_time < to)
                .cloned()
                .collect(),
        ))
    }
}

/// `appointments` table row.
#[derive(Debug, Serialize, Deserialize)]
struct AppointmentRow {
    id: Uuid,
    doctor_id: Uuid,
    clinic_id: Option<Uuid>,
    patient_id: Option<Uuid>,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    status: AppointmentStatus,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<AppointmentRow> for Appointment {
    fn from(row: AppointmentRow) -> Self {
        Self {
            id: row.id,
            doctor_id: row.doctor_id,
            clinic_id: row.clinic_id,
            patient_id: row.patient_id,
            start_time: row.start_time,
            end_time: row.end_time,
            status: row.status,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

impl From<&Appointment> for AppointmentRow {
    fn from(a: &Appointment) -> Self {
        Self {
            id: a.id,
            doctor_id: a.doctor_id,
            clinic_id: a.clinic_id,
            patient_id: a.patient_id,
            start_time: a.start_time,
            end_time: a.end_time,
            status: a.status,
            created_at: a.created_at,
            updated_at: a.updated_at,
        }
    }
}

pub struct SupabaseAppointmentStore {
    supabase: Arc<SupabaseClient>,
}

impl SupabaseAppointmentStore {
    const TABLE: &'static str = "appointments";

    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }

    async fn select(&self, filters: &str) -> Result<Vec<Appointment>, AppointmentError> {
        let path = format!("/rest/v1/{}?{}", Self::TABLE, filters);
        let rows: Vec<AppointmentRow> = self.supabase.select_rows(&path).await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }
}

#[async_trait]
impl AppointmentStore for SupabaseAppointmentStore {
    async fn insert(&self, appointment: Appointment) -> Result<Appointment, AppointmentError> {
        let row = serde_json::to_value(AppointmentRow::from(&appointment))
            .map_err(|e| AppointmentError::Storage(e.to_string()))?;
        let stored: AppointmentRow = self.supabase.insert_row(Self::TABLE, row).await?;
        debug!("Appointment {} stored", stored.id);
        Ok(stored.into())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Appointment>, AppointmentError> {
        let filters = format!("id=eq.{}", filter_value(&id.to_string()));
        Ok(self.select(&filters).await?.into_iter().next())
    }

    async fn update(&self, appointment: Appointment) -> Result<Appointment, AppointmentError> {
        let patch = json!({
            "start_time": appointment.start_time,
            "end_time": appointment.end_time,
            "status": appointment.status,
            "updated_at": appointment.updated_at,
        });
        let filters = format!("id=eq.{}", filter_value(&appointment.id.to_string()));
        let rows: Vec<AppointmentRow> = self
            .supabase
            .update_rows(Self::TABLE, &filters, patch)
            .await?;

        rows.into_iter()
            .next()
            .map(Into::into)
            .ok_or(AppointmentError::NotFound(appointment.id))
    }

    async fn list(&self, filter: &AppointmentFilter) -> Result<Vec<Appointment>, AppointmentError> {
        let mut filters = vec!["order=start_time.asc".to_string()];
        if let Some(doctor_id) = filter.doctor_id {
            filters.push(format!("doctor_id=eq.{}", doctor_id));
        }
        if let Some(clinic_id) = filter.clinic_id {
            filters.push(format!("clinic_id=eq.{}", clinic_id));
        }
        if let Some(status) = filter.status {
            filters.push(format!("status=eq.{}", status));
        }
        self.select(&filters.join("&")).await
    }

    async fn count_overlapping(
        &self,
        doctor_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        exclude: Option<Uuid>,
    ) -> Result<usize, AppointmentError> {
        let mut filters = format!(
            "select=id&doctor_id=eq.{}&status=in.(scheduled,confirmed)&start_time=lt.{}&end_time=gt.{}",
            doctor_id,
            timestamp_filter(&end),
            timestamp_filter(&start)
        );
        if let Some(id) = exclude {
            filters.push_str(&format!("&id=neq.{}", id));
        }

        let path = format!("/rest/v1/{}?{}", Self::TABLE, filters);
        let rows: Vec<serde_json::Value> = self.supabase.select_rows(&path).await?;
        Ok(rows.len())
    }

    async fn list_by_status_between(
        &self,
        status: AppointmentStatus,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Appointment>, AppointmentError> {
        let filters = format!(
            "status=eq.{}&start_time=gte.{}&start_time=lt.{}&order=start_time.asc",
            status,
            timestamp_filter(&from),
            timestamp_filter(&to)
        );
        self.select(&filters).await
    }
}
