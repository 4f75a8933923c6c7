use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use shared_database::supabase::{filter_value, SupabaseClient};

use crate::error::ScheduleError;
use crate::models::ScheduleWindow;

#[async_trait]
pub trait ScheduleStore: Send + Sync {
    async fn insert(&self, window: ScheduleWindow) -> Result<ScheduleWindow, ScheduleError>;
    async fn get(&self, id: Uuid) -> Result<Option<ScheduleWindow>, ScheduleError>;
    async fn list_by_doctor(&self, doctor_id: Uuid) -> Result<Vec<ScheduleWindow>, ScheduleError>;
    async fn update(&self, window: ScheduleWindow) -> Result<ScheduleWindow, ScheduleError>;
    async fn delete(&self, id: Uuid) -> Result<bool, ScheduleError>;
}

#[derive(Default)]
pub struct InMemoryScheduleStore {
    windows: RwLock<HashMap<Uuid, ScheduleWindow>>,
}

impl InMemoryScheduleStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ScheduleStore for InMemoryScheduleStore {
    async fn insert(&self, window: ScheduleWindow) -> Result<ScheduleWindow, ScheduleError> {
        self.windows.write().await.insert(window.id, window.clone());
        Ok(window)
    }

    async fn get(&self, id: Uuid) -> Result<Option<ScheduleWindow>, ScheduleError> {
        Ok(self.windows.read().await.get(&id).cloned())
    }

    async fn list_by_doctor(&self, doctor_id: Uuid) -> Result<Vec<ScheduleWindow>, ScheduleError> {
        let mut windows: Vec<ScheduleWindow> = self
            .windows
            .read()
            .await
            .values()
            .filter(|w| w.doctor_id == doctor_id)
            .cloned()
            .collect();
        windows.sort_by_key(|w| (w.day_of_week, w.start_time));
        Ok(windows)
    }

    async fn update(&self, window: ScheduleWindow) -> Result<ScheduleWindow, ScheduleError> {
        let mut windows = self.windows.write().await;
        match windows.get_mut(&window.id) {
            Some(existing) => {
                *existing = window.clone();
                Ok(window)
            }
            None => Err(ScheduleError::NotFound(window.id)),
        }
    }

    async fn delete(&self, id: Uuid) -> Result<bool, ScheduleError> {
        Ok(self.windows.write().await.remove(&id).is_some())
    }
}

/// `schedules` table row.
#[derive(Debug, Serialize, Deserialize)]
struct ScheduleRow {
    id: Uuid,
    doctor_id: Uuid,
    day_of_week: u32,
    start_time: NaiveTime,
    end_time: NaiveTime,
    slot_duration_minutes: u32,
    valid_from: Option<NaiveDate>,
    valid_to: Option<NaiveDate>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<ScheduleRow> for ScheduleWindow {
    fn from(row: ScheduleRow) -> Self {
        Self {
            id: row.id,
            doctor_id: row.doctor_id,
            day_of_week: row.day_of_week,
            start_time: row.start_time,
            end_time: row.end_time,
            slot_duration_minutes: row.slot_duration_minutes,
            valid_from: row.valid_from,
            valid_to: row.valid_to,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

impl From<&ScheduleWindow> for ScheduleRow {
    fn from(window: &ScheduleWindow) -> Self {
        Self {
            id: window.id,
            doctor_id: window.doctor_id,
            day_of_week: window.day_of_week,
            start_time: window.start_time,
            end_time: window.end_time,
            slot_duration_minutes: window.slot_duration_minutes,
            valid_from: window.valid_from,
            valid_to: window.valid_to,
            created_at: window.created_at,
            updated_at: window.updated_at,
        }
    }
}

pub struct SupabaseScheduleStore {
    supabase: Arc<SupabaseClient>,
}

impl SupabaseScheduleStore {
    const TABLE: &'static str = "schedules";

    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }
}

#[async_trait]
impl ScheduleStore for SupabaseScheduleStore {
    async fn insert(&self, window: ScheduleWindow) -> Result<ScheduleWindow, ScheduleError> {
        let row = serde_json::to_value(ScheduleRow::from(&window))
            .map_err(|e| ScheduleError::Storage(e.to_string()))?;
        let stored: ScheduleRow = self.supabase.insert_row(Self::TABLE, row).await?;
        debug!("Schedule {} stored for doctor {}", stored.id, stored.doctor_id);
        Ok(stored.into())
    }

    async fn get(&self, id: Uuid) -> Result<Option<ScheduleWindow>, ScheduleError> {
        let path = format!("/rest/v1/{}?id=eq.{}", Self::TABLE, filter_value(&id.to_string()));
        let rows: Vec<ScheduleRow> = self.supabase.select_rows(&path).await?;
        Ok(rows.into_iter().next().map(Into::into))
    }

    async fn list_by_doctor(&self, doctor_id: Uuid) -> Result<Vec<ScheduleWindow>, ScheduleError> {
        let path = format!(
            "/rest/v1/{}?doctor_id=eq.{}&order=day_of_week.asc,start_time.asc",
            Self::TABLE,
            filter_value(&doctor_id.to_string())
        );
        let rows: Vec<ScheduleRow> = self.supabase.select_rows(&path).await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn update(&self, window: ScheduleWindow) -> Result<ScheduleWindow, ScheduleError> {
        let patch = json!({
            "day_of_week": window.day_of_week,
            "start_time": window.start_time,
            "end_time": window.end_time,
            "slot_duration_minutes": window.slot_duration_minutes,
            "valid_from": window.valid_from,
            "valid_to": window.valid_to,
            "updated_at": window.updated_at,
        });
        let filters = format!("id=eq.{}", filter_value(&window.id.to_string()));
        let rows: Vec<ScheduleRow> = self.supabase.update_rows(Self::TABLE, &filters, patch).await?;

        rows.into_iter()
            .next()
            .map(Into::into)
            .ok_or(ScheduleError::NotFound(window.id))
    }

    async fn delete(&self, id: Uuid) -> Result<bool, ScheduleError> {
        let filters = format!("id=eq.{}", filter_value(&id.to_string()));
        Ok(self.supabase.delete_rows(Self::TABLE, &filters).await? > 0)
    }
}
