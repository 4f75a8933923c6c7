//! Read-only collaborators the scheduling core calls through narrow traits.
//!
//! Clinic and patient records are owned elsewhere (admin screens, identity
//! provisioning). The core only needs a clinic's fixed offset and a patient's
//! display name, so that is all these traits expose.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use shared_models::Clinic;

use crate::supabase::{filter_value, SupabaseClient};

#[async_trait]
pub trait ClinicDirectory: Send + Sync {
    async fn get_clinic(&self, clinic_id: Uuid) -> Result<Option<Clinic>>;
}

#[async_trait]
pub trait PatientDirectory: Send + Sync {
    async fn resolve_display_name(&self, patient_id: Uuid) -> Result<Option<String>>;
}

// ==============================================================================
// SUPABASE-BACKED DIRECTORIES
// ==============================================================================

pub struct SupabaseClinicDirectory {
    supabase: Arc<SupabaseClient>,
    default_offset: String,
}

impl SupabaseClinicDirectory {
    pub fn new(supabase: Arc<SupabaseClient>, default_offset: impl Into<String>) -> Self {
        Self {
            supabase,
            default_offset: default_offset.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ClinicRow {
    id: Uuid,
    name: String,
    utc_offset: Option<String>,
}

#[async_trait]
impl ClinicDirectory for SupabaseClinicDirectory {
    async fn get_clinic(&self, clinic_id: Uuid) -> Result<Option<Clinic>> {
        let path = format!(
            "/rest/v1/clinics?id=eq.{}&select=id,name,utc_offset",
            filter_value(&clinic_id.to_string())
        );
        let rows: Vec<ClinicRow> = self.supabase.select_rows(&path).await?;
        debug!("Clinic lookup for {} returned {} rows", clinic_id, rows.len());

        Ok(rows.into_iter().next().map(|row| Clinic {
            id: row.id,
            name: row.name,
            utc_offset: row.utc_offset.unwrap_or_else(|| self.default_offset.clone()),
        }))
    }
}

pub struct SupabasePatientDirectory {
    supabase: Arc<SupabaseClient>,
}

impl SupabasePatientDirectory {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }
}

#[derive(Debug, Deserialize)]
struct PatientNameRow {
    first_name: Option<String>,
    last_name: Option<String>,
}

#[async_trait]
impl PatientDirectory for SupabasePatientDirectory {
    async fn resolve_display_name(&self, patient_id: Uuid) -> Result<Option<String>> {
        let path = format!(
            "/rest/v1/patients?id=eq.{}&select=first_name,last_name",
            filter_value(&patient_id.to_string())
        );
        let rows: Vec<PatientNameRow> = self.supabase.select_rows(&path).await?;

        Ok(rows.into_iter().next().and_then(|row| {
            let name = [row.first_name, row.last_name]
                .into_iter()
                .flatten()
                .collect::<Vec<_>>()
                .join(" ");
            (!name.trim().is_empty()).then_some(name)
        }))
    }
}

// ==============================================================================
// IN-MEMORY DIRECTORIES
// ==============================================================================

#[derive(Default)]
pub struct InMemoryClinicDirectory {
    clinics: RwLock<HashMap<Uuid, Clinic>>,
}

impl InMemoryClinicDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, clinic: Clinic) {
        self.clinics.write().await.insert(clinic.id, clinic);
    }
}

#[async_trait]
impl ClinicDirectory for InMemoryClinicDirectory {
    async fn get_clinic(&self, clinic_id: Uuid) -> Result<Option<Clinic>> {
        Ok(self.clinics.read().await.get(&clinic_id).cloned())
    }
}

#[derive(Default)]
pub struct InMemoryPatientDirectory {
    names: RwLock<HashMap<Uuid, String>>,
}

impl InMemoryPatientDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, patient_id: Uuid, display_name: impl Into<String>) {
        self.names.write().await.insert(patient_id, display_name.into());
    }
}

#[async_trait]
impl PatientDirectory for InMemoryPatientDirectory {
    async fn resolve_display_name(&self, patient_id: Uuid) -> Result<Option<String>> {
        Ok(self.names.read().await.get(&patient_id).cloned())
    }
}
