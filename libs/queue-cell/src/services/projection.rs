//! What each kind of subscriber is allowed to see.
//!
//! Staff consoles get the full ticket plus the patient's display name.
//! Waiting-room boards only get the ticket number, priority and status.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::warn;
use uuid::Uuid;

use shared_database::directory::PatientDirectory;

use crate::models::{QueueChange, QueueEvent, QueueSnapshot, QueueTicket, TicketStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum View {
    Staff,
    #[default]
    Display,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayTicket {
    pub ticket_number: i32,
    pub priority: i16,
    pub status: TicketStatus,
}

impl From<&QueueTicket> for DisplayTicket {
    fn from(ticket: &QueueTicket) -> Self {
        Self {
            ticket_number: ticket.ticket_number,
            priority: ticket.priority,
            status: ticket.status,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StaffTicket {
    #[serde(flatten)]
    pub ticket: QueueTicket,
    pub patient_display_name: Option<String>,
}

/// Per-session projector. Display names are cached for the life of the
/// session.
pub struct ViewProjector {
    view: View,
    patients: Arc<dyn PatientDirectory>,
    names: HashMap<Uuid, Option<String>>,
}

impl ViewProjector {
    pub fn new(view: View, patients: Arc<dyn PatientDirectory>) -> Self {
        Self {
            view,
            patients,
            names: HashMap::new(),
        }
    }

    pub fn view(&self) -> View {
        self.view
    }

    pub async fn ticket(&mut self, ticket: &QueueTicket) -> Value {
        match self.view {
            View::Display => json!(DisplayTicket::from(ticket)),
            View::Staff => {
                let patient_display_name = match ticket.patient_id {
                    Some(patient_id) => self.display_name(patient_id).await,
                    None => None,
                };
                json!(StaffTicket {
                    ticket: ticket.clone(),
                    patient_display_name,
                })
            }
        }
    }

    pub async fn snapshot_frame(&mut self, snapshots: &[QueueSnapshot]) -> Value {
        let mut queues = Vec::with_capacity(snapshots.len());
        for snapshot in snapshots {
            let mut tickets = Vec::with_capacity(snapshot.tickets.len());
            for ticket in &snapshot.tickets {
                tickets.push(self.ticket(ticket).await);
            }
            queues.push(json!({ "queue": snapshot.queue, "tickets": tickets }));
        }

        json!({
            "type": "snapshot",
            "view": self.view,
            "queues": queues,
        })
    }

    pub async fn event_frame(&mut self, event: &QueueEvent) -> Value {
        let change = match &event.change {
            QueueChange::QueueOpened { queue } => json!({ "type": "queue_opened", "queue": queue }),
            QueueChange::QueueUpdated { queue } => json!({ "type": "queue_updated", "queue": queue }),
            QueueChange::TicketAdmitted { ticket } => {
                json!({ "type": "ticket_admitted", "ticket": self.ticket(ticket).await })
            }
            QueueChange::TicketUpdated { ticket } => {
                json!({ "type": "ticket_updated", "ticket": self.ticket(ticket).await })
            }
        };

        json!({
            "type": "event",
            "sequence": event.sequence,
            "clinicId": event.clinic_id,
            "queueId": event.queue_id,
            "committedAt": event.committed_at,
            "change": change,
        })
    }

    async fn display_name(&mut self, patient_id: Uuid) -> Option<String> {
        if let Some(cached) = self.names.get(&patient_id) {
            return cached.clone();
        }

        match self.patients.resolve_display_name(patient_id).await {
            Ok(name) => {
                self.names.insert(patient_id, name.clone());
                name
            }
            Err(e) => {
                warn!("Could not resolve display name for patient {}: {}", patient_id, e);
                None
            }
        }
    }
}
