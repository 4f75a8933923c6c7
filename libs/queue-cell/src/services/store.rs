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

use crate::error::QueueError;
use crate::models::{
    ListQueuesOptions, Queue, QueuePage, QueueSortField, QueueStatus, QueueTicket, SortDirection,
    TicketStatus,
};

#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Fails with `Conflict` when the clinic already has a non-closed queue.
    async fn insert(&self, queue: Queue) -> Result<Queue, QueueError>;
    async fn get(&self, id: Uuid) -> Result<Option<Queue>, QueueError>;
    async fn find_open_for_clinic(&self, clinic_id: Uuid) -> Result<Option<Queue>, QueueError>;

    /// Writes `queue` only if the stored row still carries
    /// `previous_updated_at`.
    async fn update(&self, queue: Queue, previous_updated_at: DateTime<Utc>)
        -> Result<Queue, QueueError>;

    async fn list(&self, options: &ListQueuesOptions) -> Result<QueuePage, QueueError>;
}

#[async_trait]
pub trait TicketStore: Send + Sync {
    /// Fails with `Conflict` when the ticket number is taken in its queue.
    async fn insert(&self, ticket: QueueTicket) -> Result<QueueTicket, QueueError>;
    async fn get(&self, id: Uuid) -> Result<Option<QueueTicket>, QueueError>;

    /// Ordered by ticket number.
    async fn list_for_queue(&self, queue_id: Uuid) -> Result<Vec<QueueTicket>, QueueError>;

    async fn update(
        &self,
        ticket: QueueTicket,
        previous_updated_at: DateTime<Utc>,
    ) -> Result<QueueTicket, QueueError>;
}

// ==============================================================================
// IN-MEMORY STORES
// ==============================================================================

#[derive(Default)]
pub struct InMemoryQueueStore {
    queues: RwLock<HashMap<Uuid, Queue>>,
}

impl InMemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn sort_queues(queues: &mut [Queue], sort_by: QueueSortField, sort_dir: SortDirection) {
    queues.sort_by(|a, b| {
        let ordering = match sort_by {
            QueueSortField::CreatedAt => a.created_at.cmp(&b.created_at),
            QueueSortField::UpdatedAt => a.updated_at.cmp(&b.updated_at),
            QueueSortField::Id => a.id.cmp(&b.id),
        }
        .then_with(|| a.id.cmp(&b.id));

        match sort_dir {
            SortDirection::Asc => ordering,
            SortDirection::Desc => ordering.reverse(),
        }
    });
}

#[async_trait]
impl QueueStore for InMemoryQueueStore {
    async fn insert(&self, queue: Queue) -> Result<Queue, QueueError> {
        let mut queues = self.queues.write().await;
        let clinic_busy = queue.status.is_open()
            && queues
                .values()
                .any(|q| q.clinic_id == queue.clinic_id && q.status.is_open());
        if clinic_busy {
            return Err(QueueError::Conflict(format!(
                "Clinic {} already has an open queue",
                queue.clinic_id
            )));
        }

        queues.insert(queue.id, queue.clone());
        Ok(queue)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Queue>, QueueError> {
        Ok(self.queues.read().await.get(&id).cloned())
    }

    async fn find_open_for_clinic(&self, clinic_id: Uuid) -> Result<Option<Queue>, QueueError> {
        Ok(self
            .queues
            .read()
            .await
            .values()
            .find(|q| q.clinic_id == clinic_id && q.status.is_open())
            .cloned())
    }

    async fn update(
        &self,
        queue: Queue,
        previous_updated_at: DateTime<Utc>,
    ) -> Result<Queue, QueueError> {
        let mut queues = self.queues.write().await;
        let existing = queues
            .get_mut(&queue.id)
            .ok_or(QueueError::QueueNotFound(queue.id))?;
        if existing.updated_at != previous_updated_at {
            return Err(QueueError::ConcurrentModification);
        }

        *existing = queue.clone();
        Ok(queue)
    }

    async fn list(&self, options: &ListQueuesOptions) -> Result<QueuePage, QueueError> {
        let mut matching: Vec<Queue> = self
            .queues
            .read()
            .await
            .values()
            .filter(|q| options.matches(q))
            .cloned()
            .collect();
        sort_queues(&mut matching, options.sort_by, options.sort_dir);

        let total = matching.len();
        let items = matching
            .into_iter()
            .skip(options.offset())
            .take(options.size as usize)
            .collect();

        Ok(QueuePage {
            items,
            page: options.page,
            size: options.size,
            total_count: options.include_count.then_some(total),
        })
    }
}

#[derive(Default)]
pub struct InMemoryTicketStore {
    tickets: RwLock<HashMap<Uuid, QueueTicket>>,
}

impl InMemoryTicketStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TicketStore for InMemoryTicketStore {
    async fn insert(&self, ticket: QueueTicket) -> Result<QueueTicket, QueueError> {
        let mut tickets = self.tickets.write().await;
        let taken = tickets
            .values()
            .any(|t| t.queue_id == ticket.queue_id && t.ticket_number == ticket.ticket_number);
        if taken {
            return Err(QueueError::Conflict(format!(
                "Ticket number {} is already used in queue {}",
                ticket.ticket_number, ticket.queue_id
            )));
        }

        tickets.insert(ticket.id, ticket.clone());
        Ok(ticket)
    }

    async fn get(&self, id: Uuid) -> Result<Option<QueueTicket>, QueueError> {
        Ok(self.tickets.read().await.get(&id).cloned())
    }

    async fn list_for_queue(&self, queue_id: Uuid) -> Result<Vec<QueueTicket>, QueueError> {
        let mut tickets: Vec<QueueTicket> = self
            .tickets
            .read()
            .await
            .values()
            .filter(|t| t.queue_id == queue_id)
            .cloned()
            .collect();
        tickets.sort_by_key(|t| t.ticket_number);
        Ok(tickets)
    }

    async fn update(
        &self,
        ticket: QueueTicket,
        previous_updated_at: DateTime<Utc>,
    ) -> Result<QueueTicket, QueueError> {
        let mut tickets = self.tickets.write().await;
        let existing = tickets
            .get_mut(&ticket.id)
            .ok_or(QueueError::TicketNotFound(ticket.id))?;
        if existing.updated_at != previous_updated_at {
            return Err(QueueError::ConcurrentModification);
        }

        *existing = ticket.clone();
        Ok(ticket)
    }
}

// ==============================================================================
// SUPABASE STORES
// ==============================================================================

/// `queues` table row.
#[derive(Debug, Serialize, Deserialize)]
struct QueueRow {
    id: Uuid,
    clinic_id: Uuid,
    status: QueueStatus,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<QueueRow> for Queue {
    fn from(row: QueueRow) -> Self {
        Self {
            id: row.id,
            clinic_id: row.clinic_id,
            status: row.status,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

impl From<&Queue> for QueueRow {
    fn from(q: &Queue) -> Self {
        Self {
            id: q.id,
            clinic_id: q.clinic_id,
            status: q.status,
            created_at: q.created_at,
            updated_at: q.updated_at,
        }
    }
}

/// `queue_tickets` table row.
#[derive(Debug, Serialize, Deserialize)]
struct TicketRow {
    id: Uuid,
    queue_id: Uuid,
    appointment_id: Option<Uuid>,
    patient_id: Option<Uuid>,
    ticket_number: i32,
    priority: i16,
    status: TicketStatus,
    called_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    no_show_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<TicketRow> for QueueTicket {
    fn from(row: TicketRow) -> Self {
        Self {
            id: row.id,
            queue_id: row.queue_id,
            appointment_id: row.appointment_id,
            patient_id: row.patient_id,
            ticket_number: row.ticket_number,
            priority: row.priority,
            status: row.status,
            called_at: row.called_at,
            completed_at: row.completed_at,
            no_show_at: row.no_show_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

impl From<&QueueTicket> for TicketRow {
    fn from(t: &QueueTicket) -> Self {
        Self {
            id: t.id,
            queue_id: t.queue_id,
            appointment_id: t.appointment_id,
            patient_id: t.patient_id,
            ticket_number: t.ticket_number,
            priority: t.priority,
            status: t.status,
            called_at: t.called_at,
            completed_at: t.completed_at,
            no_show_at: t.no_show_at,
            created_at: t.created_at,
            updated_at: t.updated_at,
        }
    }
}

fn cas_filters(id: Uuid, previous_updated_at: &DateTime<Utc>) -> String {
    format!(
        "id=eq.{}&updated_at=eq.{}",
        filter_value(&id.to_string()),
        timestamp_filter(previous_updated_at)
    )
}

pub struct SupabaseQueueStore {
    supabase: Arc<SupabaseClient>,
}

impl SupabaseQueueStore {
    const TABLE: &'static str = "queues";

    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }

    async fn select(&self, filters: &str) -> Result<Vec<Queue>, QueueError> {
        let path = format!("/rest/v1/{}?{}", Self::TABLE, filters);
        let rows: Vec<QueueRow> = self.supabase.select_rows(&path).await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    fn filters(options: &ListQueuesOptions) -> Vec<String> {
        let mut filters = Vec::new();
        if let Some(clinic_id) = options.clinic_id {
            filters.push(format!("clinic_id=eq.{}", clinic_id));
        }
        if !options.statuses.is_empty() {
            let statuses: Vec<&str> = options.statuses.iter().map(QueueStatus::as_str).collect();
            filters.push(format!("status=in.({})", statuses.join(",")));
        }
        filters
    }
}

#[async_trait]
impl QueueStore for SupabaseQueueStore {
    async fn insert(&self, queue: Queue) -> Result<Queue, QueueError> {
        let row = serde_json::to_value(QueueRow::from(&queue))?;
        let stored: QueueRow = self.supabase.insert_row(Self::TABLE, row).await?;
        debug!("Queue {} stored for clinic {}", stored.id, stored.clinic_id);
        Ok(stored.into())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Queue>, QueueError> {
        let filters = format!("id=eq.{}", filter_value(&id.to_string()));
        Ok(self.select(&filters).await?.into_iter().next())
    }

    async fn find_open_for_clinic(&self, clinic_id: Uuid) -> Result<Option<Queue>, QueueError> {
        let filters = format!(
            "clinic_id=eq.{}&status=neq.{}&limit=1",
            clinic_id,
            QueueStatus::Closed
        );
        Ok(self.select(&filters).await?.into_iter().next())
    }

    async fn update(
        &self,
        queue: Queue,
        previous_updated_at: DateTime<Utc>,
    ) -> Result<Queue, QueueError> {
        let patch = json!({
            "status": queue.status,
            "updated_at": queue.updated_at,
        });
        let rows: Vec<QueueRow> = self
            .supabase
            .update_rows(Self::TABLE, &cas_filters(queue.id, &previous_updated_at), patch)
            .await?;

        match rows.into_iter().next() {
            Some(row) => Ok(row.into()),
            None => match self.get(queue.id).await? {
                Some(_) => Err(QueueError::ConcurrentModification),
                None => Err(QueueError::QueueNotFound(queue.id)),
            },
        }
    }

    async fn list(&self, options: &ListQueuesOptions) -> Result<QueuePage, QueueError> {
        let mut filters = Self::filters(options);
        filters.push(format!(
            "order={}.{},id.{}",
            options.sort_by.column(),
            options.sort_dir.as_str(),
            options.sort_dir.as_str()
        ));
        filters.push(format!("limit={}", options.size));
        filters.push(format!("offset={}", options.offset()));
        let items = self.select(&filters.join("&")).await?;

        let total_count = if options.include_count {
            let mut count_filters = Self::filters(options);
            count_filters.insert(0, "select=id".to_string());
            let path = format!("/rest/v1/{}?{}", Self::TABLE, count_filters.join("&"));
            let rows: Vec<serde_json::Value> = self.supabase.select_rows(&path).await?;
            Some(rows.len())
        } else {
            None
        };

        Ok(QueuePage {
            items,
            page: options.page,
            size: options.size,
            total_count,
        })
    }
}

pub struct SupabaseTicketStore {
    supabase: Arc<SupabaseClient>,
}

impl SupabaseTicketStore {
    const TABLE: &'static str = "queue_tickets";

    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }

    async fn select(&self, filters: &str) -> Result<Vec<QueueTicket>, QueueError> {
        let path = format!("/rest/v1/{}?{}", Self::TABLE, filters);
        let rows: Vec<TicketRow> = self.supabase.select_rows(&path).await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }
}

#[async_trait]
impl TicketStore for SupabaseTicketStore {
    async fn insert(&self, ticket: QueueTicket) -> Result<QueueTicket, QueueError> {
        let row = serde_json::to_value(TicketRow::from(&ticket))?;
        let stored: TicketRow = self.supabase.insert_row(Self::TABLE, row).await?;
        debug!("Ticket #{} stored in queue {}", stored.ticket_number, stored.queue_id);
        Ok(stored.into())
    }

    async fn get(&self, id: Uuid) -> Result<Option<QueueTicket>, QueueError> {
        let filters = format!("id=eq.{}", filter_value(&id.to_string()));
        Ok(self.select(&filters).await?.into_iter().next())
    }

    async fn list_for_queue(&self, queue_id: Uuid) -> Result<Vec<QueueTicket>, QueueError> {
        let filters = format!("queue_id=eq.{}&order=ticket_number.asc", queue_id);
        self.select(&filters).await
    }

    async fn update(
        &self,
        ticket: QueueTicket,
        previous_updated_at: DateTime<Utc>,
    ) -> Result<QueueTicket, QueueError> {
        let patch = json!({
            "priority": ticket.priority,
            "status": ticket.status,
            "called_at": ticket.called_at,
            "completed_at": ticket.completed_at,
            "no_show_at": ticket.no_show_at,
            "updated_at": ticket.updated_at,
        });
        let rows: Vec<TicketRow> = self
            .supabase
            .update_rows(Self::TABLE, &cas_filters(ticket.id, &previous_updated_at), patch)
            .await?;

        match rows.into_iter().next() {
            Some(row) => Ok(row.into()),
            None => match self.get(ticket.id).await? {
                Some(_) => Err(QueueError::ConcurrentModification),
                None => Err(QueueError::TicketNotFound(ticket.id)),
            },
        }
    }
}
