use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::error::QueueError;

pub const PRIORITY_NORMAL: i16 = 0;
pub const PRIORITY_FAST_TRACK: i16 = 1;

pub fn validate_priority(priority: i16) -> Result<i16, QueueError> {
    match priority {
        PRIORITY_NORMAL | PRIORITY_FAST_TRACK => Ok(priority),
        other => Err(QueueError::InvalidInput(format!(
            "Priority must be {} or {}, got {}",
            PRIORITY_NORMAL, PRIORITY_FAST_TRACK, other
        ))),
    }
}

// ==============================================================================
// QUEUE
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum QueueStatus {
    Active,
    Paused,
    Closed,
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Active => "ACTIVE",
            QueueStatus::Paused => "PAUSED",
            QueueStatus::Closed => "CLOSED",
        }
    }

    pub fn is_open(&self) -> bool {
        *self != QueueStatus::Closed
    }

    /// ACTIVE <-> PAUSED, either of them -> CLOSED. Nothing leaves CLOSED.
    pub fn can_transition_to(&self, next: QueueStatus) -> bool {
        matches!(
            (self, next),
            (QueueStatus::Active, QueueStatus::Paused)
                | (QueueStatus::Paused, QueueStatus::Active)
                | (QueueStatus::Active, QueueStatus::Closed)
                | (QueueStatus::Paused, QueueStatus::Closed)
        )
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueStatus {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ACTIVE" => Ok(QueueStatus::Active),
            "PAUSED" => Ok(QueueStatus::Paused),
            "CLOSED" => Ok(QueueStatus::Closed),
            other => Err(QueueError::InvalidInput(format!("Unknown queue status: {}", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Queue {
    pub id: Uuid,
    pub clinic_id: Uuid,
    pub status: QueueStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ==============================================================================
// TICKETS
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    Waiting,
    Called,
    Completed,
    NoShow,
}

impl TicketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketStatus::Waiting => "waiting",
            TicketStatus::Called => "called",
            TicketStatus::Completed => "completed",
            TicketStatus::NoShow => "no_show",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TicketStatus::Completed | TicketStatus::NoShow)
    }

    pub fn can_transition_to(&self, next: TicketStatus) -> bool {
        matches!(
            (self, next),
            (TicketStatus::Waiting, TicketStatus::Called)
                | (TicketStatus::Called, TicketStatus::Completed)
                | (TicketStatus::Called, TicketStatus::NoShow)
        )
    }

    /// Closing a queue may also settle tickets that were never called.
    pub fn can_resolve_to(&self, next: TicketStatus) -> bool {
        self.can_transition_to(next)
            || matches!(
                (self, next),
                (TicketStatus::Waiting, TicketStatus::Completed)
                    | (TicketStatus::Waiting, TicketStatus::NoShow)
            )
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueTicket {
    pub id: Uuid,
    pub queue_id: Uuid,
    pub appointment_id: Option<Uuid>,
    pub patient_id: Option<Uuid>,
    pub ticket_number: i32,
    pub priority: i16,
    pub status: TicketStatus,
    pub called_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub no_show_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl QueueTicket {
    /// Moves to `next` and stamps the matching timestamp. Callers check the
    /// transition is allowed first.
    pub fn mark(&mut self, next: TicketStatus, now: DateTime<Utc>) {
        self.status = next;
        match next {
            TicketStatus::Called => self.called_at = Some(now),
            TicketStatus::Completed => self.completed_at = Some(now),
            TicketStatus::NoShow => self.no_show_at = Some(now),
            TicketStatus::Waiting => {}
        }
    }
}

// ==============================================================================
// REQUESTS
// ==============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateQueueRequest {
    pub clinic_id: Uuid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseResolution {
    NoShow,
    Complete,
}

impl CloseResolution {
    pub fn target_status(&self) -> TicketStatus {
        match self {
            CloseResolution::NoShow => TicketStatus::NoShow,
            CloseResolution::Complete => TicketStatus::Completed,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateQueueRequest {
    pub status: Option<QueueStatus>,
    pub expected_updated_at: Option<DateTime<Utc>>,
    pub resolve_remaining: Option<CloseResolution>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmitTicketRequest {
    pub queue_id: Uuid,
    pub ticket_number: Option<i32>,
    pub priority: Option<i16>,
    pub appointment_id: Option<Uuid>,
    pub patient_id: Option<Uuid>,
}

impl AdmitTicketRequest {
    pub fn walk_in(queue_id: Uuid) -> Self {
        Self {
            queue_id,
            ticket_number: None,
            priority: None,
            appointment_id: None,
            patient_id: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTicketRequest {
    pub status: Option<TicketStatus>,
    pub priority: Option<i16>,
    pub expected_updated_at: Option<DateTime<Utc>>,
}

// ==============================================================================
// LISTING
// ==============================================================================

pub const DEFAULT_PAGE_SIZE: u32 = 50;
pub const MAX_PAGE_SIZE: u32 = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueueSortField {
    #[default]
    CreatedAt,
    UpdatedAt,
    Id,
}

impl QueueSortField {
    pub fn column(&self) -> &'static str {
        match self {
            QueueSortField::CreatedAt => "created_at",
            QueueSortField::UpdatedAt => "updated_at",
            QueueSortField::Id => "id",
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "created_at" | "createdAt" => Some(QueueSortField::CreatedAt),
            "updated_at" | "updatedAt" => Some(QueueSortField::UpdatedAt),
            "id" => Some(QueueSortField::Id),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

impl SortDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortDirection::Asc => "asc",
            SortDirection::Desc => "desc",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ListQueuesOptions {
    /// Zero-based.
    pub page: u32,
    pub size: u32,
    pub sort_by: QueueSortField,
    pub sort_dir: SortDirection,
    pub clinic_id: Option<Uuid>,
    /// Empty means every status.
    pub statuses: Vec<QueueStatus>,
    pub include_count: bool,
}

impl Default for ListQueuesOptions {
    fn default() -> Self {
        Self {
            page: 0,
            size: DEFAULT_PAGE_SIZE,
            sort_by: QueueSortField::default(),
            sort_dir: SortDirection::default(),
            clinic_id: None,
            statuses: Vec::new(),
            include_count: false,
        }
    }
}

impl ListQueuesOptions {
    pub fn open_for_clinic(clinic_id: Uuid) -> Self {
        Self {
            clinic_id: Some(clinic_id),
            statuses: vec![QueueStatus::Active, QueueStatus::Paused],
            ..Self::default()
        }
    }

    pub fn offset(&self) -> usize {
        self.page as usize * self.size as usize
    }

    /// Builds options from raw query pairs. `status` may repeat or carry a
    /// comma separated list; unknown statuses are dropped.
    pub fn from_query_pairs(pairs: &[(String, String)]) -> Result<Self, QueueError> {
        let mut options = Self::default();

        for (key, value) in pairs {
            let value = value.trim();
            match key.as_str() {
                "page" => {
                    options.page = value
                        .parse()
                        .map_err(|_| QueueError::InvalidInput(format!("Invalid page: {}", value)))?;
                }
                "size" => {
                    let size: u32 = value
                        .parse()
                        .map_err(|_| QueueError::InvalidInput(format!("Invalid size: {}", value)))?;
                    options.size = size.clamp(1, MAX_PAGE_SIZE);
                }
                "sortBy" | "sort_by" => match QueueSortField::parse(value) {
                    Some(field) => options.sort_by = field,
                    None => warn!("Ignoring unsupported sort field '{}'", value),
                },
                "sortDir" | "sort_dir" => {
                    options.sort_dir = if value.eq_ignore_ascii_case("asc") {
                        SortDirection::Asc
                    } else {
                        SortDirection::Desc
                    };
                }
                "clinicId" | "clinic_id" => {
                    let clinic_id = Uuid::parse_str(value).map_err(|_| {
                        QueueError::InvalidInput(format!("Invalid clinicId: {}", value))
                    })?;
                    options.clinic_id = Some(clinic_id);
                }
                "status" | "statuses" => {
                    for raw in value.split(',').filter(|s| !s.trim().is_empty()) {
                        match raw.parse::<QueueStatus>() {
                            Ok(status) if !options.statuses.contains(&status) => {
                                options.statuses.push(status)
                            }
                            Ok(_) => {}
                            Err(_) => warn!("Ignoring unknown queue status filter '{}'", raw),
                        }
                    }
                }
                "includeCount" | "include_count" => {
                    options.include_count = value.eq_ignore_ascii_case("true") || value == "1";
                }
                _ => {}
            }
        }

        Ok(options)
    }

    pub fn matches(&self, queue: &Queue) -> bool {
        self.clinic_id.map_or(true, |id| queue.clinic_id == id)
            && (self.statuses.is_empty() || self.statuses.contains(&queue.status))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuePage {
    pub items: Vec<Queue>,
    pub page: u32,
    pub size: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_count: Option<usize>,
}

// ==============================================================================
// EVENTS & SNAPSHOTS
// ==============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueueChange {
    QueueOpened { queue: Queue },
    QueueUpdated { queue: Queue },
    TicketAdmitted { ticket: QueueTicket },
    TicketUpdated { ticket: QueueTicket },
}

impl QueueChange {
    /// `updated_at` of the entity the change carries.
    pub fn version(&self) -> DateTime<Utc> {
        match self {
            QueueChange::QueueOpened { queue } | QueueChange::QueueUpdated { queue } => {
                queue.updated_at
            }
            QueueChange::TicketAdmitted { ticket } | QueueChange::TicketUpdated { ticket } => {
                ticket.updated_at
            }
        }
    }
}

/// A committed queue or ticket mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueEvent {
    pub sequence: u64,
    pub clinic_id: Uuid,
    pub queue_id: Uuid,
    pub committed_at: DateTime<Utc>,
    pub change: QueueChange,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueSnapshot {
    pub queue: Queue,
    /// Ordered by ticket number.
    pub tickets: Vec<QueueTicket>,
}

impl QueueSnapshot {
    /// Folds a live event into the snapshot. Returns false when the event is
    /// for another queue or is not newer than what the snapshot holds.
    pub fn apply(&mut self, event: &QueueEvent) -> bool {
        if event.queue_id != self.queue.id {
            return false;
        }

        match &event.change {
            QueueChange::QueueOpened { queue } | QueueChange::QueueUpdated { queue } => {
                if queue.updated_at > self.queue.updated_at {
                    self.queue = queue.clone();
                    true
                } else {
                    false
                }
            }
            QueueChange::TicketAdmitted { ticket } | QueueChange::TicketUpdated { ticket } => {
                match self.tickets.iter_mut().find(|t| t.id == ticket.id) {
                    Some(existing) if ticket.updated_at <= existing.updated_at => false,
                    Some(existing) => {
                        *existing = ticket.clone();
                        true
                    }
                    None => {
                        self.tickets.push(ticket.clone());
                        self.tickets.sort_by_key(|t| t.ticket_number);
                        true
                    }
                }
            }
        }
    }

    pub fn ticket(&self, ticket_id: Uuid) -> Option<&QueueTicket> {
        self.tickets.iter().find(|t| t.id == ticket_id)
    }
}
