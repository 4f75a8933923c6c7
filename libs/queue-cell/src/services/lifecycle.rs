use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use appointment_cell::AppointmentStore;
use shared_database::directory::ClinicDirectory;
use shared_utils::time::now_micros;
use shared_utils::KeyedLocks;

use crate::error::QueueError;
use crate::models::{
    validate_priority, AdmitTicketRequest, CloseResolution, ListQueuesOptions, Queue, QueueChange,
    QueuePage, QueueSnapshot, QueueStatus, QueueTicket, TicketStatus, UpdateQueueRequest,
    UpdateTicketRequest, PRIORITY_NORMAL,
};
use crate::services::fanout::RealtimeHub;
use crate::services::guard::{check_and_apply, check_version};
use crate::services::store::{QueueStore, TicketStore};

/// The ticket to call next: highest priority first, then lowest number.
/// Nothing is eligible while the queue is not ACTIVE or a ticket is already
/// called.
pub fn select_next_ticket(status: QueueStatus, tickets: &[QueueTicket]) -> Option<&QueueTicket> {
    if status != QueueStatus::Active || tickets.iter().any(|t| t.status == TicketStatus::Called) {
        return None;
    }

    tickets
        .iter()
        .filter(|t| t.status == TicketStatus::Waiting)
        .min_by_key(|t| (-t.priority, t.ticket_number))
}

/// Fields a single ticket write may touch.
#[derive(Debug, Clone, Copy)]
struct TicketChange {
    priority: Option<i16>,
    status: Option<TicketStatus>,
}

impl TicketChange {
    fn status(next: TicketStatus) -> Self {
        Self {
            priority: None,
            status: Some(next),
        }
    }
}

pub struct QueueLifecycle {
    queues: Arc<dyn QueueStore>,
    tickets: Arc<dyn TicketStore>,
    appointments: Arc<dyn AppointmentStore>,
    clinics: Arc<dyn ClinicDirectory>,
    hub: Arc<RealtimeHub>,
    queue_locks: KeyedLocks<Uuid>,
    clinic_locks: KeyedLocks<Uuid>,
}

impl QueueLifecycle {
    pub fn new(
        queues: Arc<dyn QueueStore>,
        tickets: Arc<dyn TicketStore>,
        appointments: Arc<dyn AppointmentStore>,
        clinics: Arc<dyn ClinicDirectory>,
        hub: Arc<RealtimeHub>,
    ) -> Self {
        Self {
            queues,
            tickets,
            appointments,
            clinics,
            hub,
            queue_locks: KeyedLocks::new(),
            clinic_locks: KeyedLocks::new(),
        }
    }

    pub fn hub(&self) -> &Arc<RealtimeHub> {
        &self.hub
    }

    // ==========================================================================
    // QUEUES
    // ==========================================================================

    #[instrument(skip(self))]
    pub async fn open(&self, clinic_id: Uuid) -> Result<Queue, QueueError> {
        let _guard = self.clinic_locks.lock(&clinic_id).await;

        let clinic = self
            .clinics
            .get_clinic(clinic_id)
            .await
            .map_err(|e| QueueError::Upstream(format!("Clinic lookup failed: {}", e)))?;
        if clinic.is_none() {
            return Err(QueueError::NotFound(format!("Clinic {}", clinic_id)));
        }

        if let Some(existing) = self.queues.find_open_for_clinic(clinic_id).await? {
            return Err(QueueError::Conflict(format!(
                "Clinic {} already has an open queue {}",
                clinic_id, existing.id
            )));
        }

        let now = now_micros();
        let queue = self
            .queues
            .insert(Queue {
                id: Uuid::new_v4(),
                clinic_id,
                status: QueueStatus::Active,
                created_at: now,
                updated_at: now,
            })
            .await?;

        info!("Opened queue {} for clinic {}", queue.id, clinic_id);
        self.hub.publish(
            queue.clinic_id,
            queue.id,
            QueueChange::QueueOpened { queue: queue.clone() },
        );
        Ok(queue)
    }

    pub async fn get_queue(&self, queue_id: Uuid) -> Result<Queue, QueueError> {
        self.queues
            .get(queue_id)
            .await?
            .ok_or(QueueError::QueueNotFound(queue_id))
    }

    pub async fn list_queues(&self, options: &ListQueuesOptions) -> Result<QueuePage, QueueError> {
        self.queues.list(options).await
    }

    pub async fn pause(
        &self,
        queue_id: Uuid,
        expected_updated_at: Option<DateTime<Utc>>,
    ) -> Result<Queue, QueueError> {
        self.transition_queue(queue_id, QueueStatus::Paused, expected_updated_at)
            .await
    }

    pub async fn resume(
        &self,
        queue_id: Uuid,
        expected_updated_at: Option<DateTime<Utc>>,
    ) -> Result<Queue, QueueError> {
        self.transition_queue(queue_id, QueueStatus::Active, expected_updated_at)
            .await
    }

    async fn transition_queue(
        &self,
        queue_id: Uuid,
        next: QueueStatus,
        expected_updated_at: Option<DateTime<Utc>>,
    ) -> Result<Queue, QueueError> {
        let _guard = self.queue_locks.lock(&queue_id).await;
        let queue = self.get_queue(queue_id).await?;

        let updated = check_and_apply(&queue, expected_updated_at, now_micros(), |q| {
            if !q.status.can_transition_to(next) {
                return Err(QueueError::invalid_transition(q.status, next));
            }
            q.status = next;
            Ok(())
        })?;

        self.store_queue(updated, queue.updated_at).await
    }

    /// Closes the queue. Waiting and called tickets must be settled by
    /// `resolution`; the whole operation holds the queue lock so no admit can
    /// slip in between resolving and closing.
    #[instrument(skip(self))]
    pub async fn close(
        &self,
        queue_id: Uuid,
        expected_updated_at: Option<DateTime<Utc>>,
        resolution: Option<CloseResolution>,
    ) -> Result<Queue, QueueError> {
        let _guard = self.queue_locks.lock(&queue_id).await;
        let queue = self.get_queue(queue_id).await?;

        let closed = check_and_apply(&queue, expected_updated_at, now_micros(), |q| {
            if !q.status.can_transition_to(QueueStatus::Closed) {
                return Err(QueueError::invalid_transition(q.status, QueueStatus::Closed));
            }
            q.status = QueueStatus::Closed;
            Ok(())
        })?;

        let unresolved: Vec<QueueTicket> = self
            .tickets
            .list_for_queue(queue_id)
            .await?
            .into_iter()
            .filter(|t| !t.status.is_terminal())
            .collect();

        if !unresolved.is_empty() {
            let resolution = resolution.ok_or_else(|| {
                QueueError::Conflict(format!(
                    "Queue {} still has {} unresolved tickets; choose a resolution",
                    queue_id,
                    unresolved.len()
                ))
            })?;
            let target = resolution.target_status();

            for ticket in unresolved {
                let now = now_micros();
                let resolved = check_and_apply(&ticket, None, now, |t| {
                    if !t.status.can_resolve_to(target) {
                        return Err(QueueError::invalid_transition(t.status, target));
                    }
                    t.mark(target, now);
                    Ok(())
                })?;
                let resolved = self.tickets.update(resolved, ticket.updated_at).await?;
                self.hub.publish(
                    queue.clinic_id,
                    queue.id,
                    QueueChange::TicketUpdated { ticket: resolved },
                );
            }
        }

        let closed = self.store_queue(closed, queue.updated_at).await?;
        info!("Closed queue {} for clinic {}", closed.id, closed.clinic_id);
        Ok(closed)
    }

    /// `PUT /queues/{id}` entry point.
    pub async fn update_queue(
        &self,
        queue_id: Uuid,
        request: UpdateQueueRequest,
    ) -> Result<Queue, QueueError> {
        let status = request.status.ok_or_else(|| {
            QueueError::InvalidInput("No fields provided for update".to_string())
        })?;

        match status {
            QueueStatus::Paused => self.pause(queue_id, request.expected_updated_at).await,
            QueueStatus::Active => self.resume(queue_id, request.expected_updated_at).await,
            QueueStatus::Closed => {
                self.close(queue_id, request.expected_updated_at, request.resolve_remaining)
                    .await
            }
        }
    }

    async fn store_queue(
        &self,
        queue: Queue,
        previous_updated_at: DateTime<Utc>,
    ) -> Result<Queue, QueueError> {
        let stored = self.queues.update(queue, previous_updated_at).await?;
        debug!("Queue {} is now {}", stored.id, stored.status);
        self.hub.publish(
            stored.clinic_id,
            stored.id,
            QueueChange::QueueUpdated { queue: stored.clone() },
        );
        Ok(stored)
    }

    // ==========================================================================
    // TICKETS
    // ==========================================================================

    #[instrument(skip(self, request), fields(queue_id = %request.queue_id))]
    pub async fn admit(&self, request: AdmitTicketRequest) -> Result<QueueTicket, QueueError> {
        let priority = validate_priority(request.priority.unwrap_or(PRIORITY_NORMAL))?;
        if let Some(number) = request.ticket_number {
            if number <= 0 {
                return Err(QueueError::InvalidInput(format!(
                    "Ticket number must be positive, got {}",
                    number
                )));
            }
        }

        let _guard = self.queue_locks.lock(&request.queue_id).await;
        let queue = self.get_queue(request.queue_id).await?;
        if queue.status == QueueStatus::Closed {
            return Err(QueueError::QueueClosed(queue.id));
        }

        // An appointment-linked ticket inherits the booking's patient
        let mut patient_id = request.patient_id;
        if let Some(appointment_id) = request.appointment_id {
            let appointment = self
                .appointments
                .get(appointment_id)
                .await?
                .ok_or_else(|| QueueError::NotFound(format!("Appointment {}", appointment_id)))?;
            patient_id = patient_id.or(appointment.patient_id);
        }

        let existing = self.tickets.list_for_queue(queue.id).await?;
        let ticket_number = match request.ticket_number {
            Some(number) if existing.iter().any(|t| t.ticket_number == number) => {
                return Err(QueueError::Conflict(format!(
                    "Ticket number {} is already used in queue {}",
                    number, queue.id
                )));
            }
            Some(number) => number,
            None => existing.iter().map(|t| t.ticket_number).max().unwrap_or(0) + 1,
        };

        let now = now_micros();
        let ticket = self
            .tickets
            .insert(QueueTicket {
                id: Uuid::new_v4(),
                queue_id: queue.id,
                appointment_id: request.appointment_id,
                patient_id,
                ticket_number,
                priority,
                status: TicketStatus::Waiting,
                called_at: None,
                completed_at: None,
                no_show_at: None,
                created_at: now,
                updated_at: now,
            })
            .await?;

        debug!("Admitted ticket #{} into queue {}", ticket.ticket_number, queue.id);
        self.hub.publish(
            queue.clinic_id,
            queue.id,
            QueueChange::TicketAdmitted { ticket: ticket.clone() },
        );
        Ok(ticket)
    }

    pub async fn get_ticket(&self, ticket_id: Uuid) -> Result<QueueTicket, QueueError> {
        self.tickets
            .get(ticket_id)
            .await?
            .ok_or(QueueError::TicketNotFound(ticket_id))
    }

    pub async fn list_tickets(&self, queue_id: Uuid) -> Result<Vec<QueueTicket>, QueueError> {
        self.get_queue(queue_id).await?;
        self.tickets.list_for_queue(queue_id).await
    }

    /// Queue plus its tickets, read under the queue lock so it reflects a
    /// single point in the event stream.
    pub async fn snapshot(&self, queue_id: Uuid) -> Result<QueueSnapshot, QueueError> {
        let _guard = self.queue_locks.lock(&queue_id).await;
        let queue = self.get_queue(queue_id).await?;
        let tickets = self.tickets.list_for_queue(queue_id).await?;
        Ok(QueueSnapshot { queue, tickets })
    }

    pub async fn select_next(&self, queue_id: Uuid) -> Result<Option<QueueTicket>, QueueError> {
        let queue = self.get_queue(queue_id).await?;
        let tickets = self.tickets.list_for_queue(queue_id).await?;
        Ok(select_next_ticket(queue.status, &tickets).cloned())
    }

    pub async fn call(
        &self,
        ticket_id: Uuid,
        expected_updated_at: Option<DateTime<Utc>>,
    ) -> Result<QueueTicket, QueueError> {
        self.mutate_ticket(ticket_id, TicketChange::status(TicketStatus::Called), expected_updated_at)
            .await
    }

    /// Selects and calls the next ticket as one step.
    #[instrument(skip(self))]
    pub async fn call_next(&self, queue_id: Uuid) -> Result<Option<QueueTicket>, QueueError> {
        let _guard = self.queue_locks.lock(&queue_id).await;
        let queue = self.get_queue(queue_id).await?;
        if queue.status == QueueStatus::Closed {
            return Err(QueueError::QueueClosed(queue.id));
        }

        let tickets = self.tickets.list_for_queue(queue_id).await?;
        let Some(next) = select_next_ticket(queue.status, &tickets).cloned() else {
            return Ok(None);
        };

        let called = self
            .apply_change(&queue, next, TicketChange::status(TicketStatus::Called), None)
            .await?;
        Ok(Some(called))
    }

    pub async fn complete(
        &self,
        ticket_id: Uuid,
        expected_updated_at: Option<DateTime<Utc>>,
    ) -> Result<QueueTicket, QueueError> {
        self.mutate_ticket(
            ticket_id,
            TicketChange::status(TicketStatus::Completed),
            expected_updated_at,
        )
        .await
    }

    pub async fn mark_no_show(
        &self,
        ticket_id: Uuid,
        expected_updated_at: Option<DateTime<Utc>>,
    ) -> Result<QueueTicket, QueueError> {
        self.mutate_ticket(
            ticket_id,
            TicketChange::status(TicketStatus::NoShow),
            expected_updated_at,
        )
        .await
    }

    pub async fn set_priority(
        &self,
        ticket_id: Uuid,
        priority: i16,
        expected_updated_at: Option<DateTime<Utc>>,
    ) -> Result<QueueTicket, QueueError> {
        let change = TicketChange {
            priority: Some(validate_priority(priority)?),
            status: None,
        };
        self.mutate_ticket(ticket_id, change, expected_updated_at).await
    }

    /// `PUT /queue-tickets/{id}` entry point. Priority and status are
    /// validated together and committed as one write, or not at all.
    pub async fn update_ticket(
        &self,
        ticket_id: Uuid,
        request: UpdateTicketRequest,
    ) -> Result<QueueTicket, QueueError> {
        if request.status.is_none() && request.priority.is_none() {
            return Err(QueueError::InvalidInput("No fields provided for update".to_string()));
        }

        let change = TicketChange {
            priority: request.priority.map(validate_priority).transpose()?,
            status: request.status,
        };
        self.mutate_ticket(ticket_id, change, request.expected_updated_at)
            .await
    }

    async fn mutate_ticket(
        &self,
        ticket_id: Uuid,
        change: TicketChange,
        expected_updated_at: Option<DateTime<Utc>>,
    ) -> Result<QueueTicket, QueueError> {
        let queue_id = self.get_ticket(ticket_id).await?.queue_id;
        let _guard = self.queue_locks.lock(&queue_id).await;

        // Re-read once the lock is held
        let ticket = self.get_ticket(ticket_id).await?;
        let queue = self.get_queue(ticket.queue_id).await?;
        self.apply_change(&queue, ticket, change, expected_updated_at)
            .await
    }

    async fn ensure_callable(&self, queue: &Queue, ticket: &QueueTicket) -> Result<(), QueueError> {
        if queue.status != QueueStatus::Active {
            return Err(QueueError::Conflict(format!(
                "Queue {} is {}, tickets cannot be called",
                queue.id, queue.status
            )));
        }

        let tickets = self.tickets.list_for_queue(queue.id).await?;
        if let Some(in_flight) = tickets
            .iter()
            .find(|t| t.status == TicketStatus::Called && t.id != ticket.id)
        {
            return Err(QueueError::Conflict(format!(
                "Ticket #{} is already called",
                in_flight.ticket_number
            )));
        }
        Ok(())
    }

    /// Caller holds the queue lock. The ticket's own state is checked before
    /// anything about the queue, so a settled ticket always reports
    /// `InvalidTransition`.
    async fn apply_change(
        &self,
        queue: &Queue,
        ticket: QueueTicket,
        change: TicketChange,
        expected_updated_at: Option<DateTime<Utc>>,
    ) -> Result<QueueTicket, QueueError> {
        check_version(&ticket, expected_updated_at)?;

        if let Some(next) = change.status {
            if !ticket.status.can_transition_to(next) {
                return Err(QueueError::invalid_transition(ticket.status, next));
            }
        }
        if change.priority.is_some() && ticket.status != TicketStatus::Waiting {
            return Err(QueueError::Conflict(format!(
                "Priority can only change while waiting; ticket is {}",
                ticket.status
            )));
        }
        if queue.status == QueueStatus::Closed {
            return Err(QueueError::QueueClosed(queue.id));
        }
        if change.status == Some(TicketStatus::Called) {
            self.ensure_callable(queue, &ticket).await?;
        }

        let now = now_micros();
        let updated = check_and_apply(&ticket, None, now, |t| {
            if let Some(priority) = change.priority {
                t.priority = priority;
            }
            if let Some(next) = change.status {
                t.mark(next, now);
            }
            Ok(())
        })?;

        self.store_ticket(queue, updated, ticket.updated_at).await
    }

    async fn store_ticket(
        &self,
        queue: &Queue,
        ticket: QueueTicket,
        previous_updated_at: DateTime<Utc>,
    ) -> Result<QueueTicket, QueueError> {
        let stored = self.tickets.update(ticket, previous_updated_at).await?;
        debug!(
            "Ticket #{} in queue {} is now {}",
            stored.ticket_number, queue.id, stored.status
        );
        self.hub.publish(
            queue.clinic_id,
            queue.id,
            QueueChange::TicketUpdated { ticket: stored.clone() },
        );
        Ok(stored)
    }
}
