mod common;

use std::collections::HashSet;
use std::time::Duration;

use assert_matches::assert_matches;
use tokio::time::timeout;
use uuid::Uuid;

use queue_cell::models::{
    AdmitTicketRequest, CloseResolution, ListQueuesOptions, QueueChange, QueueStatus, TicketStatus,
    UpdateQueueRequest, UpdateTicketRequest, PRIORITY_FAST_TRACK, PRIORITY_NORMAL,
};
use queue_cell::services::Scope;
use queue_cell::QueueError;

use common::harness;

#[tokio::test]
async fn fast_track_tickets_are_called_first() {
    let h = harness().await;
    let queue = h.open_queue().await;
    for (number, priority) in [(5, PRIORITY_NORMAL), (6, PRIORITY_FAST_TRACK), (7, PRIORITY_NORMAL), (8, PRIORITY_FAST_TRACK)] {
        h.admit(queue.id, number, priority).await;
    }

    let mut order = Vec::new();
    while let Some(called) = h.lifecycle.call_next(queue.id).await.unwrap() {
        assert_eq!(called.status, TicketStatus::Called);
        assert!(called.called_at.is_some());
        order.push(called.ticket_number);
        h.lifecycle.complete(called.id, None).await.unwrap();
    }

    assert_eq!(order, vec![6, 8, 5, 7]);
}

#[tokio::test]
async fn only_one_ticket_can_be_called_at_a_time() {
    let h = harness().await;
    let queue = h.open_queue().await;
    let first = h.admit(queue.id, 1, PRIORITY_NORMAL).await;
    let second = h.admit(queue.id, 2, PRIORITY_NORMAL).await;

    h.lifecycle.call(first.id, None).await.unwrap();

    assert_matches!(h.lifecycle.call(second.id, None).await, Err(QueueError::Conflict(_)));
    assert!(h.lifecycle.select_next(queue.id).await.unwrap().is_none());
    assert!(h.lifecycle.call_next(queue.id).await.unwrap().is_none());

    h.lifecycle.mark_no_show(first.id, None).await.unwrap();
    let next = h.lifecycle.select_next(queue.id).await.unwrap().unwrap();
    assert_eq!(next.id, second.id);
}

#[tokio::test]
async fn concurrent_call_next_calls_exactly_one_ticket() {
    let h = harness().await;
    let queue = h.open_queue().await;
    for number in 1..=4 {
        h.admit(queue.id, number, PRIORITY_NORMAL).await;
    }

    let mut tasks = Vec::new();
    for _ in 0..6 {
        let lifecycle = h.lifecycle.clone();
        tasks.push(tokio::spawn(async move { lifecycle.call_next(queue.id).await }));
    }

    let mut called = Vec::new();
    for task in tasks {
        if let Some(ticket) = task.await.unwrap().unwrap() {
            called.push(ticket.ticket_number);
        }
    }
    assert_eq!(called, vec![1]);
}

#[tokio::test]
async fn stale_expected_version_is_rejected() {
    let h = harness().await;
    let queue = h.open_queue().await;

    let paused = h.lifecycle.pause(queue.id, Some(queue.updated_at)).await.unwrap();
    assert_eq!(paused.status, QueueStatus::Paused);
    assert!(paused.updated_at > queue.updated_at);

    let stale = h.lifecycle.resume(queue.id, Some(queue.updated_at)).await;
    assert_matches!(stale, Err(QueueError::OptimisticLockConflict { .. }));
    assert_eq!(h.lifecycle.get_queue(queue.id).await.unwrap().status, QueueStatus::Paused);

    let resumed = h.lifecycle.resume(queue.id, Some(paused.updated_at)).await.unwrap();
    assert_eq!(resumed.status, QueueStatus::Active);
}

#[tokio::test]
async fn ticket_versions_are_checked_too() {
    let h = harness().await;
    let queue = h.open_queue().await;
    let ticket = h.admit(queue.id, 1, PRIORITY_NORMAL).await;

    let bumped = h
        .lifecycle
        .set_priority(ticket.id, PRIORITY_FAST_TRACK, Some(ticket.updated_at))
        .await
        .unwrap();

    assert_matches!(
        h.lifecycle.call(ticket.id, Some(ticket.updated_at)).await,
        Err(QueueError::OptimisticLockConflict { .. })
    );
    let called = h.lifecycle.call(ticket.id, Some(bumped.updated_at)).await.unwrap();
    assert_eq!(called.priority, PRIORITY_FAST_TRACK);
}

#[tokio::test]
async fn terminal_tickets_do_not_move() {
    let h = harness().await;
    let queue = h.open_queue().await;
    let done = h.admit(queue.id, 1, PRIORITY_NORMAL).await;
    h.lifecycle.call(done.id, None).await.unwrap();
    h.lifecycle.complete(done.id, None).await.unwrap();

    assert_matches!(h.lifecycle.call(done.id, None).await, Err(QueueError::InvalidTransition { .. }));
    assert_matches!(h.lifecycle.complete(done.id, None).await, Err(QueueError::InvalidTransition { .. }));
    assert_matches!(h.lifecycle.mark_no_show(done.id, None).await, Err(QueueError::InvalidTransition { .. }));
    assert_matches!(
        h.lifecycle.set_priority(done.id, PRIORITY_FAST_TRACK, None).await,
        Err(QueueError::Conflict(_))
    );

    // Another ticket in flight must not hide the settled state
    let in_flight = h.admit(queue.id, 2, PRIORITY_NORMAL).await;
    h.lifecycle.call(in_flight.id, None).await.unwrap();
    assert_matches!(
        h.lifecycle.call(done.id, None).await,
        Err(QueueError::InvalidTransition { from, to }) if from == "completed" && to == "called"
    );
    h.lifecycle.complete(in_flight.id, None).await.unwrap();

    let waiting = h.admit(queue.id, 3, PRIORITY_NORMAL).await;
    assert_matches!(
        h.lifecycle.complete(waiting.id, None).await,
        Err(QueueError::InvalidTransition { from, to }) if from == "waiting" && to == "completed"
    );

    h.lifecycle.pause(queue.id, None).await.unwrap();
    assert_matches!(
        h.lifecycle.call(done.id, None).await,
        Err(QueueError::InvalidTransition { from, to }) if from == "completed" && to == "called"
    );
    assert_matches!(h.lifecycle.call(waiting.id, None).await, Err(QueueError::Conflict(_)));

    let stored = h.lifecycle.get_ticket(done.id).await.unwrap();
    assert_eq!(stored.status, TicketStatus::Completed);
    assert!(stored.completed_at.is_some());
}

#[tokio::test]
async fn queue_state_machine() {
    let h = harness().await;
    let queue = h.open_queue().await;

    assert_matches!(h.lifecycle.resume(queue.id, None).await, Err(QueueError::InvalidTransition { .. }));
    h.lifecycle.pause(queue.id, None).await.unwrap();
    assert_matches!(h.lifecycle.pause(queue.id, None).await, Err(QueueError::InvalidTransition { .. }));

    let closed = h.lifecycle.close(queue.id, None, None).await.unwrap();
    assert_eq!(closed.status, QueueStatus::Closed);

    assert_matches!(h.lifecycle.resume(queue.id, None).await, Err(QueueError::InvalidTransition { .. }));
    assert_matches!(h.lifecycle.close(queue.id, None, None).await, Err(QueueError::InvalidTransition { .. }));
}

#[tokio::test]
async fn paused_queue_admits_but_does_not_call() {
    let h = harness().await;
    let queue = h.open_queue().await;
    h.lifecycle.pause(queue.id, None).await.unwrap();

    let ticket = h.admit(queue.id, 1, PRIORITY_NORMAL).await;
    assert!(h.lifecycle.select_next(queue.id).await.unwrap().is_none());
    assert_matches!(h.lifecycle.call(ticket.id, None).await, Err(QueueError::Conflict(_)));

    h.lifecycle.resume(queue.id, None).await.unwrap();
    assert_eq!(h.lifecycle.call_next(queue.id).await.unwrap().unwrap().id, ticket.id);
}

#[tokio::test]
async fn closing_needs_a_resolution_for_open_tickets() {
    let h = harness().await;
    let queue = h.open_queue().await;
    let called = h.admit(queue.id, 1, PRIORITY_NORMAL).await;
    let waiting = h.admit(queue.id, 2, PRIORITY_NORMAL).await;
    let done = h.admit(queue.id, 3, PRIORITY_FAST_TRACK).await;
    h.lifecycle.call(done.id, None).await.unwrap();
    h.lifecycle.complete(done.id, None).await.unwrap();
    h.lifecycle.call(called.id, None).await.unwrap();

    assert_matches!(h.lifecycle.close(queue.id, None, None).await, Err(QueueError::Conflict(_)));
    assert_eq!(h.lifecycle.get_queue(queue.id).await.unwrap().status, QueueStatus::Active);

    h.lifecycle
        .close(queue.id, None, Some(CloseResolution::NoShow))
        .await
        .unwrap();

    let tickets = h.lifecycle.list_tickets(queue.id).await.unwrap();
    let status_of = |id: Uuid| tickets.iter().find(|t| t.id == id).unwrap().status;
    assert_eq!(status_of(called.id), TicketStatus::NoShow);
    assert_eq!(status_of(waiting.id), TicketStatus::NoShow);
    assert_eq!(status_of(done.id), TicketStatus::Completed);
}

#[tokio::test]
async fn closed_queue_rejects_ticket_changes() {
    let h = harness().await;
    let queue = h.open_queue().await;
    let resolved = h.admit(queue.id, 1, PRIORITY_NORMAL).await;
    let seen = h.admit(queue.id, 2, PRIORITY_NORMAL).await;
    h.lifecycle.call(seen.id, None).await.unwrap();
    h.lifecycle.complete(seen.id, None).await.unwrap();
    h.lifecycle
        .close(queue.id, None, Some(CloseResolution::Complete))
        .await
        .unwrap();

    assert_matches!(
        h.lifecycle.admit(AdmitTicketRequest::walk_in(queue.id)).await,
        Err(QueueError::QueueClosed(id)) if id == queue.id
    );
    assert_matches!(h.lifecycle.call_next(queue.id).await, Err(QueueError::QueueClosed(_)));

    // Settled tickets report their own state, not the queue's
    assert_matches!(
        h.lifecycle.mark_no_show(seen.id, None).await,
        Err(QueueError::InvalidTransition { from, to }) if from == "completed" && to == "no_show"
    );
    assert_matches!(h.lifecycle.call(resolved.id, None).await, Err(QueueError::InvalidTransition { .. }));
    assert_matches!(
        h.lifecycle.set_priority(resolved.id, PRIORITY_FAST_TRACK, None).await,
        Err(QueueError::Conflict(_))
    );
    assert_eq!(
        h.lifecycle.get_ticket(resolved.id).await.unwrap().status,
        TicketStatus::Completed
    );
}

#[tokio::test]
async fn one_open_queue_per_clinic() {
    let h = harness().await;
    let queue = h.open_queue().await;

    assert_matches!(h.lifecycle.open(h.clinic_id).await, Err(QueueError::Conflict(_)));
    assert_matches!(h.lifecycle.open(Uuid::new_v4()).await, Err(QueueError::NotFound(_)));

    let other_clinic = h.add_clinic("Bishan").await;
    h.lifecycle.open(other_clinic).await.unwrap();

    h.lifecycle.close(queue.id, None, None).await.unwrap();
    let reopened = h.open_queue().await;
    assert_ne!(reopened.id, queue.id);
}

#[tokio::test]
async fn admission_rules() {
    let h = harness().await;
    let queue = h.open_queue().await;

    let first = h.lifecycle.admit(AdmitTicketRequest::walk_in(queue.id)).await.unwrap();
    assert_eq!(first.ticket_number, 1);
    assert_eq!(first.status, TicketStatus::Waiting);
    h.admit(queue.id, 10, PRIORITY_NORMAL).await;
    let next = h.lifecycle.admit(AdmitTicketRequest::walk_in(queue.id)).await.unwrap();
    assert_eq!(next.ticket_number, 11);

    let duplicate = AdmitTicketRequest {
        ticket_number: Some(10),
        ..AdmitTicketRequest::walk_in(queue.id)
    };
    assert_matches!(h.lifecycle.admit(duplicate).await, Err(QueueError::Conflict(_)));

    let bad_priority = AdmitTicketRequest {
        priority: Some(3),
        ..AdmitTicketRequest::walk_in(queue.id)
    };
    assert_matches!(h.lifecycle.admit(bad_priority).await, Err(QueueError::InvalidInput(_)));

    let ghost_appointment = AdmitTicketRequest {
        appointment_id: Some(Uuid::new_v4()),
        ..AdmitTicketRequest::walk_in(queue.id)
    };
    assert_matches!(h.lifecycle.admit(ghost_appointment).await, Err(QueueError::NotFound(_)));

    let appointment = h.book_appointment().await;
    let linked = h
        .lifecycle
        .admit(AdmitTicketRequest {
            appointment_id: Some(appointment.id),
            patient_id: appointment.patient_id,
            ..AdmitTicketRequest::walk_in(queue.id)
        })
        .await
        .unwrap();
    assert_eq!(linked.appointment_id, Some(appointment.id));

    let inherited = h
        .lifecycle
        .admit(AdmitTicketRequest {
            appointment_id: Some(appointment.id),
            ..AdmitTicketRequest::walk_in(queue.id)
        })
        .await
        .unwrap();
    assert_eq!(inherited.patient_id, appointment.patient_id);

    assert_matches!(
        h.lifecycle.admit(AdmitTicketRequest::walk_in(Uuid::new_v4())).await,
        Err(QueueError::QueueNotFound(_))
    );
}

#[tokio::test]
async fn concurrent_walk_ins_get_distinct_numbers() {
    let h = harness().await;
    let queue = h.open_queue().await;

    let mut tasks = Vec::new();
    for _ in 0..10 {
        let lifecycle = h.lifecycle.clone();
        tasks.push(tokio::spawn(async move {
            lifecycle.admit(AdmitTicketRequest::walk_in(queue.id)).await
        }));
    }

    let mut numbers = HashSet::new();
    for task in tasks {
        numbers.insert(task.await.unwrap().unwrap().ticket_number);
    }
    assert_eq!(numbers, (1..=10).collect());
}

#[tokio::test]
async fn update_entry_points() {
    let h = harness().await;
    let queue = h.open_queue().await;
    let ticket = h.admit(queue.id, 1, PRIORITY_NORMAL).await;

    assert_matches!(
        h.lifecycle.update_queue(queue.id, UpdateQueueRequest::default()).await,
        Err(QueueError::InvalidInput(_))
    );
    assert_matches!(
        h.lifecycle.update_ticket(ticket.id, UpdateTicketRequest::default()).await,
        Err(QueueError::InvalidInput(_))
    );

    let called = h
        .lifecycle
        .update_ticket(
            ticket.id,
            UpdateTicketRequest {
                status: Some(TicketStatus::Called),
                priority: Some(PRIORITY_FAST_TRACK),
                expected_updated_at: Some(ticket.updated_at),
            },
        )
        .await
        .unwrap();
    assert_eq!(called.status, TicketStatus::Called);
    assert_eq!(called.priority, PRIORITY_FAST_TRACK);

    assert_matches!(
        h.lifecycle
            .update_ticket(
                ticket.id,
                UpdateTicketRequest {
                    status: Some(TicketStatus::Waiting),
                    ..UpdateTicketRequest::default()
                },
            )
            .await,
        Err(QueueError::InvalidTransition { .. })
    );

    let closed = h
        .lifecycle
        .update_queue(
            queue.id,
            UpdateQueueRequest {
                status: Some(QueueStatus::Closed),
                expected_updated_at: Some(queue.updated_at),
                resolve_remaining: Some(CloseResolution::Complete),
            },
        )
        .await
        .unwrap();
    assert_eq!(closed.status, QueueStatus::Closed);
    assert_eq!(
        h.lifecycle.get_ticket(ticket.id).await.unwrap().status,
        TicketStatus::Completed
    );
}

#[tokio::test]
async fn rejected_ticket_update_changes_nothing() {
    let h = harness().await;
    let queue = h.open_queue().await;
    let ticket = h.admit(queue.id, 1, PRIORITY_NORMAL).await;
    let mut events = h.hub.subscribe(Scope::Queue(queue.id));

    let result = h
        .lifecycle
        .update_ticket(
            ticket.id,
            UpdateTicketRequest {
                status: Some(TicketStatus::Completed),
                priority: Some(PRIORITY_FAST_TRACK),
                expected_updated_at: Some(ticket.updated_at),
            },
        )
        .await;
    assert_matches!(result, Err(QueueError::InvalidTransition { .. }));

    let stored = h.lifecycle.get_ticket(ticket.id).await.unwrap();
    assert_eq!(stored.priority, PRIORITY_NORMAL);
    assert_eq!(stored.updated_at, ticket.updated_at);
    assert!(timeout(Duration::from_millis(50), events.next()).await.is_err());

    // Both fields land in one write when the request is valid
    let called = h
        .lifecycle
        .update_ticket(
            ticket.id,
            UpdateTicketRequest {
                status: Some(TicketStatus::Called),
                priority: Some(PRIORITY_FAST_TRACK),
                expected_updated_at: Some(stored.updated_at),
            },
        )
        .await
        .unwrap();
    assert_eq!(called.priority, PRIORITY_FAST_TRACK);
    let event = events.next().await.unwrap();
    assert_matches!(
        &event.change,
        QueueChange::TicketUpdated { ticket } if ticket.status == TicketStatus::Called && ticket.priority == PRIORITY_FAST_TRACK
    );
    assert!(timeout(Duration::from_millis(50), events.next()).await.is_err());
}

#[tokio::test]
async fn listing_filters_and_counts() {
    let h = harness().await;
    let first = h.open_queue().await;
    h.lifecycle.close(first.id, None, None).await.unwrap();
    let second = h.open_queue().await;
    let other_clinic = h.add_clinic("Jurong").await;
    h.lifecycle.open(other_clinic).await.unwrap();

    let page = h
        .lifecycle
        .list_queues(&ListQueuesOptions {
            clinic_id: Some(h.clinic_id),
            include_count: true,
            ..ListQueuesOptions::default()
        })
        .await
        .unwrap();
    assert_eq!(page.total_count, Some(2));
    // Newest first by default
    assert_eq!(page.items[0].id, second.id);

    let open = h
        .lifecycle
        .list_queues(&ListQueuesOptions::open_for_clinic(h.clinic_id))
        .await
        .unwrap();
    assert_eq!(open.items.len(), 1);
    assert_eq!(open.total_count, None);

    let paged = h
        .lifecycle
        .list_queues(&ListQueuesOptions {
            size: 1,
            page: 2,
            include_count: true,
            ..ListQueuesOptions::default()
        })
        .await
        .unwrap();
    assert_eq!(paged.items.len(), 1);
    assert_eq!(paged.total_count, Some(3));
}
