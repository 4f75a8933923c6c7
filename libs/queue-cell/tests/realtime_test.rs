mod common;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use assert_matches::assert_matches;
use async_trait::async_trait;
use tokio::time::timeout;
use uuid::Uuid;

use queue_cell::models::{
    AdmitTicketRequest, QueueChange, QueueSnapshot, TicketStatus, PRIORITY_NORMAL,
};
use queue_cell::services::{
    QueueLifecycle, QueueViewer, RealtimeHub, Scope, Subscription, View, ViewProjector,
    ViewerError, ViewerSource, ViewerUpdate,
};
use shared_database::directory::PatientDirectory;
use queue_cell::QueueError;
use shared_utils::RetryPolicy;

use common::harness;

fn fast_retry(attempts: u32) -> RetryPolicy {
    RetryPolicy::new(Duration::from_millis(1), Duration::from_millis(5), attempts)
}

#[tokio::test]
async fn queue_subscribers_see_commits_in_order() {
    let h = harness().await;
    let queue = h.open_queue().await;
    let mut subscription = h.hub.subscribe(Scope::Queue(queue.id));

    let ticket = h.admit(queue.id, 1, PRIORITY_NORMAL).await;
    h.lifecycle.call(ticket.id, None).await.unwrap();
    h.lifecycle.complete(ticket.id, None).await.unwrap();

    let mut sequences = Vec::new();
    let mut statuses = Vec::new();
    for _ in 0..3 {
        let event = subscription.next().await.unwrap();
        sequences.push(event.sequence);
        match &event.change {
            QueueChange::TicketAdmitted { ticket } | QueueChange::TicketUpdated { ticket } => {
                statuses.push(ticket.status)
            }
            other => panic!("unexpected change {:?}", other),
        }
    }

    assert!(sequences.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(
        statuses,
        vec![TicketStatus::Waiting, TicketStatus::Called, TicketStatus::Completed]
    );
}

#[tokio::test]
async fn clinic_subscribers_see_queue_openings() {
    let h = harness().await;
    let mut subscription = h.hub.subscribe(Scope::Clinic(h.clinic_id));

    let queue = h.open_queue().await;
    h.lifecycle.pause(queue.id, None).await.unwrap();

    let opened = subscription.next().await.unwrap();
    assert_matches!(&opened.change, QueueChange::QueueOpened { queue: q } if q.id == queue.id);
    let paused = subscription.next().await.unwrap();
    assert_matches!(&paused.change, QueueChange::QueueUpdated { .. });
    assert_eq!(paused.clinic_id, h.clinic_id);
}

#[tokio::test]
async fn viewer_tracks_live_changes() {
    let h = harness().await;
    let queue = h.open_queue().await;
    let early = h.admit(queue.id, 1, PRIORITY_NORMAL).await;

    let source: Arc<dyn ViewerSource> = h.lifecycle.clone();
    let mut viewer = QueueViewer::connect(source, queue.id, fast_retry(3)).await.unwrap();
    assert_eq!(viewer.snapshot().tickets.len(), 1);

    let late = h.admit(queue.id, 2, PRIORITY_NORMAL).await;
    h.lifecycle.call(early.id, None).await.unwrap();

    assert_matches!(viewer.next_update().await.unwrap(), ViewerUpdate::Event(_));
    assert_matches!(viewer.next_update().await.unwrap(), ViewerUpdate::Event(_));

    let snapshot = viewer.snapshot();
    assert_eq!(snapshot.tickets.len(), 2);
    assert_eq!(snapshot.ticket(early.id).unwrap().status, TicketStatus::Called);
    assert_eq!(snapshot.ticket(late.id).unwrap().status, TicketStatus::Waiting);
    assert_eq!(viewer.reconnects(), 0);
}

/// Hands out subscriptions on a throwaway hub so a test can cut the stream,
/// and fails a configurable number of connection attempts.
struct FlakySource {
    lifecycle: Arc<QueueLifecycle>,
    stream: Mutex<Option<Arc<RealtimeHub>>>,
    failures_left: AtomicU32,
    connects: AtomicU32,
}

impl FlakySource {
    fn new(lifecycle: Arc<QueueLifecycle>) -> Self {
        Self {
            lifecycle,
            stream: Mutex::new(None),
            failures_left: AtomicU32::new(0),
            connects: AtomicU32::new(0),
        }
    }

    fn cut_stream(&self) {
        self.stream.lock().unwrap().take();
    }
}

#[async_trait]
impl ViewerSource for FlakySource {
    async fn connect(&self, queue_id: Uuid) -> Result<(Subscription, QueueSnapshot), QueueError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(QueueError::Upstream("relay unavailable".to_string()));
        }

        let hub = Arc::new(RealtimeHub::new(8));
        let subscription = hub.subscribe(Scope::Queue(queue_id));
        *self.stream.lock().unwrap() = Some(hub);
        let snapshot = self.lifecycle.snapshot(queue_id).await?;
        Ok((subscription, snapshot))
    }
}

#[tokio::test]
async fn viewer_resyncs_after_losing_the_stream() {
    let h = harness().await;
    let queue = h.open_queue().await;
    let source = Arc::new(FlakySource::new(h.lifecycle.clone()));

    let mut viewer = QueueViewer::connect(source.clone(), queue.id, fast_retry(5))
        .await
        .unwrap();
    assert!(viewer.snapshot().tickets.is_empty());

    // Admitted while the viewer is not listening on the live hub
    let missed = h.admit(queue.id, 1, PRIORITY_NORMAL).await;
    source.failures_left.store(2, Ordering::SeqCst);
    source.cut_stream();

    let update = timeout(Duration::from_secs(2), viewer.next_update())
        .await
        .unwrap()
        .unwrap();
    assert_matches!(update, ViewerUpdate::Resynced);
    assert_eq!(viewer.reconnects(), 1);
    assert!(viewer.snapshot().ticket(missed.id).is_some());
    assert_eq!(source.connects.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn viewer_gives_up_after_bounded_retries() {
    let h = harness().await;
    let queue = h.open_queue().await;
    let source = Arc::new(FlakySource::new(h.lifecycle.clone()));
    source.failures_left.store(u32::MAX, Ordering::SeqCst);

    let result = QueueViewer::connect(source.clone(), queue.id, fast_retry(2)).await;

    assert_matches!(
        result,
        Err(ViewerError::RetriesExhausted { attempts: 3, queue_id }) if queue_id == queue.id
    );
    assert_eq!(source.connects.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn publishing_does_not_wait_for_slow_subscribers() {
    let h = common::harness_with_capacity(2).await;
    let queue = h.open_queue().await;
    let mut slow = h.hub.subscribe(Scope::Queue(queue.id));

    let mutations = async {
        for number in 1..=10 {
            h.admit(queue.id, number, PRIORITY_NORMAL).await;
        }
    };
    timeout(Duration::from_secs(2), mutations).await.unwrap();

    assert_matches!(
        slow.next().await,
        Err(queue_cell::services::SubscriptionError::Lagged(_))
    );
    assert_eq!(h.lifecycle.list_tickets(queue.id).await.unwrap().len(), 10);
}

#[tokio::test]
async fn staff_view_names_the_patient_behind_an_appointment() {
    let h = harness().await;
    let queue = h.open_queue().await;
    let appointment = h.book_appointment().await;
    let patient_id = appointment.patient_id.unwrap();
    h.patients.insert(patient_id, "Tan Ah Kow").await;

    let ticket = h
        .lifecycle
        .admit(AdmitTicketRequest {
            appointment_id: Some(appointment.id),
            ..AdmitTicketRequest::walk_in(queue.id)
        })
        .await
        .unwrap();

    let patients: Arc<dyn PatientDirectory> = h.patients.clone();
    let mut staff = ViewProjector::new(View::Staff, patients.clone());
    let frame = staff.ticket(&ticket).await;
    assert_eq!(frame["patientId"], patient_id.to_string());
    assert_eq!(frame["patientDisplayName"], "Tan Ah Kow");

    let mut display = ViewProjector::new(View::Display, patients);
    assert!(display.ticket(&ticket).await.get("patientDisplayName").is_none());
}
