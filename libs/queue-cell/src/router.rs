use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use shared_utils::extractor::auth_middleware;

use crate::handlers::{self, QueueState};

pub fn queue_routes(state: QueueState) -> Router {
    let protected = Router::new()
        .route("/queues", get(handlers::list_queues).post(handlers::open_queue))
        .route(
            "/queues/{queue_id}",
            get(handlers::get_queue).put(handlers::update_queue),
        )
        .route("/queues/{queue_id}/tickets", get(handlers::list_queue_tickets))
        .route("/queues/{queue_id}/next", get(handlers::next_ticket))
        .route("/queues/{queue_id}/call-next", post(handlers::call_next_ticket))
        .route("/queue-tickets", post(handlers::admit_ticket))
        .route(
            "/queue-tickets/{ticket_id}",
            get(handlers::get_ticket).put(handlers::update_ticket),
        )
        .layer(middleware::from_fn_with_state(state.config.clone(), auth_middleware));

    // Display boards connect without a token; the staff view is checked in the handler
    let realtime = Router::new()
        .route("/ws/queues/{queue_id}", get(handlers::queue_socket))
        .route("/ws/clinics/{clinic_id}", get(handlers::clinic_socket));

    protected.merge(realtime).with_state(state)
}
