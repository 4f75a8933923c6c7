use axum::{
    middleware,
    routing::get,
    Router,
};

use shared_utils::extractor::auth_middleware;

use crate::handlers::{self, ScheduleState};

pub fn schedule_routes(state: ScheduleState) -> Router {
    Router::new()
        .route(
            "/doctors/{doctor_id}/schedules",
            get(handlers::list_doctor_schedules).post(handlers::create_schedule),
        )
        .route("/doctors/{doctor_id}/slots", get(handlers::get_available_slots))
        .route(
            "/schedules/{schedule_id}",
            get(handlers::get_schedule)
                .put(handlers::update_schedule)
                .delete(handlers::delete_schedule),
        )
        .layer(middleware::from_fn_with_state(state.config.clone(), auth_middleware))
        .with_state(state)
}
