use axum::{routing::get, Router};

use appointment_cell::router::appointment_routes;
use doctor_cell::router::schedule_routes;
use queue_cell::router::queue_routes;

use crate::wiring::AppServices;

pub fn create_router(services: &AppServices) -> Router {
    Router::new()
        .route("/", get(|| async { "Clinic scheduling API is running!" }))
        .merge(schedule_routes(services.schedules.clone()))
        .merge(appointment_routes(services.appointments.clone()))
        .merge(queue_routes(services.queues.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use shared_utils::test_utils::TestConfig;

    #[tokio::test]
    async fn memory_backend_serves_every_cell() {
        let services = AppServices::build(TestConfig::default().to_arc()).await.unwrap();
        let app = create_router(&services);

        let root = app
            .clone()
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(root.status(), StatusCode::OK);

        for uri in ["/appointments", "/queues", "/schedules/00000000-0000-0000-0000-000000000000"] {
            let response = app
                .clone()
                .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{}", uri);
        }
    }
}
