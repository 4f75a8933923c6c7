mod common;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tower::ServiceExt;

use appointment_cell::router::appointment_routes;
use appointment_cell::AppointmentState;
use shared_utils::test_utils::{JwtTestUtils, TestConfig, TestUser};

use common::{harness, monday, Harness};

async fn create_test_app() -> (Router, Harness, String) {
    let h = harness().await;
    let config = TestConfig::default();
    let auth = JwtTestUtils::bearer(&TestUser::staff("desk@example.com"), &config.jwt_secret);
    let app = appointment_routes(AppointmentState {
        config: config.to_arc(),
        bookings: h.bookings.clone(),
    });
    (app, h, auth)
}

fn booking_request(auth: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/appointments")
        .header("Authorization", auth)
        .header("Content-Type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn monday_scenario_over_http() {
    let (app, h, auth) = create_test_app().await;

    let book = |start: DateTime<Utc>, end: DateTime<Utc>| {
        booking_request(
            &auth,
            json!({
                "doctorId": h.doctor_id,
                "clinicId": h.clinic_id,
                "startTime": start,
                "endTime": end,
            }),
        )
    };

    let response = app.clone().oneshot(book(monday(9, 0), monday(9, 15))).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let created = body_json(response).await;
    assert_eq!(created["status"], "scheduled");
    assert_eq!(created["doctorId"], json!(h.doctor_id));

    let response = app.clone().oneshot(book(monday(9, 10), monday(9, 20))).await.unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(body_json(response).await["kind"], "conflict");

    let response = app.oneshot(book(monday(13, 0), monday(13, 15))).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn reschedule_and_cancel_over_http() {
    let (app, h, auth) = create_test_app().await;
    let booked = h.bookings.book(h.request(monday(9, 0), monday(9, 15))).await.unwrap();

    let uri = format!(
        "/appointments/{}?newStartTime={}&newEndTime={}",
        booked.id,
        urlencode(&monday(10, 0).to_rfc3339()),
        urlencode(&monday(10, 15).to_rfc3339()),
    );
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri(uri)
                .header("Authorization", &auth)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(format!("/appointments/{}", booked.id))
                .header("Authorization", &auth)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/appointments?doctorId={}&status=cancelled", h.doctor_id))
                .header("Authorization", &auth)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let listed = body_json(response).await;
    assert_eq!(listed["total"], 1);
    assert_eq!(listed["appointments"][0]["startTime"], json!(monday(10, 0)));
}

#[tokio::test]
async fn patients_cannot_book_directly() {
    let (app, h, _) = create_test_app().await;
    let auth = JwtTestUtils::bearer(
        &TestUser::patient("p@example.com"),
        &TestConfig::default().jwt_secret,
    );

    let response = app
        .oneshot(booking_request(
            &auth,
            json!({
                "doctorId": h.doctor_id,
                "startTime": monday(9, 0),
                "endTime": monday(9, 15),
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

fn urlencode(raw: &str) -> String {
    raw.replace(':', "%3A").replace('+', "%2B")
}
