use std::sync::Arc;

use axum::body::{Body, to_bytes};
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use chrono::{Duration, TimeZone, Utc};
use serde_json::{Value, json};
use tower::ServiceExt;
use ulid::Ulid;

use parkd::api::{AppState, create_router};
use parkd::auth::HmacTokenVerifier;
use parkd::clock::{Clock, ManualClock, StorageZone};
use parkd::engine::Engine;
use parkd::notify::NotifyHub;

const SECRET: &str = "integration-secret";
const ADMIN_KEY: &str = "ops-key";

// ── Test infrastructure ──────────────────────────────────────

struct TestApp {
    router: Router,
    clock: Arc<ManualClock>,
    tokens: HmacTokenVerifier,
}

fn start_test_app() -> TestApp {
    let dir = std::env::temp_dir().join(format!("parkd_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2025, 3, 10, 9, 0, 0).unwrap(),
    ));
    let engine = Engine::new(
        dir.join("parkd.wal"),
        Arc::new(NotifyHub::new()),
        clock.clone(),
        StorageZone::new(chrono_tz::UTC),
    )
    .unwrap();
    let state = AppState {
        engine: Arc::new(engine),
        verifier: Arc::new(HmacTokenVerifier::new(SECRET)),
        admin_key: Some(ADMIN_KEY.into()),
    };
    TestApp {
        router: create_router(state),
        clock,
        tokens: HmacTokenVerifier::new(SECRET),
    }
}

impl TestApp {
    async fn call(
        &self,
        method: Method,
        uri: &str,
        headers: &[(&str, String)],
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        for (name, value) in headers {
            req = req.header(*name, value);
        }
        let req = match body {
            Some(b) => req
                .header("content-type", "application/json")
                .body(Body::from(b.to_string()))
                .unwrap(),
            None => req.body(Body::empty()).unwrap(),
        };
        let resp = self.router.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, json)
    }

    async fn as_user(&self, user: Ulid, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let auth = format!("Bearer {}", self.tokens.issue(user));
        self.call(method, uri, &[("authorization", auth)], body).await
    }

    async fn as_admin(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.call(Method::POST, uri, &[("x-api-key", ADMIN_KEY.into())], Some(body))
            .await
    }

    /// One lot at 10.00/hour with one spot. Returns (lot_id, spot_id).
    async fn seed(&self) -> (String, String) {
        let (status, lot) = self
            .as_admin(
                "/admin/parking-lots",
                json!({
                    "name": "Piata Unirii",
                    "address": "Piata Unirii 1",
                    "latitude": 46.7697,
                    "longitude": 23.5899,
                    "hourlyRate": 10.0,
                    "amenities": ["covered", "ev"],
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        let lot_id = lot["parkingLotId"].as_str().unwrap().to_string();

        let (status, spot) = self
            .as_admin(
                &format!("/admin/parking-lots/{lot_id}/spots"),
                json!({ "spotNumber": "A1" }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        (lot_id, spot["spotId"].as_str().unwrap().to_string())
    }

    fn window(&self, from_h: i64, to_h: i64) -> (String, String) {
        let now = self.clock.now();
        (
            (now + Duration::hours(from_h)).to_rfc3339(),
            (now + Duration::hours(to_h)).to_rfc3339(),
        )
    }

    async fn book(&self, user: Ulid, spot_id: &str, from_h: i64, to_h: i64) -> (StatusCode, Value) {
        let (start, end) = self.window(from_h, to_h);
        self.as_user(
            user,
            Method::POST,
            "/reservations",
            Some(json!({ "spotId": spot_id, "startTime": start, "endTime": end })),
        )
        .await
    }
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn health_reports_storage_zone() {
    let app = start_test_app();
    let (status, body) = app.call(Method::GET, "/health", &[], None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["timezone"], "UTC");
    assert_eq!(body["storage_time"], "2025-03-10 09:00:00");
}

#[tokio::test]
async fn reservation_lifecycle_over_http() {
    let app = start_test_app();
    let (lot_id, spot_id) = app.seed().await;
    let user = Ulid::new();

    let (start, end) = app.window(0, 2);
    let (status, created) = app
        .as_user(
            user,
            Method::POST,
            "/reservations",
            Some(json!({
                "spotId": spot_id,
                "startTime": start,
                "endTime": end,
                "totalCost": 20.0,
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["success"], true);
    let id = created["reservationId"].as_str().unwrap().to_string();

    let (_, spots) = app
        .call(Method::GET, &format!("/parking-lots/{lot_id}/spots"), &[], None)
        .await;
    assert_eq!(spots["spots"][0]["is_available"], false);

    let (status, conflict) = app.book(Ulid::new(), &spot_id, 1, 3).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(conflict["success"], false);
    assert_eq!(conflict["code"], "time_conflict");

    let (status, ext) = app
        .as_user(
            user,
            Method::PUT,
            &format!("/reservations/{id}/extend"),
            Some(json!({ "additionalHours": 2 })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ext["extension"]["additionalHours"], 2);
    assert_eq!(ext["extension"]["additionalCost"], 20.0);
    assert_eq!(ext["extension"]["newTotalCost"], 40.0);
    assert_eq!(ext["extension"]["newEndTime"], "2025-03-10T13:00:00.000Z");

    let (status, got) = app
        .as_user(user, Method::GET, &format!("/reservations/{id}"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    let r = &got["reservation"];
    assert_eq!(r["status"], "active");
    assert_eq!(r["derived_status"], "active");
    assert_eq!(r["payment_status"], "pending");
    assert_eq!(r["total_cost"], 40.0);
    assert_eq!(r["spot_number"], "A1");
    assert_eq!(r["parking_lot_name"], "Piata Unirii");

    let (status, _) = app
        .as_user(user, Method::PUT, &format!("/reservations/{id}/cancel"), None)
        .await;
    assert_eq!(status, StatusCode::OK);

    let (_, spots) = app
        .call(Method::GET, &format!("/parking-lots/{lot_id}/spots"), &[], None)
        .await;
    assert_eq!(spots["spots"][0]["is_available"], true);

    let (status, err) = app
        .as_user(
            user,
            Method::PUT,
            &format!("/reservations/{id}/extend"),
            Some(json!({ "additionalHours": 1 })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(err["code"], "invalid_state");
}

#[tokio::test]
async fn extend_beyond_six_hours_is_a_validation_error() {
    let app = start_test_app();
    let (_, spot_id) = app.seed().await;
    let user = Ulid::new();
    let (_, created) = app.book(user, &spot_id, 0, 1).await;
    let id = created["reservationId"].as_str().unwrap();

    let (status, err) = app
        .as_user(
            user,
            Method::PUT,
            &format!("/reservations/{id}/extend"),
            Some(json!({ "additionalHours": 7 })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(err["code"], "validation");
}

#[tokio::test]
async fn check_expired_completes_and_frees_spot() {
    let app = start_test_app();
    let (lot_id, spot_id) = app.seed().await;
    let user = Ulid::new();
    let (_, created) = app.book(user, &spot_id, 0, 2).await;
    let id = created["reservationId"].as_str().unwrap().to_string();

    app.clock.advance(Duration::hours(3));

    let (status, swept) = app
        .call(Method::POST, "/reservations/check-expired", &[], None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(swept["expiredCount"], 1);

    let (_, swept) = app
        .call(Method::POST, "/reservations/check-expired", &[], None)
        .await;
    assert_eq!(swept["expiredCount"], 0);

    let (_, list) = app.as_user(user, Method::GET, "/reservations", None).await;
    let r = &list["reservations"][0];
    assert_eq!(r["id"], id.as_str());
    assert_eq!(r["status"], "completed");
    assert_eq!(r["derived_status"], "completed");

    let (_, lots) = app.call(Method::GET, "/parking-lots", &[], None).await;
    assert_eq!(lots["parkingLots"][0]["id"], lot_id.as_str());
    assert_eq!(lots["parkingLots"][0]["available_spots"], 1);
}

#[tokio::test]
async fn other_users_reservation_is_forbidden() {
    let app = start_test_app();
    let (_, spot_id) = app.seed().await;
    let (_, created) = app.book(Ulid::new(), &spot_id, 0, 1).await;
    let id = created["reservationId"].as_str().unwrap();

    let (status, err) = app
        .as_user(Ulid::new(), Method::PUT, &format!("/reservations/{id}/cancel"), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(err["code"], "forbidden");

    let (status, err) = app
        .as_user(
            Ulid::new(),
            Method::GET,
            &format!("/reservations/{}", Ulid::new()),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(err["code"], "not_found");
}

#[tokio::test]
async fn missing_or_bad_token_is_unauthorized() {
    let app = start_test_app();
    let (status, _) = app.call(Method::GET, "/reservations", &[], None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let forged = HmacTokenVerifier::new("not-the-secret").issue(Ulid::new());
    let (status, body) = app
        .call(
            Method::GET,
            "/reservations",
            &[("authorization", format!("Bearer {forged}"))],
            None,
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn catalogue_requires_admin_key() {
    let app = start_test_app();
    let body = json!({
        "name": "Lot",
        "address": "Somewhere",
        "latitude": 0.0,
        "longitude": 0.0,
        "hourlyRate": 5.0,
    });
    let (status, _) = app
        .call(Method::POST, "/admin/parking-lots", &[], Some(body.clone()))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _) = app
        .call(
            Method::POST,
            "/admin/parking-lots",
            &[("x-api-key", "wrong".into())],
            Some(body),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn duplicate_spot_number_conflicts() {
    let app = start_test_app();
    let (lot_id, _) = app.seed().await;
    let (status, err) = app
        .as_admin(
            &format!("/admin/parking-lots/{lot_id}/spots"),
            json!({ "spotNumber": "A1" }),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(err["code"], "already_exists");
}

#[tokio::test]
async fn payment_is_recorded() {
    let app = start_test_app();
    let (_, spot_id) = app.seed().await;
    let user = Ulid::new();
    let (_, created) = app.book(user, &spot_id, 0, 1).await;
    let id = created["reservationId"].as_str().unwrap();

    let (status, paid) = app
        .as_user(
            user,
            Method::POST,
            &format!("/reservations/{id}/payment"),
            Some(json!({ "paymentMethod": "card", "transactionId": "tx-42", "amount": 10.0 })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(paid["paymentStatus"], "paid");

    let (_, got) = app
        .as_user(user, Method::GET, &format!("/reservations/{id}"), None)
        .await;
    assert_eq!(got["reservation"]["payment_status"], "paid");
    assert_eq!(got["reservation"]["transaction_id"], "tx-42");
}

#[tokio::test]
async fn lots_filtered_by_radius() {
    let app = start_test_app();
    app.seed().await;
    let (_, near) = app
        .call(
            Method::GET,
            "/parking-lots?latitude=46.77&longitude=23.59&radius=5",
            &[],
            None,
        )
        .await;
    assert_eq!(near["parkingLots"].as_array().unwrap().len(), 1);
    assert!(near["parkingLots"][0]["distance_km"].as_f64().unwrap() < 1.0);

    let (_, far) = app
        .call(
            Method::GET,
            "/parking-lots?latitude=44.43&longitude=26.10",
            &[],
            None,
        )
        .await;
    assert!(far["parkingLots"].as_array().unwrap().is_empty());

    let (status, _) = app
        .call(Method::GET, "/parking-lots?latitude=44.43", &[], None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn events_stream_for_unknown_lot_is_not_found() {
    let app = start_test_app();
    let (status, _) = app
        .call(
            Method::GET,
            &format!("/parking-lots/{}/events", Ulid::new()),
            &[],
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn mistyped_bodies_get_validation_envelope() {
    let app = start_test_app();
    let (_, spot_id) = app.seed().await;
    let user = Ulid::new();

    let (status, created) = app.book(user, &spot_id, 0, 2).await;
    assert_eq!(status, StatusCode::CREATED);
    let id = created["reservationId"].as_str().unwrap().to_string();

    let (status, body) = app
        .as_user(
            user,
            Method::PUT,
            &format!("/reservations/{id}/extend"),
            Some(json!({ "additionalHours": -1 })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert_eq!(body["code"], "validation");

    let (_, end) = app.window(3, 4);
    let (status, body) = app
        .as_user(
            user,
            Method::POST,
            "/reservations",
            Some(json!({ "spotId": spot_id, "startTime": "tomorrow", "endTime": end })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "validation");
    assert!(body["error"].as_str().unwrap().contains("startTime"));

    let (status, body) = app
        .as_admin("/admin/parking-lots", json!({ "name": "No coordinates" }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "validation");
}

#[tokio::test]
async fn out_of_range_amounts_are_rejected() {
    let app = start_test_app();
    let (_, spot_id) = app.seed().await;
    let user = Ulid::new();

    let (start, end) = app.window(0, 1);
    let (status, body) = app
        .as_user(
            user,
            Method::POST,
            "/reservations",
            Some(json!({ "spotId": spot_id, "startTime": start, "endTime": end, "totalCost": -1e19 })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "validation");

    let (status, body) = app
        .as_admin(
            "/admin/parking-lots",
            json!({
                "name": "Gold",
                "address": "Str. Aurului 1",
                "latitude": 46.0,
                "longitude": 23.0,
                "hourlyRate": 1e16,
            }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "validation");

    // The spot was never taken by the rejected booking.
    let (status, _) = app.book(user, &spot_id, 0, 1).await;
    assert_eq!(status, StatusCode::CREATED);
}
