use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use ulid::Ulid;

use crate::clock::StorageZone;
use crate::model::{Ms, ReservationView, cents_to_decimal};
use crate::status::{self, DerivedStatus};

use super::{ApiError, AppState, AuthUser, JsonBody, amount_field};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateReservationRequest {
    spot_id: Ulid,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    total_cost: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtendRequest {
    additional_hours: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequest {
    payment_method: Option<String>,
    transaction_id: Option<String>,
    amount: Option<f64>,
    #[serde(default = "succeeded_by_default")]
    succeeded: bool,
}

fn succeeded_by_default() -> bool {
    true
}

/// One reservation as its owner sees it. Times are RFC 3339 instants; the
/// storage wall-clock reading is also given for display.
#[derive(Debug, Serialize)]
pub struct ReservationBody {
    id: Ulid,
    spot_id: Ulid,
    spot_number: String,
    lot_id: Ulid,
    parking_lot_name: String,
    address: String,
    latitude: f64,
    longitude: f64,
    start_time: String,
    end_time: String,
    start_time_local: String,
    end_time_local: String,
    total_cost: f64,
    status: &'static str,
    derived_status: DerivedStatus,
    payment_status: &'static str,
    payment_method: Option<String>,
    transaction_id: Option<String>,
    created_at: String,
}

impl ReservationBody {
    fn new(view: ReservationView, zone: StorageZone, now: Ms) -> Self {
        let r = view.reservation;
        Self {
            id: r.id,
            spot_id: r.spot_id,
            spot_number: view.spot_number,
            lot_id: view.lot_id,
            parking_lot_name: view.lot_name,
            address: view.address,
            latitude: view.latitude,
            longitude: view.longitude,
            start_time: zone.to_rfc3339(r.span.start),
            end_time: zone.to_rfc3339(r.span.end),
            start_time_local: zone.format_local(r.span.start),
            end_time_local: zone.format_local(r.span.end),
            total_cost: cents_to_decimal(r.total_cost),
            status: r.status.as_str(),
            derived_status: status::derive(r.status, r.span, now),
            payment_status: r.payment_status.as_str(),
            payment_method: r.payment_method,
            transaction_id: r.transaction_id,
            created_at: zone.to_rfc3339(r.created_at),
        }
    }
}

pub async fn create(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    JsonBody(req): JsonBody<CreateReservationRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let expected_cost = req
        .total_cost
        .map(|c| amount_field("totalCost", c))
        .transpose()?;
    let id = state
        .engine
        .create_reservation(user, req.spot_id, req.start_time, req.end_time, expected_cost)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "message": "Reservation created successfully",
            "reservationId": id,
        })),
    ))
}

pub async fn list(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
) -> Json<Value> {
    let engine = &state.engine;
    let now = engine.now_local();
    let reservations: Vec<ReservationBody> = engine
        .list_reservations(user)
        .await
        .into_iter()
        .map(|v| ReservationBody::new(v, engine.zone(), now))
        .collect();
    Json(json!({ "success": true, "reservations": reservations }))
}

pub async fn get(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Ulid>,
) -> Result<Json<Value>, ApiError> {
    let engine = &state.engine;
    let view = engine.get_reservation(user, id).await?;
    let body = ReservationBody::new(view, engine.zone(), engine.now_local());
    Ok(Json(json!({ "success": true, "reservation": body })))
}

pub async fn cancel(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Ulid>,
) -> Result<Json<Value>, ApiError> {
    state.engine.cancel_reservation(user, id).await?;
    Ok(Json(json!({
        "success": true,
        "message": "Reservation cancelled successfully",
    })))
}

pub async fn extend(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Ulid>,
    JsonBody(req): JsonBody<ExtendRequest>,
) -> Result<Json<Value>, ApiError> {
    let ext = state
        .engine
        .extend_reservation(user, id, req.additional_hours)
        .await?;
    let zone = state.engine.zone();
    Ok(Json(json!({
        "success": true,
        "message": format!("Reservation extended by {} hour(s)", ext.additional_hours),
        "extension": {
            "additionalHours": ext.additional_hours,
            "additionalCost": cents_to_decimal(ext.additional_cost),
            "newEndTime": zone.to_rfc3339(ext.new_end),
            "newTotalCost": cents_to_decimal(ext.new_total_cost),
        },
    })))
}

pub async fn payment(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Ulid>,
    JsonBody(req): JsonBody<PaymentRequest>,
) -> Result<Json<Value>, ApiError> {
    let amount = req.amount.map(|a| amount_field("amount", a)).transpose()?;
    let status = state
        .engine
        .record_payment(
            user,
            id,
            req.payment_method,
            req.transaction_id,
            amount,
            req.succeeded,
        )
        .await?;
    Ok(Json(json!({ "success": true, "paymentStatus": status.as_str() })))
}

pub async fn check_expired(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let count = state.engine.sweep().await?;
    Ok(Json(json!({
        "success": true,
        "expiredCount": count,
        "message": format!("Processed {count} expired reservations"),
    })))
}
