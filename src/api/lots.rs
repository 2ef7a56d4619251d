use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::Json;
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::broadcast::error::RecvError;
use ulid::Ulid;

use crate::engine::{EngineError, GeoQuery, NewLot};
use crate::model::{Event, LotSummary, SpotInfo, cents_to_decimal};

use super::{AdminKey, ApiError, AppState, JsonBody, amount_field};

#[derive(Debug, Deserialize)]
pub struct LotSearch {
    #[serde(alias = "lat")]
    latitude: Option<f64>,
    #[serde(alias = "lng")]
    longitude: Option<f64>,
    radius: Option<f64>,
}

#[derive(Serialize)]
struct LotBody {
    id: Ulid,
    name: String,
    address: String,
    latitude: f64,
    longitude: f64,
    hourly_rate: f64,
    amenities: Vec<String>,
    description: Option<String>,
    total_spots: usize,
    available_spots: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    distance_km: Option<f64>,
}

impl From<LotSummary> for LotBody {
    fn from(s: LotSummary) -> Self {
        Self {
            id: s.lot.id,
            name: s.lot.name,
            address: s.lot.address,
            latitude: s.lot.latitude,
            longitude: s.lot.longitude,
            hourly_rate: cents_to_decimal(s.lot.hourly_rate),
            amenities: s.lot.amenities,
            description: s.lot.description,
            total_spots: s.total_spots,
            available_spots: s.available_spots,
            distance_km: s.distance_km,
        }
    }
}

#[derive(Serialize)]
struct SpotBody {
    id: Ulid,
    spot_number: String,
    spot_type: String,
    is_available: bool,
}

impl From<SpotInfo> for SpotBody {
    fn from(s: SpotInfo) -> Self {
        Self {
            id: s.id,
            spot_number: s.spot_number,
            spot_type: s.spot_type,
            is_available: s.is_available,
        }
    }
}

pub async fn list_lots(
    State(state): State<AppState>,
    Query(search): Query<LotSearch>,
) -> Result<Json<Value>, ApiError> {
    let near = match (search.latitude, search.longitude) {
        (Some(lat), Some(lng)) => Some(GeoQuery::new(lat, lng, search.radius)),
        (None, None) => None,
        _ => {
            return Err(ApiError::bad_request(
                "latitude and longitude must be given together",
            ));
        }
    };
    let lots: Vec<LotBody> = state
        .engine
        .list_lots(near)
        .await
        .into_iter()
        .map(LotBody::from)
        .collect();
    Ok(Json(json!({ "success": true, "parkingLots": lots })))
}

pub async fn list_spots(
    State(state): State<AppState>,
    Path(lot_id): Path<Ulid>,
) -> Result<Json<Value>, ApiError> {
    let spots: Vec<SpotBody> = state
        .engine
        .list_spots(lot_id)
        .await?
        .into_iter()
        .map(SpotBody::from)
        .collect();
    Ok(Json(json!({ "success": true, "spots": spots })))
}

/// Server-sent events for one lot. Each applied event is sent as its JSON
/// encoding under the event's kind; clients refetch on receipt.
pub async fn events(
    State(state): State<AppState>,
    Path(lot_id): Path<Ulid>,
) -> Result<Sse<impl Stream<Item = Result<SseEvent, Infallible>>>, ApiError> {
    if state.engine.get_lot(&lot_id).is_none() {
        return Err(EngineError::lot(lot_id).into());
    }
    let rx = state.engine.notify.subscribe(lot_id);
    let stream = futures::stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(event) => return Some((Ok(to_sse(&event)), rx)),
                // A slow client skips ahead; the next event makes it refetch anyway.
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "event stream lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    });
    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15))))
}

fn to_sse(event: &Event) -> SseEvent {
    let kind = match event {
        Event::LotCreated { .. } => "lot_created",
        Event::SpotAdded { .. } => "spot_added",
        Event::ReservationCreated { .. } => "reservation_created",
        Event::ReservationCancelled { .. } => "reservation_cancelled",
        Event::ReservationExtended { .. } => "reservation_extended",
        Event::ReservationCompleted { .. } => "reservation_completed",
        Event::PaymentRecorded { .. } => "payment_recorded",
    };
    let data = serde_json::to_string(event).unwrap_or_default();
    SseEvent::default().event(kind).data(data)
}

// ── Operator catalogue ───────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateLotRequest {
    name: String,
    address: String,
    latitude: f64,
    longitude: f64,
    hourly_rate: f64,
    #[serde(default)]
    amenities: Vec<String>,
    description: Option<String>,
}

pub async fn create_lot(
    _admin: AdminKey,
    State(state): State<AppState>,
    JsonBody(req): JsonBody<CreateLotRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let hourly_rate = amount_field("hourlyRate", req.hourly_rate)?;
    let id = state
        .engine
        .create_lot(NewLot {
            name: req.name,
            address: req.address,
            latitude: req.latitude,
            longitude: req.longitude,
            hourly_rate,
            amenities: req.amenities,
            description: req.description,
        })
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "parkingLotId": id })),
    ))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddSpotRequest {
    spot_number: String,
    #[serde(default = "default_spot_type")]
    spot_type: String,
}

fn default_spot_type() -> String {
    "standard".into()
}

pub async fn add_spot(
    _admin: AdminKey,
    State(state): State<AppState>,
    Path(lot_id): Path<Ulid>,
    JsonBody(req): JsonBody<AddSpotRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let id = state
        .engine
        .add_spot(lot_id, req.spot_number, req.spot_type)
        .await?;
    Ok((StatusCode::CREATED, Json(json!({ "success": true, "spotId": id }))))
}
