//! HTTP surface. Handlers translate JSON to engine calls and back; every rule
//! about reservations lives in the engine.

mod error;
mod extract;
mod health;
mod lots;
mod reservations;

pub use error::ApiError;
pub use extract::{AdminKey, AuthUser, JsonBody, amount_field};

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{MatchedPath, Request};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post, put};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::auth::IdentityVerifier;
use crate::engine::Engine;
use crate::observability;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub verifier: Arc<dyn IdentityVerifier>,
    /// Catalogue writes are refused when unset.
    pub admin_key: Option<String>,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/parking-lots", get(lots::list_lots))
        .route("/parking-lots/:lot_id/spots", get(lots::list_spots))
        .route("/parking-lots/:lot_id/events", get(lots::events))
        .route(
            "/reservations",
            post(reservations::create).get(reservations::list),
        )
        .route("/reservations/check-expired", post(reservations::check_expired))
        .route("/reservations/:id", get(reservations::get))
        .route("/reservations/:id/cancel", put(reservations::cancel))
        .route("/reservations/:id/extend", put(reservations::extend))
        .route("/reservations/:id/payment", post(reservations::payment))
        .route("/admin/parking-lots", post(lots::create_lot))
        .route("/admin/parking-lots/:lot_id/spots", post(lots::add_spot))
        .layer(middleware::from_fn(track_http))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn track_http(req: Request, next: Next) -> Response {
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_owned())
        .unwrap_or_else(|| "unmatched".into());
    let method = req.method().to_string();
    let started = Instant::now();

    let response = next.run(req).await;

    let status = response.status().as_u16().to_string();
    metrics::counter!(
        observability::HTTP_REQUESTS_TOTAL,
        "method" => method.clone(),
        "route" => route.clone(),
        "status" => status
    )
    .increment(1);
    metrics::histogram!(
        observability::HTTP_REQUEST_DURATION_SECONDS,
        "method" => method,
        "route" => route
    )
    .record(started.elapsed().as_secs_f64());
    response
}
