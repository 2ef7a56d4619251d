use std::cmp::Ordering;

use ulid::Ulid;

use crate::limits::DEFAULT_RADIUS_KM;
use crate::model::*;

use super::availability::available_at;
use super::{Engine, EngineError};

const EARTH_RADIUS_KM: f64 = 6371.0;

/// Search origin for lot listing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoQuery {
    pub latitude: f64,
    pub longitude: f64,
    pub radius_km: f64,
}

impl GeoQuery {
    pub fn new(latitude: f64, longitude: f64, radius_km: Option<f64>) -> Self {
        Self {
            latitude,
            longitude,
            radius_km: radius_km.unwrap_or(DEFAULT_RADIUS_KM),
        }
    }
}

/// Great-circle distance in kilometres (haversine).
pub fn distance_km(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lng = (lng2 - lng1).to_radians();
    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lng / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * a.sqrt().atan2((1.0 - a).sqrt())
}

impl Engine {
    pub fn get_lot(&self, id: &Ulid) -> Option<LotInfo> {
        self.lots.get(id).map(|e| e.value().clone())
    }

    /// Lots with their spot counts. With a search origin, only lots inside the
    /// radius are returned, nearest first; otherwise all lots by name.
    pub async fn list_lots(&self, near: Option<GeoQuery>) -> Vec<LotSummary> {
        let lots: Vec<LotInfo> = self.lots.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::with_capacity(lots.len());
        for lot in lots {
            let distance_km = near.map(|q| distance_km(q.latitude, q.longitude, lot.latitude, lot.longitude));
            if let (Some(q), Some(d)) = (near, distance_km)
                && d > q.radius_km
            {
                continue;
            }
            let Ok(spots) = self.lot_spot_states(&lot.id) else {
                continue;
            };
            let now = self.now_local();
            let mut available_spots = 0;
            for rs in &spots {
                if available_at(&*rs.read().await, now) {
                    available_spots += 1;
                }
            }
            out.push(LotSummary {
                total_spots: spots.len(),
                available_spots,
                distance_km,
                lot,
            });
        }

        match near {
            Some(_) => out.sort_by(|a, b| {
                a.distance_km
                    .partial_cmp(&b.distance_km)
                    .unwrap_or(Ordering::Equal)
            }),
            None => out.sort_by(|a, b| a.lot.name.cmp(&b.lot.name)),
        }
        out
    }

    /// Spots of a lot ordered by spot number.
    pub async fn list_spots(&self, lot_id: Ulid) -> Result<Vec<SpotInfo>, EngineError> {
        let spots = self.lot_spot_states(&lot_id)?;
        let now = self.now_local();
        let mut out = Vec::with_capacity(spots.len());
        for rs in spots {
            let guard = rs.read().await;
            out.push(SpotInfo {
                id: guard.id,
                lot_id: guard.lot_id,
                spot_number: guard.spot_number.clone(),
                spot_type: guard.spot_type.clone(),
                is_available: available_at(&guard, now),
            });
        }
        out.sort_by(|a, b| a.spot_number.cmp(&b.spot_number));
        Ok(out)
    }

    pub async fn get_reservation(
        &self,
        user_id: Ulid,
        id: Ulid,
    ) -> Result<ReservationView, EngineError> {
        let spot_id = self
            .spot_for_reservation(&id)
            .ok_or(EngineError::reservation(id))?;
        let rs = self.get_spot(&spot_id).ok_or(EngineError::spot(spot_id))?;
        let guard = rs.read().await;
        let r = guard.reservation(&id).ok_or(EngineError::reservation(id))?;
        if r.user_id != user_id {
            return Err(EngineError::Forbidden(id));
        }
        let lot = self.get_lot(&guard.lot_id).ok_or(EngineError::lot(guard.lot_id))?;
        Ok(view(r.clone(), &guard, lot))
    }

    /// The user's reservations, newest first.
    pub async fn list_reservations(&self, user_id: Ulid) -> Vec<ReservationView> {
        let ids = self
            .user_reservations
            .get(&user_id)
            .map(|e| e.value().clone())
            .unwrap_or_default();

        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            let Some(spot_id) = self.spot_for_reservation(&id) else {
                continue;
            };
            let Some(rs) = self.get_spot(&spot_id) else {
                continue;
            };
            let guard = rs.read().await;
            let (Some(r), Some(lot)) = (guard.reservation(&id), self.get_lot(&guard.lot_id)) else {
                continue;
            };
            out.push(view(r.clone(), &guard, lot));
        }
        out.sort_by(|a, b| {
            b.reservation
                .created_at
                .cmp(&a.reservation.created_at)
                .then(b.reservation.id.cmp(&a.reservation.id))
        });
        out
    }
}

fn view(reservation: Reservation, spot: &SpotState, lot: LotInfo) -> ReservationView {
    ReservationView {
        reservation,
        spot_number: spot.spot_number.clone(),
        lot_id: lot.id,
        lot_name: lot.name,
        address: lot.address,
        latitude: lot.latitude,
        longitude: lot.longitude,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distance_is_zero_at_origin() {
        assert!(distance_km(44.4268, 26.1025, 44.4268, 26.1025).abs() < 1e-9);
    }

    #[test]
    fn distance_bucharest_to_cluj() {
        // Roughly 325 km as the crow flies.
        let d = distance_km(44.4268, 26.1025, 46.7712, 23.6236);
        assert!((315.0..335.0).contains(&d), "got {d}");
    }

    #[test]
    fn geo_query_default_radius() {
        let q = GeoQuery::new(1.0, 2.0, None);
        assert_eq!(q.radius_km, DEFAULT_RADIUS_KM);
        assert_eq!(GeoQuery::new(1.0, 2.0, Some(3.5)).radius_km, 3.5);
    }
}
