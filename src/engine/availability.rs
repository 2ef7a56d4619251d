//! Availability store: the per-spot flag and per-lot counts.
//!
//! The flips are only reachable from `Engine::apply_to_spot`, i.e. inside the
//! same event that changes the ledger. Handlers can read, never write.
//!
//! Reads go through [`available_at`]: the stored flag only flips back when the
//! sweep completes a reservation, but a spot whose holds have all run out
//! already reads free.

use ulid::Ulid;

use crate::model::{Ms, SpotState};

use super::{Engine, EngineError, SharedSpotState};

pub(super) fn mark_unavailable(rs: &mut SpotState) {
    rs.is_available = false;
}

/// Idempotent. A spot still held by another active reservation stays unavailable.
pub(super) fn mark_available(rs: &mut SpotState) {
    if !rs.has_active() {
        rs.is_available = true;
    }
}

/// Availability as seen at `now`.
pub(super) fn available_at(rs: &SpotState, now: Ms) -> bool {
    rs.is_available || !rs.reservations.iter().any(|r| r.is_active() && r.span.end > now)
}

impl Engine {
    pub async fn is_available(&self, spot_id: Ulid) -> Result<bool, EngineError> {
        let rs = self.get_spot(&spot_id).ok_or(EngineError::spot(spot_id))?;
        let guard = rs.read().await;
        Ok(available_at(&guard, self.now_local()))
    }

    pub async fn count_available(&self, lot_id: Ulid) -> Result<usize, EngineError> {
        let spots = self.lot_spot_states(&lot_id)?;
        let now = self.now_local();
        let mut available = 0;
        for rs in spots {
            if available_at(&*rs.read().await, now) {
                available += 1;
            }
        }
        Ok(available)
    }

    /// Clone the lot's spot handles out of the map so no shard guard is held across awaits.
    pub(super) fn lot_spot_states(&self, lot_id: &Ulid) -> Result<Vec<SharedSpotState>, EngineError> {
        let ids = self
            .lot_spots
            .get(lot_id)
            .map(|e| e.value().clone())
            .ok_or(EngineError::lot(*lot_id))?;
        Ok(ids.iter().filter_map(|id| self.get_spot(id)).collect())
    }
}
