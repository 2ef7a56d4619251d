//! Expiry sweep: completes active reservations whose window has ended and
//! releases their spots.

use std::time::Instant;

use tracing::{debug, info};
use ulid::Ulid;

use crate::model::*;
use crate::observability;

use super::{Engine, EngineError};

/// An active reservation is due for completion once `end <= now`.
fn is_due(r: &Reservation, now: Ms) -> bool {
    r.is_active() && r.span.end <= now
}

impl Engine {
    /// `(reservation_id, spot_id)` for every active reservation that has ended.
    pub async fn collect_expired(&self, now: Ms) -> Vec<(Ulid, Ulid)> {
        let spots: Vec<_> = self.spots.iter().map(|e| e.value().clone()).collect();
        let mut expired = Vec::new();
        for rs in spots {
            let guard = rs.read().await;
            expired.extend(
                guard
                    .reservations
                    .iter()
                    .filter(|r| is_due(r, now))
                    .map(|r| (r.id, guard.id)),
            );
        }
        expired
    }

    /// Complete every due reservation on a spot whose write lock the caller holds.
    pub(super) async fn sweep_spot_locked(
        &self,
        rs: &mut SpotState,
        now: Ms,
    ) -> Result<usize, EngineError> {
        let due: Vec<Ulid> = rs
            .reservations
            .iter()
            .filter(|r| is_due(r, now))
            .map(|r| r.id)
            .collect();
        for id in &due {
            let event = Event::ReservationCompleted {
                id: *id,
                spot_id: rs.id,
            };
            self.persist_and_apply(rs, &event).await?;
            debug!(reservation_id = %id, spot_id = %rs.id, "reservation completed");
        }
        if !due.is_empty() {
            metrics::counter!(observability::RESERVATIONS_COMPLETED_TOTAL)
                .increment(due.len() as u64);
        }
        Ok(due.len())
    }

    /// Complete one reservation if it is still due. Returns whether it was completed.
    pub async fn complete_expired(&self, id: Ulid, now: Ms) -> Result<bool, EngineError> {
        let mut guard = self.resolve_reservation_write(&id).await?;
        let due = guard.reservation(&id).is_some_and(|r| is_due(r, now));
        if !due {
            return Ok(false);
        }
        let event = Event::ReservationCompleted {
            id,
            spot_id: guard.id,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        metrics::counter!(observability::RESERVATIONS_COMPLETED_TOTAL).increment(1);
        Ok(true)
    }

    /// One sweep pass over every spot. Returns the number of reservations completed.
    ///
    /// Safe to run concurrently with lifecycle operations and with itself: each
    /// completion re-checks under the spot lock, so a reservation cancelled or
    /// extended in the meantime is left alone.
    pub async fn sweep(&self) -> Result<usize, EngineError> {
        let started = Instant::now();
        let now = self.now_local();
        let mut completed = 0;
        for (id, spot_id) in self.collect_expired(now).await {
            match self.complete_expired(id, now).await {
                Ok(true) => {
                    completed += 1;
                    debug!(reservation_id = %id, %spot_id, "reservation completed");
                }
                Ok(false) => {}
                Err(e @ EngineError::Store(_)) => return Err(e),
                Err(e) => debug!(reservation_id = %id, error = %e, "sweep skip"),
            }
        }
        metrics::histogram!(observability::SWEEP_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());
        if completed > 0 {
            info!(completed, "expired reservations completed, spots released");
        }
        Ok(completed)
    }
}
