use chrono::{DateTime, Utc};
use tracing::{debug, error, info};
use ulid::Ulid;

use crate::clock::StorageZone;
use crate::limits::*;
use crate::model::*;
use crate::observability::{self, record_rejection};
use crate::status::{self, DerivedStatus};

use super::conflict::{find_conflict, validate_range};
use super::{Engine, EngineError, WalCommand};

/// Operator input for a new lot.
#[derive(Debug, Clone, PartialEq)]
pub struct NewLot {
    pub name: String,
    pub address: String,
    pub latitude: f64,
    pub longitude: f64,
    pub hourly_rate: Cents,
    pub amenities: Vec<String>,
    pub description: Option<String>,
}

/// Price of `duration_ms` of real elapsed time at `hourly_rate`, rounded
/// half-up to the cent. `None` on overflow.
pub fn cost_for(hourly_rate: Cents, duration_ms: Ms) -> Option<Cents> {
    hourly_rate
        .checked_mul(duration_ms)?
        .checked_add(HOUR_MS / 2)
        .map(|v| v / HOUR_MS)
}

/// Stored window for the instants `[start, end)`.
///
/// Both ends are read on the storage wall clock, but the stored end never
/// falls short of `start + elapsed`: inside a repeated DST hour the wall-clock
/// end can sit at or before the start, and the spot must stay held for the
/// whole booked time.
fn storage_span(zone: StorageZone, start: DateTime<Utc>, end: DateTime<Utc>, elapsed: Ms) -> Span {
    let local_start = zone.to_storage_local(start);
    let local_end = zone.to_storage_local(end).max(local_start + elapsed);
    Span::new(local_start, local_end)
}

/// Count and log a failed lifecycle operation, then hand the result back.
fn observed<T>(op: &'static str, result: Result<T, EngineError>) -> Result<T, EngineError> {
    if let Err(e) = &result {
        record_rejection(op, e);
        match e {
            EngineError::Store(_) => error!(op, error = %e, "store failure"),
            _ => debug!(op, error = %e, "rejected"),
        }
    }
    result
}

impl Engine {
    // ── Catalogue ────────────────────────────────────────────

    pub async fn create_lot(&self, lot: NewLot) -> Result<Ulid, EngineError> {
        if lot.name.trim().is_empty() {
            return Err(EngineError::Validation("lot name is required".into()));
        }
        if lot.name.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("lot name too long"));
        }
        if lot.address.len() > MAX_ADDRESS_LEN {
            return Err(EngineError::LimitExceeded("address too long"));
        }
        if lot.description.as_ref().is_some_and(|d| d.len() > MAX_DESCRIPTION_LEN) {
            return Err(EngineError::LimitExceeded("description too long"));
        }
        if lot.amenities.len() > MAX_AMENITIES {
            return Err(EngineError::LimitExceeded("too many amenities"));
        }
        if !(-90.0..=90.0).contains(&lot.latitude) || !(-180.0..=180.0).contains(&lot.longitude) {
            return Err(EngineError::Validation("coordinates out of range".into()));
        }
        if !(0..=MAX_HOURLY_RATE).contains(&lot.hourly_rate) {
            return Err(EngineError::Validation(format!(
                "hourly rate must be between 0 and {:.2}",
                cents_to_decimal(MAX_HOURLY_RATE)
            )));
        }

        let _catalog = self.catalog_lock.lock().await;
        if self.lots.len() >= MAX_LOTS {
            return Err(EngineError::LimitExceeded("too many parking lots"));
        }

        let id = Ulid::new();
        let event = Event::LotCreated {
            id,
            name: lot.name,
            address: lot.address,
            latitude: lot.latitude,
            longitude: lot.longitude,
            hourly_rate: lot.hourly_rate,
            amenities: lot.amenities,
            description: lot.description,
        };
        self.wal_append(&event).await?;
        self.apply_catalog(&event);
        info!(lot_id = %id, "parking lot created");
        Ok(id)
    }

    pub async fn add_spot(
        &self,
        lot_id: Ulid,
        spot_number: String,
        spot_type: String,
    ) -> Result<Ulid, EngineError> {
        if spot_number.trim().is_empty() {
            return Err(EngineError::Validation("spot number is required".into()));
        }
        if spot_number.len() > MAX_SPOT_NUMBER_LEN || spot_type.len() > MAX_SPOT_NUMBER_LEN {
            return Err(EngineError::LimitExceeded("spot number or type too long"));
        }

        let _catalog = self.catalog_lock.lock().await;
        if !self.lots.contains_key(&lot_id) {
            return Err(EngineError::lot(lot_id));
        }
        let existing = self.lot_spot_states(&lot_id)?;
        if existing.len() >= MAX_SPOTS_PER_LOT {
            return Err(EngineError::LimitExceeded("too many spots in lot"));
        }
        for rs in &existing {
            let guard = rs.read().await;
            if guard.spot_number == spot_number {
                return Err(EngineError::AlreadyExists(guard.id));
            }
        }

        let id = Ulid::new();
        let event = Event::SpotAdded {
            id,
            lot_id,
            spot_number,
            spot_type,
        };
        self.wal_append(&event).await?;
        self.apply_catalog(&event);
        self.notify.send(lot_id, &event);
        info!(%lot_id, spot_id = %id, "parking spot added");
        Ok(id)
    }

    // ── Reservation lifecycle ────────────────────────────────

    /// Book `spot_id` for `[start, end)`.
    ///
    /// `expected_cost` is what the client showed the user; when given it must
    /// agree with the server's price to the cent.
    pub async fn create_reservation(
        &self,
        user_id: Ulid,
        spot_id: Ulid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        expected_cost: Option<Cents>,
    ) -> Result<Ulid, EngineError> {
        let result = self
            .try_create(user_id, spot_id, start, end, expected_cost)
            .await;
        observed("create", result)
    }

    async fn try_create(
        &self,
        user_id: Ulid,
        spot_id: Ulid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        expected_cost: Option<Cents>,
    ) -> Result<Ulid, EngineError> {
        // Order, length and price come from the instants; the storage wall
        // clock repeats or skips an hour at DST changes.
        if start >= end {
            return Err(EngineError::Validation("start time must be before end time".into()));
        }
        let elapsed = (end - start).num_milliseconds();
        if elapsed > MAX_RESERVATION_MS {
            return Err(EngineError::Validation(format!(
                "reservation may not exceed {} hours",
                MAX_RESERVATION_MS / HOUR_MS
            )));
        }
        if end <= self.now_utc() {
            return Err(EngineError::Validation("reservation window has already ended".into()));
        }
        let span = storage_span(self.zone(), start, end, elapsed);
        validate_range(&span)?;
        let now = self.now_local();

        let rs = self.get_spot(&spot_id).ok_or(EngineError::spot(spot_id))?;
        let mut guard = rs.write().await;

        let total_cost = cost_for(self.hourly_rate(&guard.lot_id)?, elapsed)
            .ok_or_else(|| EngineError::Validation("reservation cost out of range".into()))?;
        if let Some(expected) = expected_cost
            && expected.abs_diff(total_cost) > 1
        {
            return Err(EngineError::Validation(format!(
                "total cost {:.2} does not match {:.2} for the booked time",
                cents_to_decimal(expected),
                cents_to_decimal(total_cost)
            )));
        }
        if guard.reservations.len() >= MAX_RESERVATIONS_PER_SPOT {
            return Err(EngineError::LimitExceeded("too many reservations on spot"));
        }

        // Release anything on this spot that has run out before judging availability.
        self.sweep_spot_locked(&mut guard, now).await?;

        if let Some(other) = find_conflict(&guard, &span, None) {
            return Err(EngineError::TimeConflict(other));
        }
        if !guard.is_available {
            return Err(EngineError::SpotUnavailable(spot_id));
        }

        let id = Ulid::new();
        let event = Event::ReservationCreated {
            id,
            user_id,
            spot_id,
            span,
            total_cost,
            created_at: now,
        };
        self.persist_and_apply(&mut guard, &event).await?;

        metrics::counter!(observability::RESERVATIONS_CREATED_TOTAL).increment(1);
        info!(
            reservation_id = %id,
            %user_id,
            %spot_id,
            start = %self.zone().format_local(span.start),
            end = %self.zone().format_local(span.end),
            total_cost,
            "reservation created"
        );
        Ok(id)
    }

    pub async fn cancel_reservation(&self, user_id: Ulid, id: Ulid) -> Result<(), EngineError> {
        let result = self.try_cancel(user_id, id).await;
        observed("cancel", result)
    }

    async fn try_cancel(&self, user_id: Ulid, id: Ulid) -> Result<(), EngineError> {
        let mut guard = self.resolve_reservation_write(&id).await?;
        let now = self.now_local();
        let r = guard.reservation(&id).ok_or(EngineError::reservation(id))?;
        if r.user_id != user_id {
            return Err(EngineError::Forbidden(id));
        }
        if !r.is_active() {
            return Err(EngineError::InvalidState(format!(
                "reservation is {} and cannot be cancelled",
                r.status.as_str()
            )));
        }
        if !status::can_cancel(r, now) {
            return Err(EngineError::InvalidState(
                "reservation has already ended and cannot be cancelled".into(),
            ));
        }

        let event = Event::ReservationCancelled {
            id,
            spot_id: guard.id,
        };
        self.persist_and_apply(&mut guard, &event).await?;

        metrics::counter!(observability::RESERVATIONS_CANCELLED_TOTAL).increment(1);
        info!(reservation_id = %id, %user_id, spot_id = %guard.id, "reservation cancelled, spot released");
        Ok(())
    }

    pub async fn extend_reservation(
        &self,
        user_id: Ulid,
        id: Ulid,
        additional_hours: u32,
    ) -> Result<Extension, EngineError> {
        let result = self.try_extend(user_id, id, additional_hours).await;
        observed("extend", result)
    }

    async fn try_extend(
        &self,
        user_id: Ulid,
        id: Ulid,
        additional_hours: u32,
    ) -> Result<Extension, EngineError> {
        if !(MIN_EXTENSION_HOURS..=MAX_EXTENSION_HOURS).contains(&additional_hours) {
            return Err(EngineError::Validation(format!(
                "additional hours must be between {MIN_EXTENSION_HOURS} and {MAX_EXTENSION_HOURS}"
            )));
        }

        let mut guard = self.resolve_reservation_write(&id).await?;
        let now = self.now_local();
        let r = guard.reservation(&id).ok_or(EngineError::reservation(id))?;
        if r.user_id != user_id {
            return Err(EngineError::Forbidden(id));
        }
        if !r.is_active() {
            return Err(EngineError::InvalidState(format!(
                "reservation is {}; only active reservations can be extended",
                r.status.as_str()
            )));
        }
        if !status::can_extend(r, now) {
            let reason = match status::of(r, now) {
                DerivedStatus::Upcoming => "reservation has not started yet",
                _ => "cannot extend an expired reservation",
            };
            return Err(EngineError::InvalidState(reason.into()));
        }

        let hourly_rate = self.hourly_rate(&guard.lot_id)?;
        let old_span = r.span;
        let old_total = r.total_cost;
        let new_end = old_span.end + Ms::from(additional_hours) * HOUR_MS;
        validate_range(&Span::new(old_span.start, new_end))?;

        let tail = Span::new(old_span.end, new_end);
        if let Some(other) = find_conflict(&guard, &tail, Some(id)) {
            return Err(EngineError::TimeConflict(other));
        }

        let (additional_cost, new_total_cost) = hourly_rate
            .checked_mul(Cents::from(additional_hours))
            .and_then(|extra| Some((extra, old_total.checked_add(extra)?)))
            .ok_or_else(|| EngineError::Validation("extension cost out of range".into()))?;
        let event = Event::ReservationExtended {
            id,
            spot_id: guard.id,
            new_end,
            new_total_cost,
        };
        self.persist_and_apply(&mut guard, &event).await?;

        metrics::counter!(observability::RESERVATIONS_EXTENDED_TOTAL).increment(1);
        info!(
            reservation_id = %id,
            additional_hours,
            new_end = %self.zone().format_local(new_end),
            new_total_cost,
            "reservation extended"
        );
        Ok(Extension {
            additional_hours,
            additional_cost,
            new_end,
            new_total_cost,
        })
    }

    /// Record the outcome of an external payment. Never touches ledger status
    /// or availability.
    pub async fn record_payment(
        &self,
        user_id: Ulid,
        id: Ulid,
        method: Option<String>,
        transaction_id: Option<String>,
        amount: Option<Cents>,
        succeeded: bool,
    ) -> Result<PaymentStatus, EngineError> {
        let result = self
            .try_record_payment(user_id, id, method, transaction_id, amount, succeeded)
            .await;
        observed("payment", result)
    }

    async fn try_record_payment(
        &self,
        user_id: Ulid,
        id: Ulid,
        method: Option<String>,
        transaction_id: Option<String>,
        amount: Option<Cents>,
        succeeded: bool,
    ) -> Result<PaymentStatus, EngineError> {
        let too_long = |f: &Option<String>| f.as_ref().is_some_and(|s| s.len() > MAX_PAYMENT_FIELD_LEN);
        if too_long(&method) || too_long(&transaction_id) {
            return Err(EngineError::LimitExceeded("payment field too long"));
        }

        let mut guard = self.resolve_reservation_write(&id).await?;
        let r = guard.reservation(&id).ok_or(EngineError::reservation(id))?;
        if r.user_id != user_id {
            return Err(EngineError::Forbidden(id));
        }
        if r.status == LedgerStatus::Cancelled {
            return Err(EngineError::InvalidState(
                "cannot pay for a cancelled reservation".into(),
            ));
        }
        if r.payment_status == PaymentStatus::Paid {
            return Err(EngineError::InvalidState("reservation is already paid".into()));
        }
        if succeeded
            && let Some(amount) = amount
            && amount != r.total_cost
        {
            return Err(EngineError::Validation(format!(
                "payment of {:.2} does not match reservation total {:.2}",
                cents_to_decimal(amount),
                cents_to_decimal(r.total_cost)
            )));
        }

        let payment_status = if succeeded {
            PaymentStatus::Paid
        } else {
            PaymentStatus::Failed
        };
        let event = Event::PaymentRecorded {
            id,
            spot_id: guard.id,
            payment_status,
            method,
            transaction_id,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        info!(reservation_id = %id, payment_status = payment_status.as_str(), "payment recorded");
        Ok(payment_status)
    }

    // ── WAL maintenance ──────────────────────────────────────

    /// Rewrite the WAL with only the events needed to recreate the current state.
    ///
    /// Holds the catalogue lock and every spot's read lock until the swap is
    /// done, so no event can land between the snapshot and the rename.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _catalog = self.catalog_lock.lock().await;

        let mut events = Vec::new();
        let lots: Vec<LotInfo> = self.lots.iter().map(|e| e.value().clone()).collect();
        let mut handles = Vec::new();
        for lot in lots {
            let lot_id = lot.id;
            events.push(Event::LotCreated {
                id: lot.id,
                name: lot.name,
                address: lot.address,
                latitude: lot.latitude,
                longitude: lot.longitude,
                hourly_rate: lot.hourly_rate,
                amenities: lot.amenities,
                description: lot.description,
            });
            handles.extend(self.lot_spot_states(&lot_id)?);
        }

        let mut guards = Vec::with_capacity(handles.len());
        for rs in handles {
            guards.push(rs.read_owned().await);
        }
        for guard in &guards {
            events.push(Event::SpotAdded {
                id: guard.id,
                lot_id: guard.lot_id,
                spot_number: guard.spot_number.clone(),
                spot_type: guard.spot_type.clone(),
            });
        }
        for guard in &guards {
            for r in &guard.reservations {
                events.extend(snapshot_reservation(r));
            }
        }

        let count = events.len();
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::Store("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Store("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Store(e.to_string()))?;

        metrics::counter!(observability::WAL_COMPACTIONS_TOTAL).increment(1);
        info!(events = count, "WAL compacted");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = tokio::sync::oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

/// Events that rebuild one reservation in its current state.
fn snapshot_reservation(r: &Reservation) -> Vec<Event> {
    let mut events = vec![Event::ReservationCreated {
        id: r.id,
        user_id: r.user_id,
        spot_id: r.spot_id,
        span: r.span,
        total_cost: r.total_cost,
        created_at: r.created_at,
    }];
    match r.status {
        LedgerStatus::Active => {}
        LedgerStatus::Cancelled => events.push(Event::ReservationCancelled {
            id: r.id,
            spot_id: r.spot_id,
        }),
        LedgerStatus::Completed => events.push(Event::ReservationCompleted {
            id: r.id,
            spot_id: r.spot_id,
        }),
    }
    if r.payment_status != PaymentStatus::Pending {
        events.push(Event::PaymentRecorded {
            id: r.id,
            spot_id: r.spot_id,
            payment_status: r.payment_status,
            method: r.payment_method.clone(),
            transaction_id: r.transaction_id.clone(),
        });
    }
    events
}
