//! Reservation ledger and spot availability store.
//!
//! Each spot's state sits behind its own `RwLock`. A lifecycle operation takes
//! the spot's write lock, checks, appends ONE event to the WAL and only then
//! applies it, so the lock plus the single record form the transaction: two
//! creates on one spot serialize on the lock, and a failed append applies nothing.

mod availability;
mod conflict;
mod error;
mod mutations;
mod queries;
mod sweep;

pub use conflict::find_conflict;
pub use error::EngineError;
pub use mutations::{NewLot, cost_for};
pub use queries::{GeoQuery, distance_km};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedRwLockWriteGuard, RwLock, mpsc, oneshot};
use ulid::Ulid;

use crate::clock::{Clock, StorageZone};
use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedSpotState = Arc<RwLock<SpotState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Drain all immediately available Appends (the batch window).
/// 3. Commit the batch with a single fsync, or roll all of it back.
/// 4. Respond to all senders with the batch result.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            // Flush current batch first, then handle the non-append command
                            flush_and_respond(&mut wal, &mut batch);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break,
                    }
                }

                if !batch.is_empty() {
                    flush_and_respond(&mut wal, &mut batch);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_and_respond(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    if let Err(e) = &result {
        tracing::error!(error = %e, batch = batch.len(), "WAL flush failed");
    }
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

/// One commit for the whole batch. A failure rolls the log back, so no
/// event from a batch reported as failed survives a restart.
fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    wal.commit(batch.iter().map(|(event, _)| event))
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|len| wal.swap_compact_file(len));
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the caller"),
    }
}

pub struct Engine {
    pub(super) lots: DashMap<Ulid, LotInfo>,
    pub(super) spots: DashMap<Ulid, SharedSpotState>,
    /// Lot → spot ids, in insertion order.
    pub(super) lot_spots: DashMap<Ulid, Vec<Ulid>>,
    /// Reverse lookup: reservation id → spot id.
    pub(super) reservation_to_spot: DashMap<Ulid, Ulid>,
    pub(super) user_reservations: DashMap<Ulid, Vec<Ulid>>,
    /// Serializes catalogue writes (lots, spots) and compaction snapshots.
    pub(super) catalog_lock: Mutex<()>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    clock: Arc<dyn Clock>,
    zone: StorageZone,
}

impl Engine {
    pub fn new(
        wal_path: PathBuf,
        notify: Arc<NotifyHub>,
        clock: Arc<dyn Clock>,
        zone: StorageZone,
    ) -> io::Result<Self> {
        let (wal, events) = Wal::recover(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            lots: DashMap::new(),
            spots: DashMap::new(),
            lot_spots: DashMap::new(),
            reservation_to_spot: DashMap::new(),
            user_reservations: DashMap::new(),
            catalog_lock: Mutex::new(()),
            wal_tx,
            notify,
            clock,
            zone,
        };

        // We're the sole owner of these Arcs during replay, so try_write always
        // succeeds. Never block here: this may run inside an async context.
        for event in &events {
            match event {
                Event::LotCreated { .. } | Event::SpotAdded { .. } => engine.apply_catalog(event),
                other => {
                    if let Some(spot_id) = other.spot_id()
                        && let Some(rs) = engine.get_spot(&spot_id)
                    {
                        let mut guard = rs.try_write().expect("replay: uncontended write");
                        engine.apply_to_spot(&mut guard, other);
                    }
                }
            }
        }

        tracing::info!(
            events = events.len(),
            lots = engine.lots.len(),
            spots = engine.spots.len(),
            reservations = engine.reservation_to_spot.len(),
            "ledger replayed"
        );
        Ok(engine)
    }

    pub fn zone(&self) -> StorageZone {
        self.zone
    }

    /// "Now" on the storage wall clock, for comparing against stored times.
    pub fn now_local(&self) -> Ms {
        self.zone.now_local(self.clock.as_ref())
    }

    /// "Now" as an instant, for checks made before times are converted.
    pub(super) fn now_utc(&self) -> chrono::DateTime<chrono::Utc> {
        self.clock.now()
    }

    /// Write event to WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::Store("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Store("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Store(e.to_string()))
    }

    pub fn get_spot(&self, id: &Ulid) -> Option<SharedSpotState> {
        self.spots.get(id).map(|e| e.value().clone())
    }

    pub(super) fn spot_for_reservation(&self, id: &Ulid) -> Option<Ulid> {
        self.reservation_to_spot.get(id).map(|e| *e.value())
    }

    pub(super) fn hourly_rate(&self, lot_id: &Ulid) -> Result<Cents, EngineError> {
        self.lots
            .get(lot_id)
            .map(|l| l.hourly_rate)
            .ok_or(EngineError::lot(*lot_id))
    }

    /// WAL-append, then apply, then notify. Caller holds the spot's write lock.
    pub(super) async fn persist_and_apply(
        &self,
        rs: &mut SpotState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        self.apply_to_spot(rs, event);
        self.notify.send(rs.lot_id, event);
        Ok(())
    }

    /// Lookup reservation → spot, acquire the spot's write lock.
    pub(super) async fn resolve_reservation_write(
        &self,
        reservation_id: &Ulid,
    ) -> Result<OwnedRwLockWriteGuard<SpotState>, EngineError> {
        let spot_id = self
            .spot_for_reservation(reservation_id)
            .ok_or(EngineError::reservation(*reservation_id))?;
        let rs = self.get_spot(&spot_id).ok_or(EngineError::spot(spot_id))?;
        Ok(rs.write_owned().await)
    }

    /// Apply a lot-level event to the catalogue maps.
    pub(super) fn apply_catalog(&self, event: &Event) {
        match event {
            Event::LotCreated {
                id,
                name,
                address,
                latitude,
                longitude,
                hourly_rate,
                amenities,
                description,
            } => {
                self.lots.insert(
                    *id,
                    LotInfo {
                        id: *id,
                        name: name.clone(),
                        address: address.clone(),
                        latitude: *latitude,
                        longitude: *longitude,
                        hourly_rate: *hourly_rate,
                        amenities: amenities.clone(),
                        description: description.clone(),
                    },
                );
                self.lot_spots.entry(*id).or_default();
            }
            Event::SpotAdded {
                id,
                lot_id,
                spot_number,
                spot_type,
            } => {
                let rs = SpotState::new(*id, *lot_id, spot_number.clone(), spot_type.clone());
                self.spots.insert(*id, Arc::new(RwLock::new(rs)));
                self.lot_spots.entry(*lot_id).or_default().push(*id);
            }
            _ => {}
        }
    }

    /// Apply a reservation event to its spot (no locking; caller holds the lock).
    /// Ledger row and availability flag change together here and nowhere else.
    pub(super) fn apply_to_spot(&self, rs: &mut SpotState, event: &Event) {
        match event {
            Event::ReservationCreated {
                id,
                user_id,
                spot_id,
                span,
                total_cost,
                created_at,
            } => {
                rs.insert_reservation(Reservation {
                    id: *id,
                    user_id: *user_id,
                    spot_id: *spot_id,
                    span: *span,
                    total_cost: *total_cost,
                    status: LedgerStatus::Active,
                    payment_status: PaymentStatus::Pending,
                    payment_method: None,
                    transaction_id: None,
                    created_at: *created_at,
                });
                availability::mark_unavailable(rs);
                self.reservation_to_spot.insert(*id, *spot_id);
                self.user_reservations.entry(*user_id).or_default().push(*id);
            }
            Event::ReservationCancelled { id, .. } => {
                close(rs, id, LedgerStatus::Cancelled);
                availability::mark_available(rs);
            }
            Event::ReservationCompleted { id, .. } => {
                close(rs, id, LedgerStatus::Completed);
                availability::mark_available(rs);
            }
            Event::ReservationExtended {
                id,
                new_end,
                new_total_cost,
                ..
            } => {
                if let Some(r) = rs.reservation_mut(id) {
                    r.span.end = *new_end;
                    r.total_cost = *new_total_cost;
                }
            }
            Event::PaymentRecorded {
                id,
                payment_status,
                method,
                transaction_id,
                ..
            } => {
                if let Some(r) = rs.reservation_mut(id) {
                    r.payment_status = *payment_status;
                    r.payment_method = method.clone();
                    r.transaction_id = transaction_id.clone();
                }
            }
            Event::LotCreated { .. } | Event::SpotAdded { .. } => {}
        }
    }
}

/// Ledger transitions only ever leave `Active`.
fn close(rs: &mut SpotState, id: &Ulid, to: LedgerStatus) {
    if let Some(r) = rs.reservation_mut(id)
        && r.status == LedgerStatus::Active
    {
        r.status = to;
    }
}
