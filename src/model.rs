use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Milliseconds since the epoch, read on the storage zone's wall clock.
/// Every persisted and compared time uses this type; see `clock::StorageZone`.
pub type Ms = i64;

/// Money in the smallest currency unit.
pub type Cents = i64;

pub fn cents_to_decimal(cents: Cents) -> f64 {
    cents as f64 / 100.0
}

/// Client decimal → cents. `None` for NaN, infinities and anything past
/// `MAX_AMOUNT_CENTS`, so nothing downstream sees a saturated value.
pub fn decimal_to_cents(amount: f64) -> Option<Cents> {
    let cents = (amount * 100.0).round();
    if !cents.is_finite() || cents.abs() > crate::limits::MAX_AMOUNT_CENTS as f64 {
        return None;
    }
    Some(cents as Cents)
}

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    /// Touching endpoints do not overlap.
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// Persisted, authoritative reservation state. Transitions only leave `Active`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerStatus {
    Active,
    Cancelled,
    Completed,
}

impl LedgerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerStatus::Active => "active",
            LedgerStatus::Cancelled => "cancelled",
            LedgerStatus::Completed => "completed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    pub id: Ulid,
    pub user_id: Ulid,
    pub spot_id: Ulid,
    pub span: Span,
    pub total_cost: Cents,
    pub status: LedgerStatus,
    pub payment_status: PaymentStatus,
    pub payment_method: Option<String>,
    pub transaction_id: Option<String>,
    pub created_at: Ms,
}

impl Reservation {
    pub fn is_active(&self) -> bool {
        self.status == LedgerStatus::Active
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LotInfo {
    pub id: Ulid,
    pub name: String,
    pub address: String,
    pub latitude: f64,
    pub longitude: f64,
    pub hourly_rate: Cents,
    pub amenities: Vec<String>,
    pub description: Option<String>,
}

/// One bookable spot plus every reservation ever made on it.
#[derive(Debug, Clone)]
pub struct SpotState {
    pub id: Ulid,
    pub lot_id: Ulid,
    pub spot_number: String,
    pub spot_type: String,
    /// False while the spot is held by an active reservation.
    pub is_available: bool,
    /// Sorted by `span.start`. Extensions only move `span.end`, so the order holds.
    pub reservations: Vec<Reservation>,
}

impl SpotState {
    pub fn new(id: Ulid, lot_id: Ulid, spot_number: String, spot_type: String) -> Self {
        Self {
            id,
            lot_id,
            spot_number,
            spot_type,
            is_available: true,
            reservations: Vec::new(),
        }
    }

    /// Insert reservation maintaining sort order by span.start.
    pub fn insert_reservation(&mut self, reservation: Reservation) {
        let pos = self
            .reservations
            .binary_search_by_key(&reservation.span.start, |r| r.span.start)
            .unwrap_or_else(|e| e);
        self.reservations.insert(pos, reservation);
    }

    pub fn reservation(&self, id: &Ulid) -> Option<&Reservation> {
        self.reservations.iter().find(|r| r.id == *id)
    }

    pub fn reservation_mut(&mut self, id: &Ulid) -> Option<&mut Reservation> {
        self.reservations.iter_mut().find(|r| r.id == *id)
    }

    /// Return only reservations whose span overlaps the query window.
    /// Uses binary search to skip reservations starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Reservation> {
        let right_bound = self
            .reservations
            .partition_point(|r| r.span.start < query.end);
        let query_start = query.start;
        self.reservations[..right_bound]
            .iter()
            .filter(move |r| r.span.end > query_start)
    }

    pub fn has_active(&self) -> bool {
        self.reservations.iter().any(Reservation::is_active)
    }
}

/// WAL record format. Flat: one variant per state change.
///
/// Each reservation event carries the whole of one transaction: applying it
/// updates the ledger row and the spot's availability flag together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Event {
    LotCreated {
        id: Ulid,
        name: String,
        address: String,
        latitude: f64,
        longitude: f64,
        hourly_rate: Cents,
        amenities: Vec<String>,
        description: Option<String>,
    },
    SpotAdded {
        id: Ulid,
        lot_id: Ulid,
        spot_number: String,
        spot_type: String,
    },
    ReservationCreated {
        id: Ulid,
        user_id: Ulid,
        spot_id: Ulid,
        span: Span,
        total_cost: Cents,
        created_at: Ms,
    },
    ReservationCancelled {
        id: Ulid,
        spot_id: Ulid,
    },
    ReservationExtended {
        id: Ulid,
        spot_id: Ulid,
        new_end: Ms,
        new_total_cost: Cents,
    },
    ReservationCompleted {
        id: Ulid,
        spot_id: Ulid,
    },
    PaymentRecorded {
        id: Ulid,
        spot_id: Ulid,
        payment_status: PaymentStatus,
        method: Option<String>,
        transaction_id: Option<String>,
    },
}

impl Event {
    /// The spot an event mutates; `None` for lot-level events.
    pub fn spot_id(&self) -> Option<Ulid> {
        match self {
            Event::ReservationCreated { spot_id, .. }
            | Event::ReservationCancelled { spot_id, .. }
            | Event::ReservationExtended { spot_id, .. }
            | Event::ReservationCompleted { spot_id, .. }
            | Event::PaymentRecorded { spot_id, .. } => Some(*spot_id),
            Event::LotCreated { .. } | Event::SpotAdded { .. } => None,
        }
    }
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct LotSummary {
    pub lot: LotInfo,
    pub total_spots: usize,
    pub available_spots: usize,
    /// Distance from the search origin, when one was given.
    pub distance_km: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpotInfo {
    pub id: Ulid,
    pub lot_id: Ulid,
    pub spot_number: String,
    pub spot_type: String,
    pub is_available: bool,
}

/// A reservation joined with its spot and lot, as listed to its owner.
#[derive(Debug, Clone, PartialEq)]
pub struct ReservationView {
    pub reservation: Reservation,
    pub spot_number: String,
    pub lot_id: Ulid,
    pub lot_name: String,
    pub address: String,
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Extension {
    pub additional_hours: u32,
    pub additional_cost: Cents,
    pub new_end: Ms,
    pub new_total_cost: Cents,
}
