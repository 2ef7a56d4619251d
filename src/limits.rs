use crate::model::{Cents, Ms};

pub const HOUR_MS: Ms = 3_600_000;

pub const MAX_LOTS: usize = 10_000;
pub const MAX_SPOTS_PER_LOT: usize = 5_000;
pub const MAX_RESERVATIONS_PER_SPOT: usize = 100_000;

pub const MAX_NAME_LEN: usize = 128;
pub const MAX_ADDRESS_LEN: usize = 512;
pub const MAX_DESCRIPTION_LEN: usize = 4_096;
pub const MAX_AMENITIES: usize = 32;
pub const MAX_SPOT_NUMBER_LEN: usize = 32;
pub const MAX_PAYMENT_FIELD_LEN: usize = 128;

/// Longest single booking window.
pub const MAX_RESERVATION_MS: Ms = 24 * HOUR_MS;

/// Highest hourly rate a lot may charge (100 000.00 per hour).
pub const MAX_HOURLY_RATE: Cents = 10_000_000;

/// Largest money amount accepted from a client, either sign.
pub const MAX_AMOUNT_CENTS: Cents = 100_000_000_000;

pub const MIN_EXTENSION_HOURS: u32 = 1;
pub const MAX_EXTENSION_HOURS: u32 = 6;

/// Default search radius for lot listings, in kilometres.
pub const DEFAULT_RADIUS_KM: f64 = 10.0;

/// 2000-01-01 .. 2200-01-01, read on the storage wall clock.
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
pub const MAX_VALID_TIMESTAMP_MS: Ms = 7_258_118_400_000;
