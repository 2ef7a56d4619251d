//! Time normalisation.
//!
//! Reservation times are stored as wall-clock readings in one fixed zone (the
//! operating region's local time), not as UTC. Anything that compares "now"
//! against a stored time must read "now" through the same [`StorageZone`].

use std::sync::Mutex;

use chrono::{DateTime, Duration, LocalResult, Offset, SecondsFormat, TimeZone, Utc};
use chrono_tz::Tz;

use crate::model::Ms;

const STORAGE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to. Used by tests and the stress bench.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, instant: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = instant;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageZone {
    tz: Tz,
}

impl StorageZone {
    pub fn new(tz: Tz) -> Self {
        Self { tz }
    }

    pub fn parse(name: &str) -> Result<Self, String> {
        name.parse::<Tz>()
            .map(Self::new)
            .map_err(|_| format!("unknown timezone: {name}"))
    }

    pub fn name(&self) -> &'static str {
        self.tz.name()
    }

    /// Instant → wall-clock milliseconds in the storage zone.
    pub fn to_storage_local(&self, instant: DateTime<Utc>) -> Ms {
        instant
            .with_timezone(&self.tz)
            .naive_local()
            .and_utc()
            .timestamp_millis()
    }

    /// Wall-clock milliseconds → instant.
    ///
    /// A reading repeated by a DST fall-back resolves to its earlier instant;
    /// a reading inside a spring-forward gap is taken at the pre-gap offset.
    pub fn to_instant(&self, local: Ms) -> DateTime<Utc> {
        let naive = DateTime::from_timestamp_millis(local)
            .map(|dt| dt.naive_utc())
            .unwrap_or_default();
        match self.tz.from_local_datetime(&naive) {
            LocalResult::Single(dt) => dt.with_timezone(&Utc),
            LocalResult::Ambiguous(earliest, _) => earliest.with_timezone(&Utc),
            LocalResult::None => {
                let before = naive - Duration::hours(24);
                let offset = self.tz.offset_from_utc_datetime(&before).fix();
                let secs = i64::from(offset.local_minus_utc());
                Utc.from_utc_datetime(&(naive - Duration::seconds(secs)))
            }
        }
    }

    /// `YYYY-MM-DD HH:MM:SS`, the storage string form.
    pub fn format_local(&self, local: Ms) -> String {
        DateTime::from_timestamp_millis(local)
            .map(|dt| dt.naive_utc().format(STORAGE_FORMAT).to_string())
            .unwrap_or_default()
    }

    /// ISO-8601 instant for the wire.
    pub fn to_rfc3339(&self, local: Ms) -> String {
        self.to_instant(local)
            .to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    pub fn now_local(&self, clock: &dyn Clock) -> Ms {
        self.to_storage_local(clock.now())
    }
}

impl Default for StorageZone {
    fn default() -> Self {
        Self::new(chrono_tz::Europe::Bucharest)
    }
}
