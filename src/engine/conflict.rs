use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::{Engine, EngineError};

pub(crate) fn validate_range(span: &Span) -> Result<(), EngineError> {
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::Validation("timestamp out of range".into()));
    }
    Ok(())
}

/// First active reservation on the spot whose interval overlaps `span`,
/// skipping `exclude`. Cancelled and completed reservations never conflict.
pub fn find_conflict(rs: &SpotState, span: &Span, exclude: Option<Ulid>) -> Option<Ulid> {
    rs.overlapping(span)
        .filter(|r| r.is_active() && Some(r.id) != exclude)
        .find(|r| r.span.overlaps(span))
        .map(|r| r.id)
}

impl Engine {
    pub async fn has_conflict(
        &self,
        spot_id: Ulid,
        span: Span,
        exclude: Option<Ulid>,
    ) -> Result<bool, EngineError> {
        let rs = self.get_spot(&spot_id).ok_or(EngineError::spot(spot_id))?;
        let guard = rs.read().await;
        Ok(find_conflict(&guard, &span, exclude).is_some())
    }
}
