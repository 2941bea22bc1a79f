use crate::model::*;

use super::EngineError;

pub fn now_ms() -> Ms {
    chrono::Utc::now().timestamp_millis()
}

pub(crate) fn validate_span(span: &Span) -> Result<(), EngineError> {
    use crate::limits::*;
    if span.end <= span.start {
        return Err(EngineError::InvalidInterval);
    }
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    Ok(())
}

/// Reject `span` if it overlaps any active appointment in the slot.
/// Canceled appointments no longer hold their interval.
pub(crate) fn check_no_overlap(rs: &SlotState, span: &Span) -> Result<(), EngineError> {
    match rs.active_overlapping(span).next() {
        Some(hit) => Err(EngineError::Overlap(hit.id)),
        None => Ok(()),
    }
}
