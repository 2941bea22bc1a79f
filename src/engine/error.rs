use ulid::Ulid;

use crate::model::Span;

#[derive(Debug)]
pub enum EngineError {
    LinkInvalidOrExpired,
    SlotNotAllowedForLink(Ulid),
    SlotNotFound(Ulid),
    SlotInactive(Ulid),
    InvalidInterval,
    OutsideSlotBounds { requested: Span, slot: Span },
    /// Carries the id of the active appointment that was hit.
    Overlap(Ulid),
    NotFound,
    AlreadyCanceled(Ulid),
    DeleteOnlyPastOrCanceled(Ulid),
    AlreadyExists(Ulid),
    InvalidField(&'static str),
    LimitExceeded(&'static str),
    WalError(String),
}

impl EngineError {
    /// Stable tag for the transport layer.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::LinkInvalidOrExpired => "link_invalid_or_expired",
            EngineError::SlotNotAllowedForLink(_) => "slot_not_allowed_for_link",
            EngineError::SlotNotFound(_) => "slot_not_found",
            EngineError::SlotInactive(_) => "slot_inactive",
            EngineError::InvalidInterval => "invalid_interval",
            EngineError::OutsideSlotBounds { .. } => "outside_slot_bounds",
            EngineError::Overlap(_) => "overlap",
            EngineError::NotFound => "not_found",
            EngineError::AlreadyCanceled(_) => "already_canceled",
            EngineError::DeleteOnlyPastOrCanceled(_) => "delete_only_past_or_canceled",
            EngineError::AlreadyExists(_) => "already_exists",
            EngineError::InvalidField(_) => "invalid_field",
            EngineError::LimitExceeded(_) => "limit_exceeded",
            EngineError::WalError(_) => "storage_unavailable",
        }
    }

    /// Infrastructure faults, as opposed to rejections the caller can act on.
    pub fn is_fault(&self) -> bool {
        matches!(self, EngineError::WalError(_))
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::LinkInvalidOrExpired => write!(f, "booking link is invalid or expired"),
            EngineError::SlotNotAllowedForLink(id) => {
                write!(f, "slot {id} is not bookable through this link")
            }
            EngineError::SlotNotFound(id) => write!(f, "slot not found: {id}"),
            EngineError::SlotInactive(id) => write!(f, "slot is inactive: {id}"),
            EngineError::InvalidInterval => write!(f, "invalid interval: end must be after start"),
            EngineError::OutsideSlotBounds { requested, slot } => write!(
                f,
                "[{}, {}) is outside slot bounds [{}, {})",
                requested.start, requested.end, slot.start, slot.end
            ),
            EngineError::Overlap(id) => write!(f, "overlaps existing appointment: {id}"),
            EngineError::NotFound => write!(f, "not found"),
            EngineError::AlreadyCanceled(id) => write!(f, "appointment already canceled: {id}"),
            EngineError::DeleteOnlyPastOrCanceled(id) => write!(
                f,
                "cannot delete appointment {id}: only past or canceled appointments can be deleted"
            ),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::InvalidField(msg) => write!(f, "invalid field: {msg}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
