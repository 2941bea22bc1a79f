use crate::model::Ms;

pub const MAX_SLOTS: usize = 100_000;
pub const MAX_APPOINTMENTS_PER_SLOT: usize = 10_000;
pub const MAX_LINKS: usize = 100_000;
pub const MAX_LINK_SLOT_IDS: usize = 1_000;

pub const MAX_NAME_LEN: usize = 256;
pub const MAX_EMAIL_LEN: usize = 320;
pub const MAX_TEXT_LEN: usize = 4_096;

/// Earliest accepted instant: 1970-01-01.
pub const MIN_VALID_TIMESTAMP_MS: Ms = 0;
/// Latest accepted instant: 9999-12-31.
pub const MAX_VALID_TIMESTAMP_MS: Ms = 253_402_300_799_999;

pub const SHARE_ID_LEN: usize = 32;
pub const MAX_SHARE_ID_ATTEMPTS: usize = 5;

/// Longest accepted protocol line, in bytes.
pub const MAX_REQUEST_LINE: usize = 64 * 1024;
