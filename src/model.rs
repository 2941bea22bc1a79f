use chrono::DateTime;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds, the only time type.
pub type Ms = i64;

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

    /// Build a span from untrusted bounds. `None` when `end <= start`.
    pub fn checked(start: Ms, end: Ms) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        crate::interval::overlaps(self.start, self.end, other.start, other.end)
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains_span(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

/// Parse an inbound instant: RFC 3339 text or bare Unix milliseconds.
pub fn parse_instant(raw: &str) -> Option<Ms> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(ms) = raw.parse::<Ms>() {
        return Some(ms);
    }
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.timestamp_millis())
}

/// Who canceled an appointment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CanceledBy {
    Admin,
    Guest,
}

impl CanceledBy {
    pub fn as_str(&self) -> &'static str {
        match self {
            CanceledBy::Admin => "admin",
            CanceledBy::Guest => "guest",
        }
    }
}

/// A confirmed reservation of a sub-interval of a slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Ulid,
    pub slot_id: Ulid,
    pub name: String,
    pub email: Option<String>,
    pub meeting_place: Option<String>,
    pub note: Option<String>,
    pub span: Span,
    pub share_id: String,
    pub canceled_at: Option<Ms>,
    pub canceled_by: Option<CanceledBy>,
    pub created_at: Ms,
}

impl Appointment {
    /// Active appointments occupy their interval; canceled ones free it.
    pub fn is_active(&self) -> bool {
        self.canceled_at.is_none()
    }
}

/// Operator-defined bounded window that can be partially booked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotInfo {
    pub id: Ulid,
    pub name: Option<String>,
    pub span: Span,
    pub active: bool,
    pub created_at: Ms,
}

/// Shareable token scoping which slots a requester may book, and until when.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingLink {
    pub token: String,
    pub name: Option<String>,
    /// Empty means every slot is allowed.
    pub allowed_slot_ids: Vec<Ulid>,
    pub expires_at: Ms,
    pub created_at: Ms,
}

impl BookingLink {
    pub fn is_valid_at(&self, now: Ms) -> bool {
        now < self.expires_at
    }

    pub fn allows(&self, slot_id: &Ulid) -> bool {
        self.allowed_slot_ids.is_empty() || self.allowed_slot_ids.contains(slot_id)
    }

    /// `None` when the link carries no restriction.
    pub fn slot_filter(&self) -> Option<&[Ulid]> {
        if self.allowed_slot_ids.is_empty() {
            None
        } else {
            Some(&self.allowed_slot_ids)
        }
    }
}

/// A slot plus its appointments. One of these sits behind each per-slot lock.
#[derive(Debug, Clone)]
pub struct SlotState {
    pub info: SlotInfo,
    /// All appointments (active and canceled), sorted by `span.start`.
    pub appointments: Vec<Appointment>,
    /// Set under the write lock when the slot is removed, so writers that
    /// raced the delete and still hold the `Arc` refuse to commit.
    pub deleted: bool,
}

impl SlotState {
    pub fn new(info: SlotInfo) -> Self {
        Self {
            info,
            appointments: Vec::new(),
            deleted: false,
        }
    }

    /// Insert appointment maintaining sort order by span.start.
    pub fn insert_appointment(&mut self, appointment: Appointment) {
        let pos = self
            .appointments
            .partition_point(|a| a.span.start <= appointment.span.start);
        self.appointments.insert(pos, appointment);
    }

    pub fn remove_appointment(&mut self, id: Ulid) -> Option<Appointment> {
        let pos = self.appointments.iter().position(|a| a.id == id)?;
        Some(self.appointments.remove(pos))
    }

    pub fn appointment(&self, id: &Ulid) -> Option<&Appointment> {
        self.appointments.iter().find(|a| a.id == *id)
    }

    pub fn appointment_mut(&mut self, id: &Ulid) -> Option<&mut Appointment> {
        self.appointments.iter_mut().find(|a| a.id == *id)
    }

    /// Active appointments whose span overlaps the query window.
    /// Uses binary search to skip appointments starting at or after `query.end`.
    pub fn active_overlapping(&self, query: &Span) -> impl Iterator<Item = &Appointment> {
        let right_bound = self
            .appointments
            .partition_point(|a| a.span.start < query.end);
        self.appointments[..right_bound]
            .iter()
            .filter(move |a| a.is_active() && a.span.end > query.start)
    }

    /// Busy intervals: spans of active appointments ending at or after `now`.
    pub fn busy_spans(&self, now: Ms) -> Vec<Span> {
        self.appointments
            .iter()
            .filter(|a| a.is_active() && a.span.end >= now)
            .map(|a| a.span)
            .collect()
    }
}

/// The event types, flat with no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    SlotCreated {
        id: Ulid,
        name: Option<String>,
        span: Span,
        active: bool,
        created_at: Ms,
    },
    SlotActiveSet {
        id: Ulid,
        active: bool,
    },
    SlotRenamed {
        id: Ulid,
        name: Option<String>,
    },
    SlotDeleted {
        id: Ulid,
    },
    LinkCreated {
        link: BookingLink,
    },
    LinkDeleted {
        token: String,
    },
    AppointmentBooked {
        appointment: Appointment,
    },
    AppointmentCanceled {
        id: Ulid,
        slot_id: Ulid,
        canceled_at: Ms,
        canceled_by: CanceledBy,
    },
    AppointmentDeleted {
        id: Ulid,
        slot_id: Ulid,
    },
}

// ── Query result types ───────────────────────────────────────────

/// A slot with the raw busy intervals of its current appointments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlotAvailability {
    pub slot: SlotInfo,
    pub busy: Vec<Span>,
}

/// Advisory view of a single slot: merged busy ranges and their complement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlotPreview {
    pub slot: SlotInfo,
    pub busy: Vec<Span>,
    pub free: Vec<Span>,
    pub fully_occupied: bool,
}
