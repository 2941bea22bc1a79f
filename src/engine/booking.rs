use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::Deserialize;
use tracing::{debug, info};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::notify::NotificationKind;
use crate::token::{claim_unique, random_token};

use super::conflict::{check_no_overlap, now_ms};
use super::{Engine, EngineError};

/// A third party's request to book `[start, end)` inside a slot.
/// Instants are unparsed text, as received.
#[derive(Debug, Clone, Deserialize)]
pub struct BookingRequest {
    pub link_token: String,
    pub slot_id: Ulid,
    pub start: String,
    pub end: String,
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub meeting_place: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
}

/// A request that passed every check short of the overlap test.
///
/// Holds the slot as it was read during validation; the slot's active flag
/// is not looked at again when the booking commits.
#[derive(Debug, Clone)]
pub struct ValidatedBooking {
    pub slot: SlotInfo,
    pub span: Span,
    name: String,
    email: Option<String>,
    meeting_place: Option<String>,
    note: Option<String>,
}

/// A share id held in the index for a booking that has not committed yet.
/// Dropping it uncommitted releases the id, including when the booking
/// future itself is dropped mid-append.
struct ShareIdClaim<'a> {
    share_ids: &'a DashMap<String, Ulid>,
    share_id: String,
    committed: bool,
}

impl Drop for ShareIdClaim<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.share_ids.remove(&self.share_id);
        }
    }
}

fn clean_optional(value: Option<String>, max: usize, what: &'static str) -> Result<Option<String>, EngineError> {
    let Some(v) = value else { return Ok(None) };
    let v = v.trim();
    if v.is_empty() {
        return Ok(None);
    }
    if v.len() > max {
        return Err(EngineError::InvalidField(what));
    }
    Ok(Some(v.to_string()))
}

impl Engine {
    /// Validate, then commit atomically with respect to other bookings on
    /// the same slot.
    pub async fn create_appointment(&self, request: BookingRequest) -> Result<Appointment, EngineError> {
        let started = std::time::Instant::now();
        let result = match self.validate_booking(request).await {
            Ok(validated) => self.commit_booking(validated).await,
            Err(e) => Err(e),
        };
        let status = match &result {
            Ok(_) => "ok",
            Err(e) => e.code(),
        };
        metrics::counter!(crate::observability::BOOKINGS_TOTAL, "status" => status).increment(1);
        metrics::histogram!(crate::observability::BOOKING_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());
        result
    }

    /// Every check that does not need the slot lock, in order: link,
    /// link scope, slot, interval, slot bounds, requester fields.
    pub async fn validate_booking(&self, request: BookingRequest) -> Result<ValidatedBooking, EngineError> {
        let link = self
            .resolve_link(&request.link_token)
            .ok_or(EngineError::LinkInvalidOrExpired)?;
        if !link.allows(&request.slot_id) {
            return Err(EngineError::SlotNotAllowedForLink(request.slot_id));
        }

        let slot = {
            let rs = self
                .get_slot_state(&request.slot_id)
                .ok_or(EngineError::SlotNotFound(request.slot_id))?;
            let guard = rs.read().await;
            if guard.deleted {
                return Err(EngineError::SlotNotFound(request.slot_id));
            }
            guard.info.clone()
        };
        if !slot.active {
            return Err(EngineError::SlotInactive(slot.id));
        }

        let (Some(start), Some(end)) = (parse_instant(&request.start), parse_instant(&request.end)) else {
            return Err(EngineError::InvalidInterval);
        };
        if end <= start {
            return Err(EngineError::InvalidInterval);
        }
        let span = Span { start, end };
        if !slot.span.contains_span(&span) {
            return Err(EngineError::OutsideSlotBounds {
                requested: span,
                slot: slot.span,
            });
        }

        let name = request.name.trim();
        if name.is_empty() {
            return Err(EngineError::InvalidField("name is required"));
        }
        if name.len() > MAX_NAME_LEN {
            return Err(EngineError::InvalidField("name too long"));
        }

        Ok(ValidatedBooking {
            slot,
            span,
            name: name.to_string(),
            email: clean_optional(request.email, MAX_EMAIL_LEN, "email too long")?,
            meeting_place: clean_optional(request.meeting_place, MAX_NAME_LEN, "meeting place too long")?,
            note: clean_optional(request.note, MAX_TEXT_LEN, "note too long")?,
        })
    }

    /// Under the slot's write lock: re-read active appointments, reject any
    /// overlap, then persist. Concurrent commits on one slot serialize here;
    /// other slots are unaffected.
    pub async fn commit_booking(&self, booking: ValidatedBooking) -> Result<Appointment, EngineError> {
        let slot_id = booking.slot.id;
        let mut guard = self.lock_slot(slot_id).await?;
        if guard.appointments.len() >= MAX_APPOINTMENTS_PER_SLOT {
            return Err(EngineError::LimitExceeded("too many appointments on slot"));
        }
        check_no_overlap(&guard, &booking.span)?;

        let id = Ulid::new();
        let now = now_ms();
        let mut claim = self.claim_share_id(id, now);
        let appointment = Appointment {
            id,
            slot_id,
            name: booking.name,
            email: booking.email,
            meeting_place: booking.meeting_place,
            note: booking.note,
            span: booking.span,
            share_id: claim.share_id.clone(),
            canceled_at: None,
            canceled_by: None,
            created_at: now,
        };

        let event = Event::AppointmentBooked {
            appointment: appointment.clone(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        claim.committed = true;
        drop(guard);

        info!(
            "appointment {id} booked on slot {slot_id} [{}, {})",
            appointment.span.start, appointment.span.end
        );
        self.notify.send(NotificationKind::Created, &appointment);
        Ok(appointment)
    }

    /// Reserve a fresh share id for `appointment_id` in the share index.
    fn claim_share_id(&self, appointment_id: Ulid, now: Ms) -> ShareIdClaim<'_> {
        let share_id = claim_unique(
            MAX_SHARE_ID_ATTEMPTS,
            now,
            || random_token(SHARE_ID_LEN),
            |candidate| match self.indexes.share_ids.entry(candidate.to_string()) {
                Entry::Vacant(vacant) => {
                    vacant.insert(appointment_id);
                    true
                }
                Entry::Occupied(_) => {
                    debug!("share id collision, drawing again");
                    false
                }
            },
        );
        ShareIdClaim {
            share_ids: &self.indexes.share_ids,
            share_id,
            committed: false,
        }
    }
}
