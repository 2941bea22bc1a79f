use tracing::info;
use ulid::Ulid;

use crate::model::*;
use crate::notify::NotificationKind;

use super::conflict::now_ms;
use super::{Engine, EngineError};

/// Who is canceling, and how they name the appointment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelRequest {
    /// An operator, by appointment id.
    Admin(Ulid),
    /// The requester, by the share id they were given.
    Guest(String),
}

impl CancelRequest {
    fn actor(&self) -> CanceledBy {
        match self {
            CancelRequest::Admin(_) => CanceledBy::Admin,
            CancelRequest::Guest(_) => CanceledBy::Guest,
        }
    }
}

impl Engine {
    /// Active → canceled, exactly once. The interval is free again as soon
    /// as this returns.
    pub async fn cancel_appointment(&self, request: CancelRequest) -> Result<Appointment, EngineError> {
        let id = match &request {
            CancelRequest::Admin(id) => *id,
            CancelRequest::Guest(share_id) => self
                .indexes
                .share_ids
                .get(share_id.as_str())
                .map(|e| *e.value())
                .ok_or(EngineError::NotFound)?,
        };
        let mut guard = self.lock_appointment_slot(&id).await?;
        let current = guard.appointment(&id).ok_or(EngineError::NotFound)?;
        if let CancelRequest::Guest(share_id) = &request
            && current.share_id != *share_id
        {
            return Err(EngineError::NotFound);
        }
        if current.canceled_at.is_some() {
            return Err(EngineError::AlreadyCanceled(id));
        }

        let canceled_by = request.actor();
        let event = Event::AppointmentCanceled {
            id,
            slot_id: guard.info.id,
            canceled_at: now_ms(),
            canceled_by,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        let appointment = guard.appointment(&id).cloned().ok_or(EngineError::NotFound)?;
        drop(guard);

        info!("appointment {id} canceled by {}", canceled_by.as_str());
        metrics::counter!(crate::observability::CANCELLATIONS_TOTAL, "by" => canceled_by.as_str())
            .increment(1);
        self.notify.send(NotificationKind::Canceled, &appointment);
        Ok(appointment)
    }

    /// Hard delete. Only canceled appointments, or ones that have already
    /// ended, may be deleted.
    pub async fn delete_appointment(&self, id: Ulid) -> Result<Appointment, EngineError> {
        self.delete_appointment_at(id, now_ms()).await
    }

    pub(super) async fn delete_appointment_at(&self, id: Ulid, now: Ms) -> Result<Appointment, EngineError> {
        let mut guard = self.lock_appointment_slot(&id).await?;
        let current = guard.appointment(&id).ok_or(EngineError::NotFound)?;
        if current.canceled_at.is_none() && current.span.end > now {
            return Err(EngineError::DeleteOnlyPastOrCanceled(id));
        }
        let appointment = current.clone();

        let event = Event::AppointmentDeleted {
            id,
            slot_id: guard.info.id,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        drop(guard);

        info!("appointment {id} deleted");
        metrics::counter!(crate::observability::DELETIONS_TOTAL).increment(1);
        self.notify.send(NotificationKind::Deleted, &appointment);
        Ok(appointment)
    }
}
