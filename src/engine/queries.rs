use ulid::Ulid;

use crate::model::*;

use super::{Engine, EngineError};

impl Engine {
    pub async fn get_appointment(&self, id: Ulid) -> Result<Appointment, EngineError> {
        let slot_id = self
            .indexes
            .appointment_to_slot
            .get(&id)
            .map(|e| *e.value())
            .ok_or(EngineError::NotFound)?;
        let rs = self.get_slot_state(&slot_id).ok_or(EngineError::NotFound)?;
        let guard = rs.read().await;
        guard.appointment(&id).cloned().ok_or(EngineError::NotFound)
    }

    /// Guest lookup. The share id is the only handle an unauthenticated
    /// requester has on their appointment.
    pub async fn find_by_share_id(&self, share_id: &str) -> Result<Appointment, EngineError> {
        let id = self
            .indexes
            .share_ids
            .get(share_id)
            .map(|e| *e.value())
            .ok_or(EngineError::NotFound)?;
        let appointment = self.get_appointment(id).await?;
        if appointment.share_id != share_id {
            return Err(EngineError::NotFound);
        }
        Ok(appointment)
    }

    /// Every appointment on a slot, canceled ones included, by start.
    pub async fn list_appointments(&self, slot_id: Ulid) -> Result<Vec<Appointment>, EngineError> {
        let rs = self
            .get_slot_state(&slot_id)
            .ok_or(EngineError::SlotNotFound(slot_id))?;
        let guard = rs.read().await;
        if guard.deleted {
            return Err(EngineError::SlotNotFound(slot_id));
        }
        Ok(guard.appointments.clone())
    }
}
