use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use tokio::sync::RwLock;
use tracing::info;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::{now_ms, validate_span};
use super::{Engine, EngineError};

pub(super) fn validate_name(name: &Option<String>) -> Result<(), EngineError> {
    if let Some(n) = name
        && n.len() > MAX_NAME_LEN
    {
        return Err(EngineError::LimitExceeded("name too long"));
    }
    Ok(())
}

impl Engine {
    /// Create a new, active slot. Its bounds never change afterwards.
    pub async fn create_slot(
        &self,
        id: Ulid,
        name: Option<String>,
        start: Ms,
        end: Ms,
    ) -> Result<SlotInfo, EngineError> {
        let span = Span { start, end };
        validate_span(&span)?;
        validate_name(&name)?;
        let _gate = self.gate.read().await;
        if self.slots.len() >= MAX_SLOTS {
            return Err(EngineError::LimitExceeded("too many slots"));
        }

        let info = SlotInfo {
            id,
            name,
            span,
            active: true,
            created_at: now_ms(),
        };
        let event = Event::SlotCreated {
            id,
            name: info.name.clone(),
            span,
            active: true,
            created_at: info.created_at,
        };

        // Claim the id before the append; readers wait on the held write
        // lock until the slot is durable.
        let state = Arc::new(RwLock::new(SlotState::new(info.clone())));
        let mut pending = state.clone().write_owned().await;
        match self.slots.entry(id) {
            Entry::Occupied(_) => return Err(EngineError::AlreadyExists(id)),
            Entry::Vacant(vacant) => {
                vacant.insert(state);
            }
        }
        if let Err(e) = self.wal_append(&event).await {
            pending.deleted = true;
            self.slots.remove(&id);
            return Err(e);
        }
        drop(pending);
        info!("slot {id} created [{start}, {end})");
        Ok(info)
    }

    /// Toggle whether the slot is offered for new bookings.
    pub async fn set_slot_active(&self, id: Ulid, active: bool) -> Result<SlotInfo, EngineError> {
        let mut guard = self.lock_slot(id).await?;
        if guard.info.active != active {
            let event = Event::SlotActiveSet { id, active };
            self.persist_and_apply(&mut guard, &event).await?;
        }
        Ok(guard.info.clone())
    }

    pub async fn rename_slot(&self, id: Ulid, name: Option<String>) -> Result<SlotInfo, EngineError> {
        validate_name(&name)?;
        let mut guard = self.lock_slot(id).await?;
        let event = Event::SlotRenamed { id, name };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(guard.info.clone())
    }

    /// Hard delete; the slot's appointments go with it.
    pub async fn delete_slot(&self, id: Ulid) -> Result<(), EngineError> {
        let mut guard = self.lock_slot(id).await?;
        let dropped = guard.appointments.len();
        let event = Event::SlotDeleted { id };
        self.persist_and_apply(&mut guard, &event).await?;
        self.slots.remove(&id);
        info!("slot {id} deleted with {dropped} appointments");
        Ok(())
    }

    pub async fn get_slot(&self, id: Ulid) -> Result<SlotInfo, EngineError> {
        let rs = self
            .get_slot_state(&id)
            .ok_or(EngineError::SlotNotFound(id))?;
        let guard = rs.read().await;
        if guard.deleted {
            return Err(EngineError::SlotNotFound(id));
        }
        Ok(guard.info.clone())
    }

    /// All slots, ordered by start instant then id.
    pub async fn list_slots(&self) -> Vec<SlotInfo> {
        let states: Vec<_> = self.slots.iter().map(|e| e.value().clone()).collect();
        let mut slots = Vec::with_capacity(states.len());
        for rs in states {
            let guard = rs.read().await;
            if !guard.deleted {
                slots.push(guard.info.clone());
            }
        }
        slots.sort_by_key(|s| (s.span.start, s.id));
        slots
    }
}
