use std::collections::HashSet;

use ulid::Ulid;

use crate::interval::{free_intervals, is_fully_occupied, merge_and_clip};
use crate::model::*;

use super::conflict::now_ms;
use super::{Engine, EngineError, SharedSlotState};

impl Engine {
    /// Active slots with the busy intervals of their current appointments.
    ///
    /// `filter` restricts the result to those slot ids; `None` means every
    /// active slot. Busy lists are raw (unmerged) spans of non-canceled
    /// appointments that have not ended yet. Ordered by slot start, then id.
    pub async fn list_available(&self, filter: Option<&[Ulid]>) -> Vec<SlotAvailability> {
        self.list_available_at(filter, now_ms()).await
    }

    pub(super) async fn list_available_at(
        &self,
        filter: Option<&[Ulid]>,
        now: Ms,
    ) -> Vec<SlotAvailability> {
        let states: Vec<SharedSlotState> = match filter {
            Some(ids) => ids
                .iter()
                .collect::<HashSet<_>>()
                .into_iter()
                .filter_map(|id| self.get_slot_state(id))
                .collect(),
            None => self.slots.iter().map(|e| e.value().clone()).collect(),
        };

        let mut result = Vec::with_capacity(states.len());
        for rs in states {
            let guard = rs.read().await;
            if guard.deleted || !guard.info.active {
                continue;
            }
            result.push(SlotAvailability {
                slot: guard.info.clone(),
                busy: guard.busy_spans(now),
            });
        }
        result.sort_by_key(|s| (s.slot.span.start, s.slot.id));
        result
    }

    /// Availability through a booking link: only valid links, only the
    /// slots the link allows.
    pub async fn available_for_link(&self, token: &str) -> Result<Vec<SlotAvailability>, EngineError> {
        let link = self
            .resolve_link(token)
            .ok_or(EngineError::LinkInvalidOrExpired)?;
        Ok(self.list_available(link.slot_filter()).await)
    }

    /// Merged busy ranges and their complement for one slot.
    ///
    /// Advisory only: the booking transaction re-checks against live state.
    pub async fn slot_preview(&self, slot_id: Ulid) -> Result<SlotPreview, EngineError> {
        let rs = self
            .get_slot_state(&slot_id)
            .ok_or(EngineError::SlotNotFound(slot_id))?;
        let guard = rs.read().await;
        if guard.deleted {
            return Err(EngineError::SlotNotFound(slot_id));
        }
        let bound = guard.info.span;
        let raw = guard.busy_spans(now_ms());
        Ok(SlotPreview {
            slot: guard.info.clone(),
            busy: merge_and_clip(&raw, bound.start, bound.end),
            free: free_intervals(bound.start, bound.end, &raw).collect(),
            fully_occupied: is_fully_occupied(bound.start, bound.end, &raw),
        })
    }
}
