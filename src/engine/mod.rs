mod availability;
mod booking;
mod compaction;
mod conflict;
mod error;
mod lifecycle;
mod links;
mod queries;
mod slots;

pub use booking::{BookingRequest, ValidatedBooking};
pub use conflict::now_ms;
pub use error::EngineError;
pub use lifecycle::CancelRequest;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use ulid::Ulid;

use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedSlotState = Arc<RwLock<SlotState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit:
/// wait for one append, drain whatever else is already queued, then fsync
/// the whole batch once and answer every sender.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_non_append(&mut wal, other);
                continue;
            }
        };

        let mut batch = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }

        metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
        let flush_start = std::time::Instant::now();
        let result = flush_batch(&mut wal, &batch);
        metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
            .record(flush_start.elapsed().as_secs_f64());
        for (_, tx) in batch {
            let _ = tx.send(match &result {
                Ok(()) => Ok(()),
                Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
            });
        }

        if let Some(cmd) = deferred {
            handle_non_append(&mut wal, cmd);
        }
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let append_result = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event));
    // Flush even after an append error so partial bytes don't leak into the next batch.
    let flush_result = wal.flush_sync();
    append_result.and(flush_result)
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

/// Lookup tables kept in step with slot contents.
#[derive(Default)]
pub(super) struct Indexes {
    /// appointment id → slot id
    pub(super) appointment_to_slot: DashMap<Ulid, Ulid>,
    /// share id → appointment id
    pub(super) share_ids: DashMap<String, Ulid>,
}

impl Indexes {
    fn forget(&self, appointment: &Appointment) {
        self.appointment_to_slot.remove(&appointment.id);
        self.share_ids.remove(&appointment.share_id);
    }
}

pub struct Engine {
    pub(super) slots: DashMap<Ulid, SharedSlotState>,
    pub(super) links: DashMap<String, BookingLink>,
    pub(super) indexes: Indexes,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    /// Mutations hold it shared from before the WAL append until the event
    /// is applied; compaction holds it exclusively while it snapshots.
    pub(super) gate: Arc<RwLock<()>>,
    pub notify: Arc<NotifyHub>,
}

/// Write access to one slot. Always taken after the compaction gate.
pub(super) struct SlotWriteGuard {
    _gate: OwnedRwLockReadGuard<()>,
    slot: OwnedRwLockWriteGuard<SlotState>,
}

impl std::ops::Deref for SlotWriteGuard {
    type Target = SlotState;

    fn deref(&self) -> &SlotState {
        &self.slot
    }
}

impl std::ops::DerefMut for SlotWriteGuard {
    fn deref_mut(&mut self) -> &mut SlotState {
        &mut self.slot
    }
}

/// Apply a slot-scoped event to its SlotState (caller holds the write lock).
fn apply_to_slot(rs: &mut SlotState, event: &Event, indexes: &Indexes) {
    match event {
        Event::SlotActiveSet { active, .. } => rs.info.active = *active,
        Event::SlotRenamed { name, .. } => rs.info.name = name.clone(),
        Event::SlotDeleted { .. } => {
            for appointment in rs.appointments.drain(..) {
                indexes.forget(&appointment);
            }
            rs.deleted = true;
        }
        Event::AppointmentBooked { appointment } => {
            indexes
                .appointment_to_slot
                .insert(appointment.id, appointment.slot_id);
            indexes
                .share_ids
                .insert(appointment.share_id.clone(), appointment.id);
            rs.insert_appointment(appointment.clone());
        }
        Event::AppointmentCanceled {
            id,
            canceled_at,
            canceled_by,
            ..
        } => {
            if let Some(appointment) = rs.appointment_mut(id) {
                appointment.canceled_at = Some(*canceled_at);
                appointment.canceled_by = Some(*canceled_by);
            }
        }
        Event::AppointmentDeleted { id, .. } => {
            if let Some(appointment) = rs.remove_appointment(*id) {
                indexes.forget(&appointment);
            }
        }
        // Slot creation and links live at the map level, not here
        Event::SlotCreated { .. } | Event::LinkCreated { .. } | Event::LinkDeleted { .. } => {}
    }
}

/// Slot an event belongs to, for events applied under a slot lock.
fn event_slot_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::SlotActiveSet { id, .. }
        | Event::SlotRenamed { id, .. }
        | Event::SlotDeleted { id } => Some(*id),
        Event::AppointmentBooked { appointment } => Some(appointment.slot_id),
        Event::AppointmentCanceled { slot_id, .. } | Event::AppointmentDeleted { slot_id, .. } => {
            Some(*slot_id)
        }
        Event::SlotCreated { .. } | Event::LinkCreated { .. } | Event::LinkDeleted { .. } => None,
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            slots: DashMap::new(),
            links: DashMap::new(),
            indexes: Indexes::default(),
            wal_tx,
            gate: Arc::new(RwLock::new(())),
            notify,
        };
        for event in &events {
            engine.replay_event(event);
        }
        tracing::debug!(
            "replayed {} events: {} slots, {} links",
            events.len(),
            engine.slots.len(),
            engine.links.len()
        );
        Ok(engine)
    }

    // Replay owns every Arc, so try_write never contends. Never use
    // blocking_write here: this runs inside the runtime.
    fn replay_event(&self, event: &Event) {
        match event {
            Event::SlotCreated {
                id,
                name,
                span,
                active,
                created_at,
            } => {
                let rs = SlotState::new(SlotInfo {
                    id: *id,
                    name: name.clone(),
                    span: *span,
                    active: *active,
                    created_at: *created_at,
                });
                self.slots.insert(*id, Arc::new(RwLock::new(rs)));
            }
            Event::LinkCreated { link } => {
                self.links.insert(link.token.clone(), link.clone());
            }
            Event::LinkDeleted { token } => {
                self.links.remove(token);
            }
            other => {
                let Some(slot_id) = event_slot_id(other) else { return };
                let Some(rs) = self.get_slot_state(&slot_id) else { return };
                if let Ok(mut guard) = rs.try_write() {
                    apply_to_slot(&mut guard, other, &self.indexes);
                }
                if matches!(other, Event::SlotDeleted { .. }) {
                    self.slots.remove(&slot_id);
                }
            }
        }
    }

    /// Write event to WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub(super) fn get_slot_state(&self, id: &Ulid) -> Option<SharedSlotState> {
        self.slots.get(id).map(|e| e.value().clone())
    }

    /// WAL-append then apply, under the caller's slot write lock.
    pub(super) async fn persist_and_apply(
        &self,
        rs: &mut SlotState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_slot(rs, event, &self.indexes);
        Ok(())
    }

    /// Acquire a slot's write lock, refusing slots deleted while we waited.
    pub(super) async fn lock_slot(&self, slot_id: Ulid) -> Result<SlotWriteGuard, EngineError> {
        let rs = self
            .get_slot_state(&slot_id)
            .ok_or(EngineError::SlotNotFound(slot_id))?;
        let gate = self.gate.clone().read_owned().await;
        let slot = rs.write_owned().await;
        if slot.deleted {
            return Err(EngineError::SlotNotFound(slot_id));
        }
        Ok(SlotWriteGuard { _gate: gate, slot })
    }

    /// Lookup appointment → slot and acquire that slot's write lock.
    pub(super) async fn lock_appointment_slot(
        &self,
        appointment_id: &Ulid,
    ) -> Result<SlotWriteGuard, EngineError> {
        let slot_id = self
            .indexes
            .appointment_to_slot
            .get(appointment_id)
            .map(|e| *e.value())
            .ok_or(EngineError::NotFound)?;
        let guard = self
            .lock_slot(slot_id)
            .await
            .map_err(|_| EngineError::NotFound)?;
        if guard.appointment(appointment_id).is_none() {
            return Err(EngineError::NotFound);
        }
        Ok(guard)
    }
}
