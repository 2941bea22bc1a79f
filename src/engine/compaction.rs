use tokio::sync::oneshot;

use crate::model::*;

use super::{Engine, EngineError, WalCommand};

impl Engine {
    /// Rewrite the WAL as the minimal event set that recreates current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _gate = self.gate.write().await;
        let mut events = Vec::new();

        let states: Vec<_> = self.slots.iter().map(|e| e.value().clone()).collect();
        for rs in states {
            let guard = rs.read().await;
            if guard.deleted {
                continue;
            }
            let info = &guard.info;
            events.push(Event::SlotCreated {
                id: info.id,
                name: info.name.clone(),
                span: info.span,
                active: info.active,
                created_at: info.created_at,
            });
            // Cancellation fields ride along inside the booked record.
            events.extend(guard.appointments.iter().map(|a| Event::AppointmentBooked {
                appointment: a.clone(),
            }));
        }
        events.extend(
            self.links
                .iter()
                .map(|e| Event::LinkCreated { link: e.value().clone() }),
        );

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
