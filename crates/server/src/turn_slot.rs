//! Per-session turn serialization.
//!
//! Each session id maps to a `Semaphore(1)`. Holding the permit is
//! holding the session's single logical turn slot: turn N+1 cannot begin
//! until turn N has ended or been cancelled.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

pub struct TurnSlotMap {
    slots: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl Default for TurnSlotMap {
    fn default() -> Self {
        Self::new()
    }
}

impl TurnSlotMap {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Acquire the turn slot for a session, waiting for any running turn
    /// to finish. The permit auto-releases on drop.
    pub async fn acquire(&self, session_id: &str) -> OwnedSemaphorePermit {
        let semaphore = {
            let mut slots = self.slots.lock();
            slots
                .entry(session_id.to_owned())
                .or_insert_with(|| Arc::new(Semaphore::new(1)))
                .clone()
        };
        // The semaphore is never closed, so acquisition only fails if the
        // process is tearing down.
        semaphore
            .acquire_owned()
            .await
            .expect("turn slot semaphore closed")
    }

    /// Drop slots for sessions that no longer hold a turn (cleanup after
    /// session expiry).
    pub fn prune_idle(&self) {
        let mut slots = self.slots.lock();
        slots.retain(|_, semaphore| semaphore.available_permits() == 0);
    }

    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.lock().is_empty()
    }
}
