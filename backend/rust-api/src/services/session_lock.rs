use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::models::SessionKey;

struct Slot {
    mutex: Arc<AsyncMutex<()>>,
    /// Turns holding or waiting for `mutex`.
    holders: usize,
}

type LockTable = Arc<Mutex<HashMap<SessionKey, Slot>>>;

/// Serializes turns that target the same `(challenge, user)` pair inside one
/// process. Turns for different keys never wait on each other.
///
/// Entries are dropped from the table once no turn holds or awaits them,
/// including turns whose wait was cancelled.
#[derive(Default, Clone)]
pub struct TurnLocks {
    table: LockTable,
}

impl TurnLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, key: &SessionKey) -> TurnGuard {
        let lock = {
            let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
            let slot = table.entry(key.clone()).or_insert_with(|| Slot {
                mutex: Arc::new(AsyncMutex::new(())),
                holders: 0,
            });
            slot.holders += 1;
            slot.mutex.clone()
        };

        // Registered before waiting so a dropped wait still releases the slot.
        let mut turn = TurnGuard {
            key: key.clone(),
            table: self.table.clone(),
            guard: None,
        };
        turn.guard = Some(lock.lock_owned().await);
        turn
    }

    /// Number of keys currently tracked.
    pub fn tracked_keys(&self) -> usize {
        self.table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

pub struct TurnGuard {
    key: SessionKey,
    table: LockTable,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for TurnGuard {
    fn drop(&mut self) {
        drop(self.guard.take());

        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(slot) = table.get_mut(&self.key) {
            slot.holders = slot.holders.saturating_sub(1);
            if slot.holders == 0 {
                table.remove(&self.key);
            }
        }
    }
}
