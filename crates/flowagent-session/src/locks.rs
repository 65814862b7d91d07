use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Per-session async locks.
///
/// Holding the guard for a session id excludes every other holder of the same
/// id. Lock entries are created on first use and kept, like sessions.
#[derive(Debug, Default)]
pub struct SessionLocks {
  locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl SessionLocks {
  pub fn new() -> Self {
    Self::default()
  }

  /// Wait for exclusive access to `session_id`.
  pub async fn acquire(&self, session_id: &str) -> OwnedMutexGuard<()> {
    let lock = {
      let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
      locks
        .entry(session_id.to_string())
        .or_insert_with(|| Arc::new(AsyncMutex::new(())))
        .clone()
    };
    lock.lock_owned().await
  }
}
