use std::sync::{Mutex, MutexGuard};

use tracing::warn;

/// Lock a mutex, recovering the data if a previous holder panicked.
///
/// Guards are never held across an await point, so the critical sections
/// are short map updates and a poisoned lock leaves consistent data.
pub(crate) fn mutex_lock<'a, T>(
  lock: &'a Mutex<T>,
  target: &'static str,
  op: &'static str,
) -> MutexGuard<'a, T> {
  match lock.lock() {
    Ok(guard) => guard,
    Err(poisoned) => {
      warn!(
        op,
        target_module = target,
        lock_kind = "mutex.lock",
        result = "poisoned_recovered",
        "Recovered from poisoned lock"
      );
      poisoned.into_inner()
    }
  }
}
