use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a state mutex. State guarded here is plain data that is consistent after
/// every statement, so a panic in another holder leaves nothing half-written.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
