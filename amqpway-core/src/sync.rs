use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a mutex, recovering the guard if another thread panicked while
/// holding it. Every critical section leaves its state consistent.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
