//! Base types and error handling.
//!
//! - [`NetError`](neterror::NetError): the error catalog with stable codes
//! - [`RefCounted`](refcount::RefCounted): atomic shared-ownership handle

pub mod context;
pub mod neterror;
pub mod refcount;

#[cfg(test)]
mod tests;

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Locks a mutex, ignoring poisoning.
///
/// State behind these locks stays consistent across a panicking user
/// callback because callbacks never run with a lock held.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
