//! Cooperative cancellation: builder and decryptor accept a cancellation
//! signal at every suspension point. This crate's engine is synchronous,
//! so cancellation has to be a value the caller polls cooperatively rather
//! than something a runtime injects.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A cooperative cancellation flag, checked at each suspension point inside
/// [`crate::builder::build`] and [`crate::decryptor::verify_and_unwrap`].
/// Cloning a [`CancellationHandle`] and calling
/// [`CancellationHandle::cancel`] from another thread is the intended way
/// to request cancellation of an in-flight build or decrypt.
#[derive(Debug, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn handle(&self) -> CancellationHandle {
        CancellationHandle(self.0.clone())
    }
}

/// A cloneable handle that can request cancellation of the
/// [`CancellationToken`] it was derived from.
#[derive(Debug, Clone)]
pub struct CancellationHandle(Arc<AtomicBool>);

impl CancellationHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }
}
