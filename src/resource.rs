//! Fail-fast ownership of singleton hardware (haptic actuator, audio I/O).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{Error, Result};

/// A slot that at most one session may hold at a time.
///
/// Acquisition never waits: a held slot yields [`Error::Busy`] immediately.
#[derive(Clone, Debug)]
pub struct ResourceSlot {
    name: &'static str,
    held: Arc<AtomicBool>,
}

/// Proof of ownership. Dropping it frees the slot.
#[derive(Debug)]
pub struct Lease {
    name: &'static str,
    held: Arc<AtomicBool>,
}

impl ResourceSlot {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            held: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn try_acquire(&self) -> Result<Lease> {
        self.held
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| Error::Busy(self.name))?;
        log::debug!("Acquired {}", self.name);
        Ok(Lease {
            name: self.name,
            held: Arc::clone(&self.held),
        })
    }

    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::Acquire)
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.held.store(false, Ordering::Release);
        log::debug!("Released {}", self.name);
    }
}
