//! Apply gate
//!
//! Single-slot mutual exclusion around options mutation. Waiters are served
//! in arrival order.

use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

/// Single-holder gate
#[derive(Debug, Clone)]
pub struct ApplyGate {
    name: &'static str,
    slot: Arc<Mutex<()>>,
}

impl ApplyGate {
    /// Create a gate; `name` shows up in the logs
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            slot: Arc::new(Mutex::new(())),
        }
    }

    /// Wait until the caller is the sole holder
    pub async fn acquire(&self) -> GateHandle {
        let guard = if let Ok(guard) = Arc::clone(&self.slot).try_lock_owned() {
            guard
        } else {
            debug!("[APPLY_GATE] queued: gate={}", self.name);
            Arc::clone(&self.slot).lock_owned().await
        };
        debug!("[APPLY_GATE] enter: gate={}", self.name);
        GateHandle {
            name: self.name,
            guard: Some(guard),
        }
    }

    /// Take the gate only if nobody holds it
    pub fn try_acquire(&self) -> Option<GateHandle> {
        let guard = Arc::clone(&self.slot).try_lock_owned().ok()?;
        debug!("[APPLY_GATE] enter: gate={}", self.name);
        Some(GateHandle {
            name: self.name,
            guard: Some(guard),
        })
    }

    /// Whether someone holds the gate right now
    pub fn is_busy(&self) -> bool {
        self.slot.try_lock().is_err()
    }
}

/// Proof of holding an [`ApplyGate`]
///
/// Releases on drop.
#[derive(Debug)]
pub struct GateHandle {
    name: &'static str,
    guard: Option<OwnedMutexGuard<()>>,
}

impl GateHandle {
    /// Release the gate. Calling it again does nothing.
    pub fn release(&mut self) {
        if self.guard.take().is_some() {
            debug!("[APPLY_GATE] exit: gate={}", self.name);
        }
    }

    /// Whether this handle still holds the gate
    pub fn is_held(&self) -> bool {
        self.guard.is_some()
    }
}

impl Drop for GateHandle {
    fn drop(&mut self) {
        self.release();
    }
}
