//! Process-wide single-gateway slot.
//!
//! At most one gateway may be live per host process. The slot is a guarded
//! occupancy flag: [`SessionSlot::try_acquire`] hands out a [`SlotGuard`]
//! that releases the slot when dropped. Sessions hold the guard from the
//! moment `start` begins until `stop` has confirmed the process is gone, so
//! a racing `start` fails fast instead of launching a second child.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use tracing::debug;

use crate::{GatewayError, Result};

/// Single-occupancy slot for the live gateway.
#[derive(Debug, Default)]
pub struct SessionSlot {
    occupied: AtomicBool,
}

impl SessionSlot {
    /// Create an independent, free slot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The slot shared by every session in this process.
    #[must_use]
    pub fn global() -> Arc<SessionSlot> {
        static GLOBAL: OnceLock<Arc<SessionSlot>> = OnceLock::new();
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(SessionSlot::new())))
    }

    /// Claim the slot.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::SessionActive` if another session holds it.
    pub fn try_acquire(self: &Arc<Self>) -> Result<SlotGuard> {
        self.occupied
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| {
                GatewayError::SessionActive("a gateway session is already running".into())
            })?;
        debug!("gateway slot acquired");
        Ok(SlotGuard {
            slot: Arc::clone(self),
        })
    }

    /// Whether no session currently holds the slot.
    #[must_use]
    pub fn is_free(&self) -> bool {
        !self.occupied.load(Ordering::Acquire)
    }
}

/// Exclusive claim on a [`SessionSlot`]; releases it on drop.
#[derive(Debug)]
pub struct SlotGuard {
    slot: Arc<SessionSlot>,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.slot.occupied.store(false, Ordering::Release);
        debug!("gateway slot released");
    }
}
