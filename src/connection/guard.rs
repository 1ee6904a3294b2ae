//! Single-flight serialization of pairing flows.

use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

/// Guarantees at most one pairing flow is in flight process-wide.
///
/// Later callers wait in `acquire` rather than spawning a second protocol
/// client against the shared connection slot.
#[derive(Clone, Default)]
pub struct SingleFlight {
    slot: Arc<Mutex<()>>,
}

impl SingleFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for the current flow (if any) to finish, then hold the slot.
    pub async fn acquire(&self) -> FlightPermit {
        FlightPermit {
            _slot: self.slot.clone().lock_owned().await,
        }
    }

    /// Hold the slot only if it is currently free.
    pub fn try_acquire(&self) -> Option<FlightPermit> {
        self.slot
            .clone()
            .try_lock_owned()
            .ok()
            .map(|guard| FlightPermit { _slot: guard })
    }

    /// Whether a flow currently holds the slot.
    pub fn is_busy(&self) -> bool {
        self.slot.try_lock().is_err()
    }
}

/// Permission to run one pairing flow.
///
/// Dropping the permit releases the slot, so no failure path can leave it
/// held.
pub struct FlightPermit {
    _slot: OwnedMutexGuard<()>,
}
