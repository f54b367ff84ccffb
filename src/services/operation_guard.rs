//! Duplicate-operation suppression
//!
//! A source key admitted within the dedup window is rejected until it is
//! released. Admit is an atomic check-and-insert under one lock, so two
//! concurrent arrivals for the same key can never both be admitted.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::debug;

pub struct OperationGuard {
    in_flight: Mutex<HashMap<String, Instant>>,
    window: Duration,
}

impl OperationGuard {
    pub fn new(window: Duration) -> Self {
        Self {
            in_flight: Mutex::new(HashMap::new()),
            window,
        }
    }

    /// Returns true and records the key when no admission for it exists
    /// within the window.
    pub fn admit(&self, key: &str) -> bool {
        self.admit_at(key, Instant::now())
    }

    pub fn admit_at(&self, key: &str, now: Instant) -> bool {
        let mut in_flight = self.in_flight.lock();
        if let Some(admitted_at) = in_flight.get(key)
            && now.saturating_duration_since(*admitted_at) < self.window
        {
            debug!(key = %key, "Duplicate operation suppressed");
            return false;
        }
        in_flight.insert(key.to_string(), now);
        true
    }

    /// Forget the key. Unconditional; releasing an unknown key is a no-op.
    pub fn release(&self, key: &str) {
        self.in_flight.lock().remove(key);
    }

    pub fn is_tracked(&self, key: &str) -> bool {
        self.in_flight.lock().contains_key(key)
    }

    pub fn tracked_count(&self) -> usize {
        self.in_flight.lock().len()
    }

    /// Admit and hand back a handle that releases the key exactly once when
    /// dropped, whichever path the operation ends on.
    pub fn try_admit(self: &Arc<Self>, key: &str) -> Option<Admission> {
        self.admit(key).then(|| Admission {
            guard: Arc::clone(self),
            key: key.to_string(),
        })
    }
}

/// Held for the lifetime of an admitted operation
pub struct Admission {
    guard: Arc<OperationGuard>,
    key: String,
}

impl Admission {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for Admission {
    fn drop(&mut self) {
        self.guard.release(&self.key);
    }
}
