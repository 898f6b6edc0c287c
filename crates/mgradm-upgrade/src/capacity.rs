//! Scoped capacity reduction.
//!
//! [`CapacityGuard`] holds the replica count captured before quiescing.
//! The success path hands capacity back through the release that swaps the
//! image and then disarms the guard; every other exit restores it, either
//! explicitly through [`CapacityGuard::restore`] or, as a last resort, on
//! drop.

use mgradm_backend::{AdapterResult, BackendAdapter};
use mgradm_core::Component;
use tracing::{error, info, warn};

pub struct CapacityGuard<'a, B: BackendAdapter + ?Sized> {
    backend: &'a B,
    component: Component,
    captured: u32,
    swapped: bool,
    released: bool,
}

impl<'a, B: BackendAdapter + ?Sized> CapacityGuard<'a, B> {
    /// Take ownership of `component`'s capacity at `captured` replicas.
    /// Nothing is scaled yet.
    pub fn capture(backend: &'a B, component: Component, captured: u32) -> Self {
        Self {
            backend,
            component,
            captured,
            swapped: false,
            released: false,
        }
    }

    /// Scale the component to zero.
    pub fn quiesce(&self) -> AdapterResult<()> {
        info!(component = %self.component, from = self.captured, "quiescing");
        self.backend.scale(self.component, 0)
    }

    pub fn captured(&self) -> u32 {
        self.captured
    }

    /// The image swap has been attempted; failures from here on keep at
    /// least one replica.
    pub fn mark_swapped(&mut self) {
        self.swapped = true;
    }

    /// Replica count after a successful run: never zero.
    pub fn success_target(&self) -> u32 {
        self.captured.max(1)
    }

    /// Replica count after a failure.
    pub fn failure_target(&self) -> u32 {
        if self.swapped && self.captured > 0 {
            self.captured.max(1)
        } else {
            self.captured
        }
    }

    /// Capacity was handed back by other means.
    pub fn disarm(mut self) {
        self.released = true;
    }

    /// Restore after a failure and return the resulting replica count.
    pub fn restore(mut self) -> AdapterResult<u32> {
        self.released = true;
        let target = self.failure_target();
        warn!(component = %self.component, replicas = target, "restoring capacity after failure");
        self.backend.scale(self.component, target)?;
        Ok(target)
    }
}

impl<B: BackendAdapter + ?Sized> Drop for CapacityGuard<'_, B> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let target = self.failure_target();
        if let Err(err) = self.backend.scale(self.component, target) {
            error!(
                component = %self.component,
                replicas = target,
                error = %err,
                "could not restore capacity, manual intervention required"
            );
        }
    }
}
