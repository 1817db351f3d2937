//! Upload limit guard.
//!
//! Bounds both how many uploads a user may have in flight and how many layers one file may fan
//! out into. Every layer of an admitted file occupies one slot of the user's budget until the
//! returned [`Admission`] is dropped (or explicitly released).

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::{ImportError, ImportResult, LimitReason};

/// Shared store of per-user active upload counts.
///
/// `try_reserve` must check and increment atomically.
pub trait UploadCounterStore: Send + Sync {
    /// Current active count for `user`.
    fn active(&self, user: &str) -> usize;

    /// Reserve `slots` for `user` unless `active + slots >= max`.
    ///
    /// Returns the active count observed before the reservation, or that count as `Err` when
    /// the reservation was refused.
    fn try_reserve(&self, user: &str, slots: usize, max: usize) -> Result<usize, usize>;

    /// Return `slots` previously reserved for `user`.
    fn release(&self, user: &str, slots: usize);
}

/// Process-wide in-memory counter store.
#[derive(Debug, Default)]
pub struct InMemoryUploadCounter {
    active: Mutex<HashMap<String, usize>>,
}

impl InMemoryUploadCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sum of active slots across all users.
    pub fn total_active(&self) -> usize {
        let g = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        g.values().sum()
    }
}

impl UploadCounterStore for InMemoryUploadCounter {
    fn active(&self, user: &str) -> usize {
        let g = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        g.get(user).copied().unwrap_or(0)
    }

    fn try_reserve(&self, user: &str, slots: usize, max: usize) -> Result<usize, usize> {
        let mut g = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        let current = g.get(user).copied().unwrap_or(0);
        if current + slots >= max {
            return Err(current);
        }
        g.insert(user.to_string(), current + slots);
        Ok(current)
    }

    fn release(&self, user: &str, slots: usize) {
        let mut g = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(n) = g.get_mut(user) {
            *n = n.saturating_sub(slots);
            if *n == 0 {
                g.remove(user);
            }
        }
    }
}

/// Enforces the parallel upload budget against a shared counter store.
#[derive(Clone)]
pub struct UploadLimitGuard {
    store: Arc<dyn UploadCounterStore>,
    max: usize,
}

impl fmt::Debug for UploadLimitGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadLimitGuard")
            .field("max", &self.max)
            .finish()
    }
}

impl UploadLimitGuard {
    pub fn new(store: Arc<dyn UploadCounterStore>, max: usize) -> Self {
        Self { store, max }
    }

    pub fn max(&self) -> usize {
        self.max
    }

    pub fn active(&self, user: &str) -> usize {
        self.store.active(user)
    }

    /// Reject a user who already has `max` uploads running, without reserving anything.
    ///
    /// Cheap enough to run before any file is opened.
    pub fn check_capacity(&self, user: &str) -> ImportResult<()> {
        let active = self.store.active(user);
        if active >= self.max {
            tracing::info!(user, active, max = self.max, "upload rejected: user at capacity");
            return Err(ImportError::ParallelismLimitExceeded {
                reason: LimitReason::WouldExceedParallelism,
                layer_count: 0,
                active,
                max: self.max,
            });
        }
        Ok(())
    }

    /// Admit a file that fans out into `layer_count` layers.
    pub fn admit(&self, user: &str, layer_count: usize) -> ImportResult<Admission> {
        if layer_count >= self.max {
            tracing::info!(user, layer_count, max = self.max, "upload rejected: too many layers");
            return Err(ImportError::ParallelismLimitExceeded {
                reason: LimitReason::LayerCountExceedsMax,
                layer_count,
                active: self.store.active(user),
                max: self.max,
            });
        }
        match self.store.try_reserve(user, layer_count, self.max) {
            Ok(before) => {
                tracing::debug!(user, layer_count, active = before + layer_count, "upload admitted");
                Ok(Admission {
                    store: Arc::clone(&self.store),
                    user: user.to_string(),
                    slots: layer_count,
                    released: false,
                })
            }
            Err(active) => {
                tracing::info!(user, layer_count, active, max = self.max, "upload rejected: parallelism");
                Err(ImportError::ParallelismLimitExceeded {
                    reason: LimitReason::WouldExceedParallelism,
                    layer_count,
                    active,
                    max: self.max,
                })
            }
        }
    }
}

/// Reserved upload slots. Released exactly once: on [`Admission::release`] or on drop.
#[must_use = "dropping an Admission releases its slots immediately"]
pub struct Admission {
    store: Arc<dyn UploadCounterStore>,
    user: String,
    slots: usize,
    released: bool,
}

impl fmt::Debug for Admission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Admission")
            .field("user", &self.user)
            .field("slots", &self.slots)
            .field("released", &self.released)
            .finish()
    }
}

impl Admission {
    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn slots(&self) -> usize {
        self.slots
    }

    pub fn release(mut self) {
        self.release_once();
    }

    /// Return the slots above `slots` to the store. Never grows the reservation.
    pub fn shrink_to(&mut self, slots: usize) {
        if self.released || slots >= self.slots {
            return;
        }
        let returned = self.slots - slots;
        self.store.release(&self.user, returned);
        self.slots = slots;
        tracing::debug!(user = %self.user, returned, slots, "upload slots shrunk");
    }

    fn release_once(&mut self) {
        if !self.released {
            self.released = true;
            self.store.release(&self.user, self.slots);
            tracing::debug!(user = %self.user, slots = self.slots, "upload slots released");
        }
    }
}

impl Drop for Admission {
    fn drop(&mut self) {
        self.release_once();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guard(max: usize) -> (Arc<InMemoryUploadCounter>, UploadLimitGuard) {
        let store = Arc::new(InMemoryUploadCounter::new());
        let g = UploadLimitGuard::new(store.clone(), max);
        (store, g)
    }

    fn reason(err: ImportError) -> LimitReason {
        match err {
            ImportError::ParallelismLimitExceeded { reason, .. } => reason,
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn file_with_max_layers_is_rejected_outright() {
        let (_, g) = guard(5);
        let err = g.admit("alice", 5).unwrap_err();
        assert_eq!(reason(err), LimitReason::LayerCountExceedsMax);
    }

    #[test]
    fn admission_succeeds_iff_below_both_bounds() {
        for max in 1..6 {
            for active in 0..6 {
                for layers in 0..6 {
                    let (store, g) = guard(max);
                    if active > 0 {
                        store.try_reserve("bob", active, usize::MAX).unwrap();
                    }
                    let admitted = g.admit("bob", layers).is_ok();
                    assert_eq!(
                        admitted,
                        layers < max && layers + active < max,
                        "max={max} active={active} layers={layers}"
                    );
                    assert_eq!(store.active("bob"), active);
                }
            }
        }
    }

    #[test]
    fn combined_count_at_max_is_rejected() {
        let (_, g) = guard(5);
        let first = g.admit("alice", 3).unwrap();
        let err = g.admit("alice", 2).unwrap_err();
        assert_eq!(reason(err), LimitReason::WouldExceedParallelism);
        drop(first);
        assert!(g.admit("alice", 2).is_ok());
    }

    #[test]
    fn release_happens_exactly_once() {
        let (store, g) = guard(10);
        let a = g.admit("alice", 3).unwrap();
        let b = g.admit("alice", 2).unwrap();
        assert_eq!(store.active("alice"), 5);
        a.release();
        assert_eq!(store.active("alice"), 2);
        drop(b);
        assert_eq!(store.active("alice"), 0);
        assert_eq!(store.total_active(), 0);
    }

    #[test]
    fn shrinking_returns_unused_slots_once() {
        let (store, g) = guard(10);
        let mut a = g.admit("alice", 4).unwrap();
        a.shrink_to(1);
        a.shrink_to(3);
        assert_eq!(a.slots(), 1);
        assert_eq!(store.active("alice"), 1);
        drop(a);
        assert_eq!(store.active("alice"), 0);
    }

    #[test]
    fn users_have_independent_budgets() {
        let (_, g) = guard(3);
        let _a = g.admit("alice", 2).unwrap();
        assert!(g.admit("bob", 2).is_ok());
        assert!(g.check_capacity("alice").is_ok());
    }

    #[test]
    fn capacity_check_rejects_saturated_user() {
        let (store, g) = guard(2);
        store.try_reserve("alice", 2, usize::MAX).unwrap();
        assert!(g.check_capacity("alice").is_err());
    }
}
