//! Per-rule activation statistics.
//!
//! One `RuleStats` bundle is shared by every engine executing the same rule
//! table, so all counters are atomics with relaxed ordering. Counts for a
//! single activation accumulate in a stack-local [`ActivationProbe`] and
//! merge into the shared bundle exactly once, when the activation ends.

use std::sync::atomic::{AtomicU64, Ordering};

/// Stack-local counters for one rule activation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActivationProbe {
    pends: u64,
    fails: u64,
}

impl ActivationProbe {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one pended head instance.
    #[inline]
    pub fn record_pend(&mut self) {
        self.pends += 1;
    }

    /// Record one failed match/join attempt.
    #[inline]
    pub fn record_fail(&mut self) {
        self.fails += 1;
    }

    pub fn pends(&self) -> u64 {
        self.pends
    }

    pub fn fails(&self) -> u64 {
        self.fails
    }
}

/// Shared activation statistics for one rule.
///
/// All counters use relaxed ordering; values observed mid-run may be stale,
/// but totals after every sharing engine has drained are exact.
pub struct RuleStats {
    /// Completed activations.
    activations: AtomicU64,
    /// Head instances pended across all activations.
    total_pends: AtomicU64,
    /// Failed match/join attempts across all activations.
    total_fails: AtomicU64,
    /// Largest pend count seen in a single activation.
    max_pends: AtomicU64,
    /// Smallest pend count seen in a single activation
    /// (u64::MAX until the first merge).
    min_pends: AtomicU64,
}

impl RuleStats {
    /// Create a bundle with all counters at zero.
    pub fn new() -> Self {
        Self {
            activations: AtomicU64::new(0),
            total_pends: AtomicU64::new(0),
            total_fails: AtomicU64::new(0),
            max_pends: AtomicU64::new(0),
            min_pends: AtomicU64::new(u64::MAX),
        }
    }

    /// Merge one finished activation's counts.
    pub fn merge(&self, probe: &ActivationProbe) {
        self.activations.fetch_add(1, Ordering::Relaxed);
        self.total_pends.fetch_add(probe.pends, Ordering::Relaxed);
        self.total_fails.fetch_add(probe.fails, Ordering::Relaxed);
        self.update_max_pends(probe.pends);
        self.update_min_pends(probe.pends);
    }

    /// Raise the per-activation maximum if this count is higher.
    #[inline]
    fn update_max_pends(&self, pends: u64) {
        let mut current = self.max_pends.load(Ordering::Relaxed);
        while pends > current {
            match self.max_pends.compare_exchange_weak(
                current,
                pends,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(c) => current = c,
            }
        }
    }

    /// Lower the per-activation minimum if this count is lower.
    #[inline]
    fn update_min_pends(&self, pends: u64) {
        let mut current = self.min_pends.load(Ordering::Relaxed);
        while pends < current {
            match self.min_pends.compare_exchange_weak(
                current,
                pends,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(c) => current = c,
            }
        }
    }

    /// Generate a snapshot report.
    pub fn report(&self) -> StatsReport {
        let activations = self.activations.load(Ordering::Relaxed);
        let min = self.min_pends.load(Ordering::Relaxed);
        StatsReport {
            activations,
            total_pends: self.total_pends.load(Ordering::Relaxed),
            total_fails: self.total_fails.load(Ordering::Relaxed),
            max_pends: self.max_pends.load(Ordering::Relaxed),
            min_pends: if activations == 0 { 0 } else { min },
        }
    }

    /// Reset all counters to their initial state.
    pub fn reset(&self) {
        self.activations.store(0, Ordering::Relaxed);
        self.total_pends.store(0, Ordering::Relaxed);
        self.total_fails.store(0, Ordering::Relaxed);
        self.max_pends.store(0, Ordering::Relaxed);
        self.min_pends.store(u64::MAX, Ordering::Relaxed);
    }
}

impl Default for RuleStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of one rule's statistics at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatsReport {
    pub activations: u64,
    pub total_pends: u64,
    pub total_fails: u64,
    pub max_pends: u64,
    pub min_pends: u64,
}

impl StatsReport {
    /// Average pends per activation.
    pub fn avg_pends(&self) -> f64 {
        if self.activations == 0 {
            0.0
        } else {
            self.total_pends as f64 / self.activations as f64
        }
    }
}

impl std::fmt::Display for StatsReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Activations:   {}", self.activations)?;
        writeln!(
            f,
            "Pends:         {} total, {} min, {} max, {:.1} avg",
            self.total_pends,
            self.min_pends,
            self.max_pends,
            self.avg_pends()
        )?;
        writeln!(f, "Failures:      {}", self.total_fails)?;
        Ok(())
    }
}
