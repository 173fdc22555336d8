//! Coherence validation across instruction boundaries.
//!
//! A scalar checksum of the machine state (stack sum + memory cell sum +
//! instruction pointer) is sampled after every instruction and compared
//! against the previous sample. Drift beyond the configured tolerance is
//! a violation in STRICT mode, a counted re-baseline in TOLERANT mode,
//! and ignored in DISABLED mode.

use crate::error::VmError;

/// Checking discipline of a [`CoherenceValidator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoherenceMode {
    /// Drift beyond tolerance raises [`VmError::CoherenceViolation`].
    Strict,
    /// Drift beyond tolerance re-baselines and counts a restoration.
    Tolerant,
    /// Only track the checksum; never fail.
    Disabled,
}

/// Collected validator counters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoherenceMetrics {
    /// Largest drift observed.
    pub max_drift: f64,
    /// Re-baselines performed in TOLERANT mode.
    pub restorations: u64,
    /// Violations raised in STRICT mode.
    pub violations: u64,
}

/// Per-run state-checksum validator.
#[derive(Debug, Clone)]
pub struct CoherenceValidator {
    mode: CoherenceMode,
    tolerance: f64,
    last_checksum: f64,
    max_drift: f64,
    restorations: u64,
    violations: u64,
}

impl CoherenceValidator {
    /// A validator in the given mode with the given drift tolerance.
    pub fn new(mode: CoherenceMode, tolerance: f64) -> Self {
        Self {
            mode,
            tolerance,
            last_checksum: 0.0,
            max_drift: 0.0,
            restorations: 0,
            violations: 0,
        }
    }

    /// Baseline the checksum at the start of a run and reset counters.
    pub fn start(&mut self, checksum: f64) {
        self.last_checksum = checksum;
        self.max_drift = 0.0;
        self.restorations = 0;
        self.violations = 0;
    }

    /// Compare the post-instruction checksum against the baseline.
    pub fn check(&mut self, current: f64) -> Result<(), VmError> {
        if self.mode == CoherenceMode::Disabled {
            self.last_checksum = current;
            return Ok(());
        }

        let drift = (current - self.last_checksum).abs();
        self.max_drift = self.max_drift.max(drift);
        if drift <= self.tolerance {
            self.last_checksum = current;
            return Ok(());
        }

        match self.mode {
            CoherenceMode::Tolerant => {
                // Restoration re-baselines; it does not revert state.
                self.restorations += 1;
                self.last_checksum = current;
                Ok(())
            }
            CoherenceMode::Strict => {
                self.violations += 1;
                Err(VmError::CoherenceViolation {
                    drift,
                    tolerance: self.tolerance,
                })
            }
            CoherenceMode::Disabled => unreachable!("handled above"),
        }
    }

    /// Counter snapshot.
    pub fn metrics(&self) -> CoherenceMetrics {
        CoherenceMetrics {
            max_drift: self.max_drift,
            restorations: self.restorations,
            violations: self.violations,
        }
    }
}
