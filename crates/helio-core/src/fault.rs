//! Bookkeeping for recoverable faults
//!
//! Every fault in the control kernel is recovered locally by the task that
//! owns it. These helpers decide when to log (once per onset, once on
//! recovery) and when a failing sensor should be re-initialized.

/// Edge detector for a recurring fault condition.
///
/// ```rust
/// use helio_core::fault::{FaultLatch, FaultTransition};
///
/// let mut latch = FaultLatch::new();
/// assert_eq!(latch.fail(), FaultTransition::Onset);
/// assert_eq!(latch.fail(), FaultTransition::Ongoing);
/// assert_eq!(latch.clear(), FaultTransition::Recovered);
/// assert_eq!(latch.clear(), FaultTransition::Healthy);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FaultLatch {
    active: bool,
    occurrences: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultTransition {
    /// First failure after a healthy period; log it.
    Onset,
    /// Still failing; stay quiet.
    Ongoing,
    /// First success after a failure streak; log it.
    Recovered,
    /// Still healthy.
    Healthy,
}

impl FaultTransition {
    /// Whether this transition deserves a log line.
    pub const fn is_edge(self) -> bool {
        matches!(self, Self::Onset | Self::Recovered)
    }
}

impl FaultLatch {
    pub const fn new() -> Self {
        Self {
            active: false,
            occurrences: 0,
        }
    }

    pub fn fail(&mut self) -> FaultTransition {
        self.occurrences = self.occurrences.saturating_add(1);
        if self.active {
            FaultTransition::Ongoing
        } else {
            self.active = true;
            FaultTransition::Onset
        }
    }

    pub fn clear(&mut self) -> FaultTransition {
        if self.active {
            self.active = false;
            FaultTransition::Recovered
        } else {
            FaultTransition::Healthy
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Total failures seen since boot.
    pub fn occurrences(&self) -> u32 {
        self.occurrences
    }
}

/// What a sensor poller should do after a read attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureAction {
    /// Read succeeded.
    None,
    /// First failure of a streak.
    LogOnset,
    /// Keep using the cached value silently.
    KeepStale,
    /// The streak crossed the threshold; try to re-initialize the device.
    Reinitialize,
}

/// Consecutive-failure counter with a re-initialization threshold.
#[derive(Debug, Clone, Copy)]
pub struct FailureCounter {
    consecutive: u32,
    threshold: u32,
}

impl FailureCounter {
    pub const fn new(threshold: u32) -> Self {
        Self {
            consecutive: 0,
            threshold,
        }
    }

    pub fn record_success(&mut self) -> FailureAction {
        self.consecutive = 0;
        FailureAction::None
    }

    /// Count a failure. Crossing the threshold resets the streak so the
    /// next re-initialization only happens after another full streak.
    pub fn record_failure(&mut self) -> FailureAction {
        self.consecutive = self.consecutive.saturating_add(1);
        if self.consecutive > self.threshold {
            self.consecutive = 0;
            FailureAction::Reinitialize
        } else if self.consecutive == 1 {
            FailureAction::LogOnset
        } else {
            FailureAction::KeepStale
        }
    }

    pub fn consecutive(&self) -> u32 {
        self.consecutive
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latch_reports_edges_only() {
        let mut latch = FaultLatch::new();
        assert_eq!(latch.clear(), FaultTransition::Healthy);
        assert!(latch.fail().is_edge());
        assert!(!latch.fail().is_edge());
        assert!(!latch.fail().is_edge());
        assert!(latch.is_active());
        assert!(latch.clear().is_edge());
        assert_eq!(latch.occurrences(), 3);
    }

    #[test]
    fn counter_requests_reinit_after_threshold() {
        let mut counter = FailureCounter::new(3);
        assert_eq!(counter.record_failure(), FailureAction::LogOnset);
        assert_eq!(counter.record_failure(), FailureAction::KeepStale);
        assert_eq!(counter.record_failure(), FailureAction::KeepStale);
        assert_eq!(counter.record_failure(), FailureAction::Reinitialize);
        // A fresh streak starts after the re-init attempt.
        assert_eq!(counter.record_failure(), FailureAction::LogOnset);
    }

    #[test]
    fn success_resets_streak() {
        let mut counter = FailureCounter::new(2);
        counter.record_failure();
        counter.record_failure();
        assert_eq!(counter.record_success(), FailureAction::None);
        assert_eq!(counter.consecutive(), 0);
        assert_eq!(counter.record_failure(), FailureAction::LogOnset);
    }
}
