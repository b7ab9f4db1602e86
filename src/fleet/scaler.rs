//! Load-driven autoscaling target computation.
//!
//! The scaler keeps a bounded history of in-flight prompt counts and
//! derives the number of non-terminal pods the fleet should hold: a
//! sensitivity-weighted blend of average and peak load, padded by 20%
//! headroom, clamped to the configured pool bounds.

use std::collections::VecDeque;

/// Number of load samples retained, one per control tick.
const HISTORY_CAPACITY: usize = 300;

/// Headroom multiplier applied to the weighted load.
const LOAD_HEADROOM: f64 = 1.2;

/// Autoscaling target calculator.
#[derive(Debug)]
pub struct Autoscaler {
    /// Bounded FIFO of in-flight prompt counts.
    history: VecDeque<usize>,
    /// Lower pool bound.
    min_pods: usize,
    /// Upper pool bound.
    max_pods: usize,
    /// Peak-weighting sensitivity, 0 (pure average) to 100 (pure peak).
    sensitivity: u8,
}

impl Autoscaler {
    /// Creates a scaler for the given pool bounds and sensitivity.
    #[must_use]
    pub fn new(min_pods: usize, max_pods: usize, sensitivity: u8) -> Self {
        Self {
            history: VecDeque::with_capacity(HISTORY_CAPACITY),
            min_pods,
            max_pods,
            sensitivity: sensitivity.min(100),
        }
    }

    /// Records a load sample and returns the current pod target.
    ///
    /// The sample is the number of prompts queued or processing at this
    /// tick. The returned target is always within
    /// `min_pods..=max_pods`.
    pub fn record_and_target(&mut self, in_flight: usize) -> usize {
        if self.history.len() == HISTORY_CAPACITY {
            self.history.pop_front();
        }
        self.history.push_back(in_flight);

        let total: usize = self.history.iter().sum();
        let avg = total as f64 / self.history.len() as f64;
        let peak = self.history.iter().copied().max().unwrap_or(0) as f64;

        let weight = f64::from(self.sensitivity) / 100.0;
        let weighted = avg * (1.0 - weight) + peak * weight;

        let target = self.min_pods + (weighted * LOAD_HEADROOM).round() as usize;
        target.min(self.max_pods)
    }

    /// Number of samples currently retained.
    #[must_use]
    pub fn sample_count(&self) -> usize {
        self.history.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idle_fleet_targets_minimum() {
        let mut scaler = Autoscaler::new(1, 5, 50);
        for _ in 0..10 {
            assert_eq!(scaler.record_and_target(0), 1);
        }
    }

    #[test]
    fn test_saturated_load_targets_maximum() {
        // min=0, max=5, sensitivity=50, constant load 4:
        // weighted = 4*0.5 + 4*0.5 = 4, target = round(4 * 1.2) = 5.
        let mut scaler = Autoscaler::new(0, 5, 50);
        let mut target = 0;
        for _ in 0..20 {
            target = scaler.record_and_target(4);
        }
        assert_eq!(target, 5);
    }

    #[test]
    fn test_target_clamped_to_max() {
        let mut scaler = Autoscaler::new(1, 3, 100);
        assert_eq!(scaler.record_and_target(50), 3);
    }

    #[test]
    fn test_peak_sensitivity_holds_target_after_burst() {
        // A single burst followed by silence: with sensitivity 100 the
        // peak dominates until it ages out of the window.
        let mut scaler = Autoscaler::new(0, 10, 100);
        scaler.record_and_target(4);
        let after_burst = scaler.record_and_target(0);
        assert_eq!(after_burst, 5);

        // With sensitivity 0 the same burst dilutes away instead.
        let mut flat = Autoscaler::new(0, 10, 0);
        flat.record_and_target(4);
        for _ in 0..200 {
            flat.record_and_target(0);
        }
        assert_eq!(flat.record_and_target(0), 0);
    }

    #[test]
    fn test_history_is_bounded() {
        let mut scaler = Autoscaler::new(0, 10, 50);
        for _ in 0..(HISTORY_CAPACITY + 50) {
            scaler.record_and_target(1);
        }
        assert_eq!(scaler.sample_count(), HISTORY_CAPACITY);
    }

    #[test]
    fn test_load_decays_as_window_refills() {
        let mut scaler = Autoscaler::new(1, 8, 0);
        for _ in 0..HISTORY_CAPACITY {
            scaler.record_and_target(6);
        }
        assert_eq!(scaler.record_and_target(6), 8);

        // Zero load long enough to flush the window converges on min.
        let mut target = 8;
        for _ in 0..HISTORY_CAPACITY {
            target = scaler.record_and_target(0);
        }
        assert_eq!(target, 1);
    }
}
