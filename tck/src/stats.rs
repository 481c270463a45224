//! Running error statistics over every comparison of a run.

use std::fmt;

use serde::Serialize;

/// Absolute tolerance check: `|actual - expected| <= tolerance`.
///
/// NaN on either side never passes.
pub fn within_tolerance(actual: f64, expected: f64, tolerance: f64) -> bool {
    (actual - expected).abs() <= tolerance
}

/// Accumulator for absolute errors.
///
/// Every comparison feeds one sample, passing or not, so the summary
/// reflects how close the whole run came to its reference values.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ErrorStats {
    count: usize,
    sum_abs: f64,
    sum_sq: f64,
    max_abs: f64,
    max_index: usize,
}

impl ErrorStats {
    /// Create an empty accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one absolute error. `index` identifies the item (atom id or
    /// component index) for the max-error report.
    pub fn add(&mut self, abs_error: f64, index: usize) {
        let abs_error = abs_error.abs();
        if self.count == 0 || abs_error > self.max_abs || abs_error.is_nan() {
            self.max_abs = abs_error;
            self.max_index = index;
        }
        self.count += 1;
        self.sum_abs += abs_error;
        self.sum_sq += abs_error * abs_error;
    }

    /// Record `|computed - expected|` for the next item, numbered from 1.
    pub fn observe(&mut self, computed: f64, expected: f64) {
        self.add(computed - expected, self.count + 1);
    }

    /// Fold another accumulator into this one.
    pub fn merge(&mut self, other: &ErrorStats) {
        if other.count == 0 {
            return;
        }
        if self.count == 0 || other.max_abs > self.max_abs {
            self.max_abs = other.max_abs;
            self.max_index = other.max_index;
        }
        self.count += other.count;
        self.sum_abs += other.sum_abs;
        self.sum_sq += other.sum_sq;
    }

    /// Forget every sample.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Number of samples.
    pub fn count(&self) -> usize {
        self.count
    }

    /// Mean absolute error, zero when empty.
    pub fn mean_abs(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum_abs / self.count as f64
        }
    }

    /// Root mean square error, zero when empty.
    pub fn rms(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            (self.sum_sq / self.count as f64).sqrt()
        }
    }

    /// Standard deviation of the absolute errors, zero when empty.
    pub fn std_dev(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        let mean = self.mean_abs();
        let variance = self.sum_sq / self.count as f64 - mean * mean;
        // rounding can push a zero variance slightly negative
        variance.max(0.0).sqrt()
    }

    /// Largest absolute error seen.
    pub fn max_abs(&self) -> f64 {
        self.max_abs
    }

    /// Item at which the largest error was seen.
    pub fn max_index(&self) -> usize {
        self.max_index
    }
}

impl fmt::Display for ErrorStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Average: {:10.3e} StdDev: {:10.3e} MaxErr: {:10.3e} @ item: {}",
            self.mean_abs(),
            self.std_dev(),
            self.max_abs,
            self.max_index
        )
    }
}
