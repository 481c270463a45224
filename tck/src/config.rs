//! Harness configuration.
//!
//! Where scenario scripts are found, where persistence artifacts go, which
//! accelerated backend to compare against and how tolerances scale between
//! scenarios.

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::fixtures::backend::Backend;
use crate::fixtures::types::Bookkeeping;

/// Accelerator package requested when none is configured.
pub const DEFAULT_ACCELERATOR: &str = "omp";

/// Worker count of the default concurrent backend.
pub const DEFAULT_THREADS: usize = 4;

/// Scale factors applied to a fixture's epsilon.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToleranceProfile {
    /// Forces and stress after the short trajectory
    pub run_scale: f64,
    /// Initial stress with symmetric bookkeeping disabled
    pub newton_off_stress_scale: f64,
    /// Base epsilon multiplier for the concurrent backend
    pub concurrent_scale: f64,
    /// Stress multiplier on top of the concurrent base, init and run
    pub concurrent_stress_scale: f64,
}

impl Default for ToleranceProfile {
    fn default() -> Self {
        Self {
            run_scale: 10.0,
            newton_off_stress_scale: 2.0,
            concurrent_scale: 5.0,
            concurrent_stress_scale: 10.0,
        }
    }
}

/// Absolute tolerances for every quantity group of one scenario.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Tolerances {
    pub init_forces: f64,
    pub init_stress: f64,
    pub init_energy: f64,
    pub run_forces: f64,
    pub run_stress: f64,
    pub run_energy: f64,
    pub cross_check: f64,
}

impl ToleranceProfile {
    /// Tolerances for a backend and bookkeeping mode.
    pub fn scenario(&self, epsilon: f64, backend: &Backend, bookkeeping: Bookkeeping) -> Tolerances {
        match backend {
            Backend::Serial => {
                let init_stress = match bookkeeping {
                    Bookkeeping::SymmetricOn => epsilon,
                    Bookkeeping::SymmetricOff => self.newton_off_stress_scale * epsilon,
                };
                Tolerances {
                    init_forces: epsilon,
                    init_stress,
                    init_energy: epsilon,
                    run_forces: self.run_scale * epsilon,
                    run_stress: self.run_scale * epsilon,
                    run_energy: epsilon,
                    cross_check: epsilon,
                }
            }
            Backend::Concurrent { .. } => {
                let base = self.concurrent_scale * epsilon;
                Tolerances {
                    init_forces: base,
                    init_stress: self.concurrent_stress_scale * base,
                    init_energy: base,
                    run_forces: self.run_scale * base,
                    run_stress: self.concurrent_stress_scale * base,
                    run_energy: base,
                    cross_check: base,
                }
            }
        }
    }

    /// Tolerance for reloaded state compared with the initial reference.
    pub fn reload(&self, epsilon: f64) -> f64 {
        epsilon
    }
}

/// Configuration shared by every scenario of a harness run.
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    /// Directory holding scenario scripts referenced by fixtures
    pub input_dir: PathBuf,
    /// Directory receiving restart, data and coefficient files
    pub work_dir: PathBuf,
    /// Print per-group error statistics even for passing runs
    pub print_stats: bool,
    /// Accelerated backend to compare against, `None` for serial only
    pub concurrent: Option<Backend>,
    /// Tolerance scale factors
    pub tolerance: ToleranceProfile,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from("."),
            work_dir: PathBuf::from("."),
            print_stats: false,
            concurrent: Some(Backend::Concurrent {
                package: DEFAULT_ACCELERATOR.to_string(),
                threads: DEFAULT_THREADS,
            }),
            tolerance: ToleranceProfile::default(),
        }
    }
}

impl HarnessConfig {
    /// Set the scenario script directory.
    pub fn with_input_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.input_dir = dir.as_ref().to_path_buf();
        self
    }

    /// Set the artifact directory.
    pub fn with_work_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.work_dir = dir.as_ref().to_path_buf();
        self
    }

    /// Always print error statistics.
    pub fn with_stats(mut self, print_stats: bool) -> Self {
        self.print_stats = print_stats;
        self
    }

    /// Compare against this accelerated backend.
    pub fn with_concurrent(mut self, backend: Backend) -> Self {
        self.concurrent = Some(backend);
        self
    }

    /// Run the serial scenarios only.
    pub fn serial_only(mut self) -> Self {
        self.concurrent = None;
        self
    }

    /// Change the worker count of the configured concurrent backend.
    pub fn with_threads(mut self, count: usize) -> Self {
        if let Some(Backend::Concurrent { threads, .. }) = &mut self.concurrent {
            *threads = count;
        }
        self
    }

    /// Replace the tolerance scale factors.
    pub fn with_tolerance(mut self, tolerance: ToleranceProfile) -> Self {
        self.tolerance = tolerance;
        self
    }
}
