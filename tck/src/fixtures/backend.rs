//! Engine capability interface.
//!
//! The harness never binds to an engine's object model. It scripts the engine
//! through textual commands and reads back a handful of live quantities, so
//! any implementation of [`Engine`] (the in-process reference engine, a wrapper
//! around an external build, or a test fake) can be driven by the same
//! scenario matrix.

use std::fmt;

use anyhow::Result;
use serde::Serialize;

use super::types::{AtomId, StyleKind, Vec3};
use crate::error::EngineError;

/// Force-evaluation backend the engine is created with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Backend {
    /// Plain single-worker evaluation
    Serial,
    /// Multi-worker evaluation provided by an accelerator package
    Concurrent {
        /// Package name, doubling as the style suffix (`omp` -> `harmonic/omp`)
        package: String,
        /// Worker count
        threads: usize,
    },
}

impl Backend {
    /// Suffix appended to style names when the backend is active.
    pub fn suffix(&self) -> Option<&str> {
        match self {
            Backend::Serial => None,
            Backend::Concurrent { package, .. } => Some(package),
        }
    }

    /// Worker count, 1 for serial.
    pub fn threads(&self) -> usize {
        match self {
            Backend::Serial => 1,
            Backend::Concurrent { threads, .. } => (*threads).max(1),
        }
    }

    /// Scenario label used in reports.
    pub fn label(&self) -> &'static str {
        match self {
            Backend::Serial => "plain",
            Backend::Concurrent { .. } => "concurrent",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Serial => write!(f, "serial"),
            Backend::Concurrent { package, threads } => write!(f, "{} x{}", package, threads),
        }
    }
}

/// Live state of the style instance under test.
#[derive(Debug, Clone, PartialEq)]
pub struct StyleState {
    /// Resolved style name, including any backend suffix
    pub name: String,
    /// Energy from the last evaluation
    pub energy: f64,
    /// Virial from the last evaluation, xx yy zz xy xz yz
    pub virial: [f64; 6],
    /// Whether coefficients survive a restart file
    pub writes_coeffs: bool,
}

/// Scriptable simulation engine.
///
/// Commands run synchronously; a command error is fatal for the scenario
/// that issued it but leaves the engine usable for inspection.
pub trait Engine {
    /// Execute one command line.
    fn command(&mut self, line: &str) -> std::result::Result<(), EngineError>;

    /// Whether a style of the given capability kind is registered.
    fn has_style(&self, kind: &str, name: &str) -> bool;

    /// Active style suffix, if the engine runs an accelerated backend.
    fn suffix(&self) -> Option<&str>;

    /// Engine build identification.
    fn version(&self) -> String;

    /// Global atom count.
    fn natoms(&self) -> usize;

    /// Atoms owned by this process.
    fn nlocal(&self) -> usize;

    /// Identifiers of the local atoms.
    fn atom_ids(&self) -> Vec<AtomId>;

    /// Forces of the local atoms, parallel to [`Engine::atom_ids`].
    fn forces(&self) -> Vec<Vec3>;

    /// Active style of the given kind, if any.
    fn style_state(&self, kind: StyleKind) -> Option<StyleState>;

    /// Current value of a global scalar compute.
    fn compute_scalar(&self, id: &str) -> Option<f64>;

    /// Dimensionality of a named coefficient exposed by the active style.
    fn extract(&self, kind: StyleKind, name: &str) -> Option<usize>;
}

/// Creates engine instances for a backend.
pub trait EngineFactory {
    /// Whether the backend is available in this engine build.
    fn backend_installed(&self, backend: &Backend) -> bool;

    /// Create a fresh engine instance.
    fn create(&self, backend: &Backend) -> Result<Box<dyn Engine>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_suffix_and_threads() {
        assert_eq!(Backend::Serial.suffix(), None);
        assert_eq!(Backend::Serial.threads(), 1);
        let omp = Backend::Concurrent {
            package: "omp".to_string(),
            threads: 4,
        };
        assert_eq!(omp.suffix(), Some("omp"));
        assert_eq!(omp.threads(), 4);
        assert_eq!(omp.label(), "concurrent");
        assert_eq!(omp.to_string(), "omp x4");
    }

    #[test]
    fn test_zero_threads_clamped() {
        let backend = Backend::Concurrent {
            package: "omp".to_string(),
            threads: 0,
        };
        assert_eq!(backend.threads(), 1);
    }
}
