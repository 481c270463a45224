//! # Style-TCK: Technology Compatibility Kit for interaction styles
//!
//! Differential regression harness for the pluggable interaction styles of
//! a molecular simulation engine. Each style is pinned by a YAML fixture
//! holding reference energy, stress and per-atom forces; the harness replays
//! the fixture through a scenario matrix and reports every deviation.
//!
//! ## Scenario Matrix
//!
//! - **plain**: serial backend, symmetric bookkeeping on and off, reload from
//!   restart and from data files
//! - **concurrent**: accelerated backend, both bookkeeping modes, scaled
//!   tolerances
//! - **extract**: coefficient extraction by name and dimension
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use style_tck::prelude::*;
//!
//! let config = HarnessConfig::default().with_input_dir("tck/inputs");
//! let factory = ReferenceEngineFactory::new();
//! let report = MatrixRunner::new(&factory, &config)
//!     .run_paths(&[PathBuf::from("tck/fixtures")])?;
//! report.print_summary(config.print_stats);
//! ```
//!
//! ## Design Principles
//!
//! 1. **Engine as a capability**: the harness scripts any [`fixtures::Engine`]
//!    through text commands, never through its internals
//! 2. **Skip is not failure**: missing capabilities are reported separately
//! 3. **Collect, don't abort**: every tolerance violation is listed with its
//!    statistics
//! 4. **No leftovers**: persistence artifacts are owned by a scope guard

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Harness configuration (directories, backends, tolerance scaling)
pub mod config;

/// Error types for fixtures, engines and scenarios
pub mod error;

/// Fixture codec, engine driver, scenario matrix and regression capture
pub mod fixtures;

/// Convenient re-exports for common usage
pub mod prelude;

/// Test reports: JSON, JUnit XML and console summary
pub mod report;

/// Running error statistics
pub mod stats;

// =============================================================================
// Re-exports
// =============================================================================

pub use config::{HarnessConfig, ToleranceProfile};
pub use error::{EngineError, FixtureError, ScenarioError};
pub use report::{ScenarioOutcome, StyleReport, TestReport, TestStatus};
pub use stats::ErrorStats;

// =============================================================================
// Version Information
// =============================================================================

/// TCK version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Framework version descriptor
pub const TCK_VERSION: &str = "Style-TCK V1.0";
