//! Style Fixture Testing Framework
//!
//! Declarative regression testing of interaction styles. A fixture names:
//! 1. The style under test (kind, name, coefficients)
//! 2. The scenario script that builds the atom system
//! 3. Reference energy, stress and per-atom forces, before and after a short run
//! 4. A base tolerance
//!
//! The framework scripts an engine through every scenario and compares the
//! live quantities against the references.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Style Fixture Testing                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                               │
//! │  ┌─────────────────────────────────────────────────────────┐ │
//! │  │  Fixture YAML  ──▶  Parser  ──▶  MatrixRunner            │ │
//! │  └─────────────────────────────────────────────────────────┘ │
//! │                              │                                 │
//! │                              ▼                                 │
//! │  ┌─────────────────────────────────────────────────────────┐ │
//! │  │  EngineDriver: init | run | restart | data | teardown    │ │
//! │  └─────────────────────────────────────────────────────────┘ │
//! │              │                               │                │
//! │              ▼                               ▼                │
//! │  ┌──────────────────────┐       ┌──────────────────────┐     │
//! │  │  Serial backend      │       │  Concurrent backend  │     │
//! │  └──────────────────────┘       └──────────────────────┘     │
//! │              │                               │                │
//! │              ▼                               ▼                │
//! │  ┌─────────────────────────────────────────────────────────┐ │
//! │  │  Verification: Forces | Stress | Energy | Cross-check   │ │
//! │  └─────────────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use style_tck::fixtures::{MatrixRunner, ReferenceEngineFactory};
//! use style_tck::config::HarnessConfig;
//!
//! let config = HarnessConfig::default().with_input_dir("tck/inputs");
//! let factory = ReferenceEngineFactory::new();
//! let report = MatrixRunner::new(&factory, &config)
//!     .run_fixture_file(Path::new("tck/fixtures/bond-harmonic.yaml"))?;
//! assert_ne!(report.status(), TestStatus::Fail);
//! ```

pub mod backend;
pub mod backends;
pub mod driver;
pub mod parser;
/// Regression capture utility for regenerating fixture files from the engine
pub mod regression;
pub mod runner;
pub mod types;
pub mod verification;
pub mod writer;

// Re-export commonly used types
pub use backend::{Backend, Engine, EngineFactory, StyleState};
pub use backends::reference::{ReferenceEngine, ReferenceEngineFactory};
pub use driver::{EngineDriver, EngineHandle, Setup};
pub use parser::{load_fixtures_from_dir, parse_fixture, parse_fixture_file};
pub use regression::{capture, generate_fixture, regenerate_file, Capture, Generated};
pub use runner::MatrixRunner;
pub use types::{
    AtomId, Bookkeeping, ExtractDirective, ForceTable, Prerequisite, ScenarioResult, Snapshot,
    Stress, StyleKind, TestCase, Vec3,
};
pub use verification::{GroupCheck, Violation};
pub use writer::{to_yaml, write_yaml};
