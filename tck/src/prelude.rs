//! Prelude module for convenient imports
//!
//! Import everything you need with:
//! ```rust,ignore
//! use style_tck::prelude::*;
//! ```

// Configuration and reports
pub use crate::config::{HarnessConfig, ToleranceProfile};
pub use crate::report::{ScenarioOutcome, StyleReport, TestReport, TestStatus};
pub use crate::stats::ErrorStats;

// Fixtures and engines
pub use crate::fixtures::{
    generate_fixture, parse_fixture, parse_fixture_file, Backend, Bookkeeping, Engine,
    EngineDriver, EngineFactory, Generated, MatrixRunner, ReferenceEngineFactory, Setup, TestCase,
};

// Errors
pub use crate::error::{EngineError, FixtureError, ScenarioError};

// Re-export commonly used external types
pub use anyhow::{anyhow, Context, Result};
pub use std::path::{Path, PathBuf};
