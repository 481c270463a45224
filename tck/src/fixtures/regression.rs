//! Regression capture: regenerate golden values from the current engine.
//!
//! A fixture's metadata (tolerance, prerequisites, commands, scenario file,
//! extraction directives) is carried over unchanged. Only the reference
//! snapshots, the atom count, the engine version and the generation date are
//! refreshed. Capturing runs the serial symmetric-on path once.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use super::backend::{Backend, EngineFactory};
use super::driver::{EngineDriver, Setup};
use super::parser::parse_fixture_file;
use super::types::{Bookkeeping, Prerequisite, TestCase};
use super::verification::validate_atom_count;
use super::writer::write_yaml;
use crate::config::HarnessConfig;
use crate::error::ScenarioError;

/// Timestamp layout of `date_generated`, e.g. `Fri Oct 16 09:41:07 2026`.
const DATE_FORMAT: &str = "%a %b %e %H:%M:%S %Y";

/// Outcome of capturing reference values.
#[derive(Debug, Clone, PartialEq)]
pub enum Capture {
    /// Test case with refreshed golden values
    Captured(TestCase),
    /// Prerequisites the engine lacks; nothing was run
    Skipped(Vec<Prerequisite>),
}

/// Outcome of regenerating a fixture file.
#[derive(Debug, Clone, PartialEq)]
pub enum Generated {
    /// Fixture written to this path
    Written(PathBuf),
    /// Prerequisites the engine lacks; nothing was written
    Skipped(Vec<Prerequisite>),
}

/// Run the setup and the short trajectory once and record both snapshots.
pub fn capture(
    template: &TestCase,
    factory: &dyn EngineFactory,
    config: &HarnessConfig,
) -> std::result::Result<Capture, ScenarioError> {
    let driver = EngineDriver::new(factory, config);
    let mut handle =
        match driver.initialize(template, &Backend::Serial, Bookkeeping::SymmetricOn)? {
            Setup::Ready(handle) => handle,
            Setup::Skipped(missing) => return Ok(Capture::Skipped(missing)),
        };

    // the engine defines the atom count, so only ownership is checked here
    let init = driver.snapshot(&handle, template)?;
    if init.nlocal != init.natoms {
        return Err(ScenarioError::NotAllLocal {
            stage: "init".to_string(),
            natoms: init.natoms,
            nlocal: init.nlocal,
        });
    }
    driver.advance(&mut handle)?;
    let run = driver.snapshot(&handle, template)?;
    validate_atom_count("run", init.natoms, &run)?;

    let mut case = template.clone();
    case.engine_version = Some(handle.engine().version());
    case.date_generated = Some(chrono::Local::now().format(DATE_FORMAT).to_string());
    case.natoms = init.natoms;
    case.init = init.to_snapshot();
    case.run = run.to_snapshot();

    driver.teardown(handle);
    Ok(Capture::Captured(case))
}

/// Capture a test case and write the result to `output`.
pub fn generate_fixture(
    template: &TestCase,
    output: &Path,
    factory: &dyn EngineFactory,
    config: &HarnessConfig,
) -> Result<Generated> {
    let case = match capture(template, factory, config)
        .with_context(|| format!("Failed to capture reference values for {}", template.basename))?
    {
        Capture::Captured(case) => case,
        Capture::Skipped(missing) => {
            let list: Vec<String> = missing.iter().map(|p| p.to_string()).collect();
            log::warn!(
                "{}: not generated, missing prerequisites: {}",
                template.basename,
                list.join(", ")
            );
            return Ok(Generated::Skipped(missing));
        }
    };

    write_yaml(&case, output)?;
    log::info!(
        "wrote {} ({} atoms, init energy {:e})",
        output.display(),
        case.natoms,
        case.init.energy
    );
    Ok(Generated::Written(output.to_path_buf()))
}

/// Regenerate a fixture file, in place unless `output` is given.
pub fn regenerate_file(
    input: &Path,
    output: Option<&Path>,
    factory: &dyn EngineFactory,
    config: &HarnessConfig,
) -> Result<Generated> {
    let template = parse_fixture_file(input)?;
    generate_fixture(&template, output.unwrap_or(input), factory, config)
}
