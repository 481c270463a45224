//! Comparison of live engine state against reference values.
//!
//! Every comparison is absolute (`|actual - expected| <= tolerance`) and
//! feeds the shared [`ErrorStats`] whether it passes or not. Mismatches are
//! collected as [`Violation`]s rather than aborting, so one report lists all
//! of them.

use std::fmt;

use serde::Serialize;

use super::types::{ForceTable, ScenarioResult, Stress};
use crate::error::ScenarioError;
use crate::stats::{within_tolerance, ErrorStats};

/// One reference value the engine failed to reproduce.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Violation {
    /// Quantity group, e.g. `init_forces`
    pub group: String,
    /// Item inside the group, e.g. `atom 3 y` or `xx`
    pub item: String,
    /// Value reported by the engine
    pub actual: f64,
    /// Reference value
    pub expected: f64,
    /// Absolute difference
    pub abs_error: f64,
    /// Tolerance applied
    pub tolerance: f64,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}: expected {:.16e}, got {:.16e} (|err| {:.3e} > {:.3e})",
            self.group, self.item, self.expected, self.actual, self.abs_error, self.tolerance
        )
    }
}

/// Outcome of checking one quantity group.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupCheck {
    /// Quantity group name
    pub group: String,
    /// Tolerance applied to every item of the group
    pub tolerance: f64,
    /// Number of scalar comparisons performed
    pub compared: usize,
    /// Errors of this group alone
    pub stats: ErrorStats,
    /// Failed comparisons
    pub violations: Vec<Violation>,
    /// Check deliberately not performed for this style
    pub exempted: bool,
}

impl GroupCheck {
    fn new(group: &str, tolerance: f64) -> Self {
        Self {
            group: group.to_string(),
            tolerance,
            compared: 0,
            stats: ErrorStats::new(),
            violations: Vec::new(),
            exempted: false,
        }
    }

    /// A group that was skipped on purpose.
    pub fn exempt(group: &str) -> Self {
        Self {
            exempted: true,
            ..Self::new(group, 0.0)
        }
    }

    /// No violations.
    pub fn passed(&self) -> bool {
        self.violations.is_empty()
    }

    fn compare(
        &mut self,
        item: String,
        index: usize,
        actual: f64,
        expected: f64,
        tolerance: f64,
        stats: &mut ErrorStats,
    ) {
        let abs_error = (actual - expected).abs();
        stats.add(abs_error, index);
        self.stats.add(abs_error, index);
        self.compared += 1;
        if !within_tolerance(actual, expected, tolerance) {
            self.violations.push(Violation {
                group: self.group.clone(),
                item,
                actual,
                expected,
                abs_error,
                tolerance,
            });
        }
    }
}

/// Check the engine's atom bookkeeping before any per-atom comparison.
pub fn validate_atom_count(
    stage: &str,
    expected_natoms: usize,
    result: &ScenarioResult,
) -> Result<(), ScenarioError> {
    if result.natoms != expected_natoms {
        return Err(ScenarioError::AtomCount {
            stage: stage.to_string(),
            expected: expected_natoms,
            actual: result.natoms,
        });
    }
    if result.nlocal != result.natoms {
        return Err(ScenarioError::NotAllLocal {
            stage: stage.to_string(),
            natoms: result.natoms,
            nlocal: result.nlocal,
        });
    }
    Ok(())
}

/// Compare every local atom's force against the reference table.
///
/// Atoms are matched by identifier, never by position. An identifier the
/// reference does not know aborts the scenario.
pub fn compare_forces(
    group: &str,
    result: &ScenarioResult,
    expected: &ForceTable,
    tolerance: f64,
    stats: &mut ErrorStats,
) -> Result<GroupCheck, ScenarioError> {
    const AXES: [&str; 3] = ["x", "y", "z"];

    let mut check = GroupCheck::new(group, tolerance);
    for (id, force) in result.ids.iter().zip(&result.forces) {
        let reference = expected.get(id).ok_or_else(|| ScenarioError::UnknownAtom {
            group: group.to_string(),
            id: *id,
        })?;
        for axis in 0..3 {
            check.compare(
                format!("atom {} {}", id, AXES[axis]),
                *id as usize,
                force[axis],
                reference[axis],
                tolerance,
                stats,
            );
        }
    }
    Ok(check)
}

/// Compare the six stress components.
pub fn compare_stress(
    group: &str,
    actual: &Stress,
    expected: &Stress,
    tolerance: f64,
    stats: &mut ErrorStats,
) -> GroupCheck {
    let mut check = GroupCheck::new(group, tolerance);
    let actual = actual.to_array();
    let expected = expected.to_array();
    for (idx, label) in Stress::LABELS.iter().enumerate() {
        check.compare(
            label.to_string(),
            idx,
            actual[idx],
            expected[idx],
            tolerance,
            stats,
        );
    }
    check
}

/// Compare one energy value.
pub fn compare_energy(
    group: &str,
    actual: f64,
    expected: f64,
    tolerance: f64,
    stats: &mut ErrorStats,
) -> GroupCheck {
    let mut check = GroupCheck::new(group, tolerance);
    check.compare("energy".to_string(), 0, actual, expected, tolerance, stats);
    check
}
