//! Core types for style fixtures.
//!
//! A fixture describes one interaction style under test: how to set it up
//! inside the engine and the golden forces, energy and stress it must
//! reproduce before and after a short trajectory.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Stable, 1-based atom identifier as reported by the engine.
pub type AtomId = u64;

/// Cartesian 3-vector.
pub type Vec3 = [f64; 3];

/// Per-atom forces keyed by atom identifier.
pub type ForceTable = BTreeMap<AtomId, Vec3>;

/// Category of the interaction style under test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StyleKind {
    /// Non-bonded pairwise styles
    Pair,
    /// Two-body bonded styles
    Bond,
    /// Three-body bonded styles
    Angle,
    /// Four-body bonded styles (proper torsions)
    Dihedral,
    /// Four-body bonded styles (out-of-plane)
    Improper,
}

impl StyleKind {
    /// Every style kind, in fixture key order.
    pub const ALL: [StyleKind; 5] = [
        StyleKind::Pair,
        StyleKind::Bond,
        StyleKind::Angle,
        StyleKind::Dihedral,
        StyleKind::Improper,
    ];

    /// Lowercase name used in commands and capability queries.
    pub fn as_str(&self) -> &'static str {
        match self {
            StyleKind::Pair => "pair",
            StyleKind::Bond => "bond",
            StyleKind::Angle => "angle",
            StyleKind::Dihedral => "dihedral",
            StyleKind::Improper => "improper",
        }
    }

    /// Fixture key and command verb declaring the style.
    pub fn style_key(&self) -> &'static str {
        match self {
            StyleKind::Pair => "pair_style",
            StyleKind::Bond => "bond_style",
            StyleKind::Angle => "angle_style",
            StyleKind::Dihedral => "dihedral_style",
            StyleKind::Improper => "improper_style",
        }
    }

    /// Fixture key and command verb assigning coefficients.
    pub fn coeff_key(&self) -> &'static str {
        match self {
            StyleKind::Pair => "pair_coeff",
            StyleKind::Bond => "bond_coeff",
            StyleKind::Angle => "angle_coeff",
            StyleKind::Dihedral => "dihedral_coeff",
            StyleKind::Improper => "improper_coeff",
        }
    }

    /// Script variable carrying the action/reaction bookkeeping flag.
    pub fn newton_variable(&self) -> &'static str {
        match self {
            StyleKind::Pair => "newton_pair",
            _ => "newton_bond",
        }
    }

    /// Resolve a `<kind>_style` fixture key.
    pub fn from_style_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.style_key() == key)
    }

    /// Resolve a `<kind>_coeff` fixture key.
    pub fn from_coeff_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.coeff_key() == key)
    }
}

impl fmt::Display for StyleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StyleKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| format!("unknown style kind '{}'", s))
    }
}

/// Action/reaction bookkeeping mode for the style evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Bookkeeping {
    /// Each term computed once, equal and opposite contributions applied
    SymmetricOn,
    /// Contributions accumulated per owning atom
    SymmetricOff,
}

impl Bookkeeping {
    /// Value assigned to the newton script variable.
    pub fn flag(&self) -> &'static str {
        match self {
            Bookkeeping::SymmetricOn => "on",
            Bookkeeping::SymmetricOff => "off",
        }
    }
}

impl fmt::Display for Bookkeeping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "newton {}", self.flag())
    }
}

/// Six-component symmetric stress (virial) tensor.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Stress {
    /// xx component
    pub xx: f64,
    /// yy component
    pub yy: f64,
    /// zz component
    pub zz: f64,
    /// xy component
    pub xy: f64,
    /// xz component
    pub xz: f64,
    /// yz component
    pub yz: f64,
}

impl Stress {
    /// Component labels in fixture order.
    pub const LABELS: [&'static str; 6] = ["xx", "yy", "zz", "xy", "xz", "yz"];

    /// Build from a virial array in xx, yy, zz, xy, xz, yz order.
    pub fn from_array(v: [f64; 6]) -> Self {
        Self {
            xx: v[0],
            yy: v[1],
            zz: v[2],
            xy: v[3],
            xz: v[4],
            yz: v[5],
        }
    }

    /// Components in xx, yy, zz, xy, xz, yz order.
    pub fn to_array(&self) -> [f64; 6] {
        [self.xx, self.yy, self.zz, self.xy, self.xz, self.yz]
    }
}

/// Energy, stress and forces captured at one instant.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Snapshot {
    /// Style energy
    pub energy: f64,
    /// Style virial
    pub stress: Stress,
    /// Per-atom forces
    pub forces: ForceTable,
}

/// A capability that must be registered in the engine before running.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Prerequisite {
    /// Capability category (`atom`, `bond`, `pair`, ...)
    pub kind: String,
    /// Required style name within that category
    pub style: String,
}

impl fmt::Display for Prerequisite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_style {}", self.kind, self.style)
    }
}

/// Named coefficient the style must expose through data extraction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtractDirective {
    /// Coefficient name
    pub name: String,
    /// Expected dimensionality (0 scalar, 1 per type, 2 per type pair)
    pub dim: usize,
}

/// One style test case: setup, tolerance and golden results.
#[derive(Debug, Clone, PartialEq)]
pub struct TestCase {
    /// Engine version that generated the golden values
    pub engine_version: Option<String>,
    /// When the golden values were generated
    pub date_generated: Option<String>,
    /// Base absolute tolerance
    pub epsilon: f64,
    /// Capabilities required before the scenario may run
    pub prerequisites: Vec<Prerequisite>,
    /// Commands issued before the scenario file is loaded
    pub pre_commands: Vec<String>,
    /// Commands issued after the style is applied
    pub post_commands: Vec<String>,
    /// Scenario file, relative to the input directory
    pub input_file: String,
    /// Category of the style under test
    pub style_kind: StyleKind,
    /// Style declaration (name plus global arguments)
    pub style_name: String,
    /// Coefficient assignments, applied in order
    pub style_coeffs: Vec<String>,
    /// Data extraction directives
    pub extract: Vec<ExtractDirective>,
    /// Number of atoms in the scenario
    pub natoms: usize,
    /// Reference snapshot right after setup
    pub init: Snapshot,
    /// Reference snapshot after the short trajectory
    pub run: Snapshot,
    /// Basename for persistence artifacts
    pub basename: String,
}

impl TestCase {
    /// Whether the style under test is a composite dispatching to sub-styles.
    pub fn is_hybrid(&self) -> bool {
        self.style_name.starts_with("hybrid")
    }

    /// Bare style name without global arguments.
    pub fn style_base_name(&self) -> &str {
        self.style_name
            .split_whitespace()
            .next()
            .unwrap_or(&self.style_name)
    }

    /// Command declaring the style.
    pub fn style_command(&self) -> String {
        format!("{} {}", self.style_kind.style_key(), self.style_name)
    }

    /// Commands assigning every coefficient line, in fixture order.
    pub fn coeff_commands(&self) -> Vec<String> {
        self.style_coeffs
            .iter()
            .map(|line| format!("{} {}", self.style_kind.coeff_key(), line))
            .collect()
    }
}

/// Live engine state read back for one scenario stage.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ScenarioResult {
    /// Global atom count reported by the engine
    pub natoms: usize,
    /// Atoms owned by this process
    pub nlocal: usize,
    /// Identifiers of the local atoms, parallel to `forces`
    pub ids: Vec<AtomId>,
    /// Forces of the local atoms
    pub forces: Vec<Vec3>,
    /// Style energy
    pub energy: f64,
    /// Style virial
    pub stress: Stress,
}

impl ScenarioResult {
    /// Re-key local forces by atom identifier.
    pub fn force_table(&self) -> ForceTable {
        self.ids
            .iter()
            .copied()
            .zip(self.forces.iter().copied())
            .collect()
    }

    /// Convert into a snapshot suitable for writing into a fixture.
    pub fn to_snapshot(&self) -> Snapshot {
        Snapshot {
            energy: self.energy,
            stress: self.stress,
            forces: self.force_table(),
        }
    }
}
