//! The two persistence formats of the reference engine.
//!
//! Restart files are a JSON image of the full engine state, including the
//! declared styles and (for styles that write them) their coefficients. Data
//! files are sectioned text holding atoms, velocities and topology only; they
//! never carry style information, so a reload must reapply coefficients.

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::styles::StyleInstance;
use super::system::{Atom, Bonded, System};
use crate::error::EngineError;
use crate::fixtures::types::{AtomId, StyleKind};

const RESTART_FORMAT: &str = "style-tck-restart-v1";

/// A declared style as stored in a restart file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct RestartStyle {
    pub kind: StyleKind,
    pub declared: String,
    /// Absent when the style does not write its coefficients
    pub coeffs: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct RestartImage {
    pub format: String,
    pub units: String,
    pub atom_style: String,
    pub newton_pair: bool,
    pub newton_bond: bool,
    pub timestep: f64,
    pub step: u64,
    pub system: System,
    pub styles: Vec<RestartStyle>,
}

impl RestartImage {
    pub fn style_entry(style: &StyleInstance) -> RestartStyle {
        RestartStyle {
            kind: style.kind,
            declared: style.declared.clone(),
            coeffs: style
                .writes_coeffs()
                .then(|| style.coeff_lines.clone()),
        }
    }

    pub fn format_tag() -> String {
        RESTART_FORMAT.to_string()
    }
}

fn io_error(path: &Path, reason: impl ToString) -> EngineError {
    EngineError::Io {
        path: path.display().to_string(),
        reason: reason.to_string(),
    }
}

pub(crate) fn write_restart(path: &Path, image: &RestartImage) -> Result<(), EngineError> {
    let json = serde_json::to_string_pretty(image).map_err(|e| io_error(path, e))?;
    std::fs::write(path, json).map_err(|e| io_error(path, e))
}

pub(crate) fn read_restart(path: &Path) -> Result<RestartImage, EngineError> {
    let text = std::fs::read_to_string(path).map_err(|e| io_error(path, e))?;
    let image: RestartImage = serde_json::from_str(&text).map_err(|e| io_error(path, e))?;
    if image.format != RESTART_FORMAT {
        return Err(io_error(
            path,
            format!("not a restart file (format '{}')", image.format),
        ));
    }
    Ok(image)
}

/// Write atoms, velocities and topology. Coefficients are never written.
pub(crate) fn write_data(path: &Path, system: &System) -> Result<(), EngineError> {
    std::fs::write(path, format_data(system)).map_err(|e| io_error(path, e))
}

/// Data file text: header counts, masses, atoms, velocities and topology.
fn format_data(system: &System) -> String {
    let mut out = String::from("style-tck data file\n\n");
    out.push_str(&format!("{} atoms\n", system.atoms.len()));
    out.push_str(&format!("{} bonds\n", system.bonds.len()));
    out.push_str(&format!("{} angles\n", system.angles.len()));
    out.push_str(&format!("{} atom types\n", system.atom_types));
    out.push_str(&format!("{} bond types\n", system.bond_types));
    out.push_str(&format!("{} angle types\n", system.angle_types));

    if !system.masses.is_empty() {
        out.push_str("\nMasses\n\n");
        for (t, m) in &system.masses {
            out.push_str(&format!("{} {:e}\n", t, m));
        }
    }

    out.push_str("\nAtoms\n\n");
    for atom in &system.atoms {
        out.push_str(&format!(
            "{} {} {:e} {:e} {:e}\n",
            atom.id, atom.atom_type, atom.x[0], atom.x[1], atom.x[2]
        ));
    }

    out.push_str("\nVelocities\n\n");
    for atom in &system.atoms {
        out.push_str(&format!(
            "{} {:e} {:e} {:e}\n",
            atom.id, atom.v[0], atom.v[1], atom.v[2]
        ));
    }

    for (label, terms) in [("Bonds", &system.bonds), ("Angles", &system.angles)] {
        if terms.is_empty() {
            continue;
        }
        out.push_str(&format!("\n{}\n\n", label));
        for (n, term) in terms.iter().enumerate() {
            let ids: Vec<String> = term.atoms.iter().map(|id| id.to_string()).collect();
            out.push_str(&format!("{} {} {}\n", n + 1, term.term_type, ids.join(" ")));
        }
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum DataSection {
    Header,
    Masses,
    Atoms,
    Velocities,
    Bonds,
    Angles,
}

/// Header counts declared at the top of a data file.
#[derive(Debug, Default)]
struct DataCounts {
    atoms: usize,
    bonds: usize,
    angles: usize,
}

pub(crate) fn read_data(path: &Path) -> Result<System, EngineError> {
    let text = std::fs::read_to_string(path).map_err(|e| io_error(path, e))?;
    parse_data(&text).map_err(|reason| io_error(path, reason))
}

fn parse_data(text: &str) -> Result<System, String> {
    let mut system = System::default();
    let mut counts = DataCounts::default();
    let mut section = DataSection::Header;

    // First line is a free-form title
    for (lineno, raw) in text.lines().enumerate().skip(1) {
        let line = raw.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }
        let next = match line {
            "Masses" => Some(DataSection::Masses),
            "Atoms" => Some(DataSection::Atoms),
            "Velocities" => Some(DataSection::Velocities),
            "Bonds" => Some(DataSection::Bonds),
            "Angles" => Some(DataSection::Angles),
            _ => None,
        };
        if let Some(next) = next {
            section = next;
            continue;
        }

        let fields: Vec<&str> = line.split_whitespace().collect();
        let at = |what: &str| format!("line {}: {}", lineno + 1, what);
        let int = |s: &str| {
            s.parse::<u64>()
                .map_err(|_| at(&format!("invalid integer '{}'", s)))
        };
        let float = |s: &str| {
            s.parse::<f64>()
                .map_err(|_| at(&format!("invalid number '{}'", s)))
        };
        let want = |n: usize| {
            if fields.len() == n {
                Ok(())
            } else {
                Err(at(&format!("expected {} fields, found {}", n, fields.len())))
            }
        };

        match section {
            DataSection::Header => {
                let count = int(fields[0])? as usize;
                match fields[1..].join(" ").as_str() {
                    "atoms" => counts.atoms = count,
                    "bonds" => counts.bonds = count,
                    "angles" => counts.angles = count,
                    "atom types" => system.atom_types = count,
                    "bond types" => system.bond_types = count,
                    "angle types" => system.angle_types = count,
                    other => return Err(at(&format!("unknown header '{}'", other))),
                }
            }
            DataSection::Masses => {
                want(2)?;
                system
                    .masses
                    .insert(int(fields[0])? as usize, float(fields[1])?);
            }
            DataSection::Atoms => {
                want(5)?;
                system.atoms.push(Atom {
                    id: int(fields[0])?,
                    atom_type: int(fields[1])? as usize,
                    x: [float(fields[2])?, float(fields[3])?, float(fields[4])?],
                    v: [0.0; 3],
                });
            }
            DataSection::Velocities => {
                want(4)?;
                let id: AtomId = int(fields[0])?;
                let atom = system
                    .atoms
                    .iter_mut()
                    .find(|a| a.id == id)
                    .ok_or_else(|| at(&format!("velocity for unknown atom {}", id)))?;
                atom.v = [float(fields[1])?, float(fields[2])?, float(fields[3])?];
            }
            DataSection::Bonds | DataSection::Angles => {
                let width = if section == DataSection::Bonds { 2 } else { 3 };
                want(2 + width)?;
                let term = Bonded {
                    term_type: int(fields[1])? as usize,
                    atoms: fields[2..]
                        .iter()
                        .map(|s| int(s.trim()))
                        .collect::<Result<Vec<_>, _>>()?,
                };
                if section == DataSection::Bonds {
                    system.bonds.push(term);
                } else {
                    system.angles.push(term);
                }
            }
        }
    }

    for (label, declared, found) in [
        ("atoms", counts.atoms, system.atoms.len()),
        ("bonds", counts.bonds, system.bonds.len()),
        ("angles", counts.angles, system.angles.len()),
    ] {
        if declared != found {
            return Err(format!(
                "header declares {} {} but {} were listed",
                declared, label, found
            ));
        }
    }
    system.validate()?;
    Ok(system)
}

/// Write the coefficient commands needed to rebuild the active styles.
pub(crate) fn write_coeff<'a>(
    path: &Path,
    styles: impl Iterator<Item = &'a StyleInstance>,
) -> Result<(), EngineError> {
    std::fs::write(path, format_coeff(styles)).map_err(|e| io_error(path, e))
}

fn format_coeff<'a>(styles: impl Iterator<Item = &'a StyleInstance>) -> String {
    let mut out = String::from("# style coefficients\n");
    for style in styles {
        out.push_str(&format!("{} {}\n", style.kind.style_key(), style.declared));
        for line in &style.coeff_lines {
            out.push_str(&format!("{} {}\n", style.kind.coeff_key(), line));
        }
    }
    out
}
