//! Atoms, topology and masses of the reference engine.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::fixtures::types::{AtomId, StyleKind, Vec3};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct Atom {
    pub id: AtomId,
    pub atom_type: usize,
    pub x: Vec3,
    pub v: Vec3,
}

/// A bonded term: its type and the atom identifiers it connects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct Bonded {
    pub term_type: usize,
    pub atoms: Vec<AtomId>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub(crate) struct System {
    pub atoms: Vec<Atom>,
    pub atom_types: usize,
    pub bond_types: usize,
    pub angle_types: usize,
    pub masses: BTreeMap<usize, f64>,
    pub bonds: Vec<Bonded>,
    pub angles: Vec<Bonded>,
}

impl System {
    /// Number of term types declared for a style kind.
    pub fn types_for(&self, kind: StyleKind) -> usize {
        match kind {
            StyleKind::Bond => self.bond_types,
            StyleKind::Angle => self.angle_types,
            _ => 0,
        }
    }

    /// Terms evaluated by a style of the given kind.
    pub fn terms_for(&self, kind: StyleKind) -> &[Bonded] {
        match kind {
            StyleKind::Bond => &self.bonds,
            StyleKind::Angle => &self.angles,
            _ => &[],
        }
    }

    /// Map from atom identifier to storage index.
    pub fn index(&self) -> HashMap<AtomId, usize> {
        self.atoms
            .iter()
            .enumerate()
            .map(|(idx, atom)| (atom.id, idx))
            .collect()
    }

    pub fn positions(&self) -> Vec<Vec3> {
        self.atoms.iter().map(|a| a.x).collect()
    }

    /// Check that atom ids are unique, types are declared and every term
    /// references existing atoms.
    pub fn validate(&self) -> Result<(), String> {
        let index = self.index();
        if index.len() != self.atoms.len() {
            return Err("duplicate atom identifiers".to_string());
        }
        if let Some(atom) = self
            .atoms
            .iter()
            .find(|a| a.atom_type == 0 || a.atom_type > self.atom_types)
        {
            return Err(format!(
                "atom {} has invalid type {}",
                atom.id, atom.atom_type
            ));
        }
        for (label, terms, ntypes, width) in [
            ("bond", &self.bonds, self.bond_types, 2),
            ("angle", &self.angles, self.angle_types, 3),
        ] {
            for term in terms {
                if term.term_type == 0 || term.term_type > ntypes {
                    return Err(format!("{} has invalid type {}", label, term.term_type));
                }
                if term.atoms.len() != width {
                    return Err(format!("{} needs {} atoms", label, width));
                }
                if let Some(id) = term.atoms.iter().find(|id| !index.contains_key(*id)) {
                    return Err(format!("{} references unknown atom {}", label, id));
                }
            }
        }
        Ok(())
    }

    /// Per-atom inverse masses, required before integrating.
    pub fn inverse_masses(&self) -> Result<Vec<f64>, EngineError> {
        self.atoms
            .iter()
            .map(|atom| match self.masses.get(&atom.atom_type) {
                Some(m) if *m > 0.0 => Ok(1.0 / m),
                _ => Err(EngineError::NotReady(format!(
                    "no mass set for atom type {}",
                    atom.atom_type
                ))),
            })
            .collect()
    }
}
