//! Reference engine: an in-process [`Engine`] for bonded styles.
//!
//! Small, deterministic and fast. It understands the command subset the
//! harness scripts (variables, includes, style and coefficient commands,
//! short runs, both persistence formats) and evaluates a handful of bond and
//! angle styles, with `/omp` variants that evaluate on worker threads.

mod commands;
mod forces;
mod persist;
mod styles;
mod system;

use std::collections::BTreeMap;

use anyhow::{bail, Result};
use indexmap::IndexMap;

use self::forces::{evaluate_style, Accumulator};
use self::styles::StyleInstance;
use self::system::System;
use crate::error::EngineError;
use crate::fixtures::backend::{Backend, Engine, EngineFactory, StyleState};
use crate::fixtures::types::{AtomId, StyleKind, Vec3};

/// Accelerator package the reference engine provides.
pub const ACCELERATOR_PACKAGE: &str = "omp";

const DEFAULT_TIMESTEP: f64 = 0.001;

/// Diagnostic computes.
#[derive(Debug, Clone, PartialEq)]
enum Compute {
    PeAtom,
    ReduceSum { source: String },
}

/// In-memory engine instance.
#[derive(Debug)]
pub struct ReferenceEngine {
    backend: Backend,
    variables: IndexMap<String, String>,
    units: String,
    atom_style: String,
    newton_pair: bool,
    newton_bond: bool,
    timestep: f64,
    step: u64,
    system: System,
    styles: BTreeMap<StyleKind, StyleInstance>,
    fixes: IndexMap<String, String>,
    computes: IndexMap<String, Compute>,
    forces: Vec<Vec3>,
    eatom: Vec<f64>,
    include_depth: usize,
}

impl ReferenceEngine {
    /// Create an empty engine for the given backend.
    pub fn new(backend: Backend) -> Self {
        Self {
            backend,
            variables: IndexMap::new(),
            units: "lj".to_string(),
            atom_style: "atomic".to_string(),
            newton_pair: true,
            newton_bond: true,
            timestep: DEFAULT_TIMESTEP,
            step: 0,
            system: System::default(),
            styles: BTreeMap::new(),
            fixes: IndexMap::new(),
            computes: IndexMap::new(),
            forces: Vec::new(),
            eatom: Vec::new(),
            include_depth: 0,
        }
    }

    /// Current value of a script variable.
    pub fn variable(&self, name: &str) -> Option<&str> {
        self.variables.get(name).map(String::as_str)
    }

    /// Reset everything except variables, like a fresh instance that kept
    /// its script variables.
    fn clear(&mut self) {
        let variables = std::mem::take(&mut self.variables);
        let include_depth = self.include_depth;
        *self = Self::new(self.backend.clone());
        self.variables = variables;
        self.include_depth = include_depth;
    }

    fn reset_per_atom(&mut self) {
        let n = self.system.atoms.len();
        self.forces = vec![[0.0; 3]; n];
        self.eatom = vec![0.0; n];
    }

    /// Evaluate every active style and store forces, per-atom energy and the
    /// per-style energy and virial.
    fn evaluate(&mut self) -> Result<(), EngineError> {
        let n = self.system.atoms.len();
        let index = self.system.index();
        let threads = self.backend.threads();
        let mut total = Accumulator::new(n);

        for (kind, style) in self.styles.iter_mut() {
            let newton = match kind {
                StyleKind::Pair => self.newton_pair,
                _ => self.newton_bond,
            };
            let acc = evaluate_style(style, &self.system, &index, newton, threads)?;
            style.energy = acc.energy;
            style.virial = acc.virial;
            total.absorb(&acc);
        }

        self.forces = total.forces;
        self.eatom = total.eatom;
        Ok(())
    }

    /// Velocity-Verlet integration for `steps` steps; `run 0` only evaluates.
    fn run(&mut self, steps: u64) -> Result<(), EngineError> {
        if self.system.atoms.is_empty() {
            return Err(EngineError::NotReady("no atoms defined".to_string()));
        }
        self.evaluate()?;
        if steps == 0 {
            return Ok(());
        }

        let integrate = !self.fixes.is_empty();
        let inv_mass = if integrate {
            self.system.inverse_masses()?
        } else {
            Vec::new()
        };
        let dtf = 0.5 * self.timestep;
        let dtv = self.timestep;

        for _ in 0..steps {
            if integrate {
                for (i, atom) in self.system.atoms.iter_mut().enumerate() {
                    for axis in 0..3 {
                        atom.v[axis] += dtf * self.forces[i][axis] * inv_mass[i];
                        atom.x[axis] += dtv * atom.v[axis];
                    }
                }
            }
            self.evaluate()?;
            if integrate {
                for (i, atom) in self.system.atoms.iter_mut().enumerate() {
                    for axis in 0..3 {
                        atom.v[axis] += dtf * self.forces[i][axis] * inv_mass[i];
                    }
                }
            }
            self.step += 1;
        }
        Ok(())
    }
}

impl Engine for ReferenceEngine {
    fn command(&mut self, line: &str) -> std::result::Result<(), EngineError> {
        self.execute(line)
    }

    fn has_style(&self, kind: &str, name: &str) -> bool {
        styles::registered(kind, name)
    }

    fn suffix(&self) -> Option<&str> {
        self.backend.suffix()
    }

    fn version(&self) -> String {
        format!("style-tck reference engine {}", env!("CARGO_PKG_VERSION"))
    }

    fn natoms(&self) -> usize {
        self.system.atoms.len()
    }

    fn nlocal(&self) -> usize {
        self.system.atoms.len()
    }

    fn atom_ids(&self) -> Vec<AtomId> {
        self.system.atoms.iter().map(|a| a.id).collect()
    }

    fn forces(&self) -> Vec<Vec3> {
        self.forces.clone()
    }

    fn style_state(&self, kind: StyleKind) -> Option<StyleState> {
        self.styles.get(&kind).map(|style| StyleState {
            name: style.name.clone(),
            energy: style.energy,
            virial: style.virial,
            writes_coeffs: style.writes_coeffs(),
        })
    }

    fn compute_scalar(&self, id: &str) -> Option<f64> {
        match self.computes.get(id)? {
            Compute::ReduceSum { source } => match self.computes.get(source)? {
                Compute::PeAtom => Some(self.eatom.iter().sum()),
                Compute::ReduceSum { .. } => None,
            },
            Compute::PeAtom => None,
        }
    }

    fn extract(&self, kind: StyleKind, name: &str) -> Option<usize> {
        self.styles.get(&kind)?.extract(name)
    }
}

/// Factory for [`ReferenceEngine`] instances.
#[derive(Debug, Clone, Default)]
pub struct ReferenceEngineFactory;

impl ReferenceEngineFactory {
    /// Create a new factory.
    pub fn new() -> Self {
        Self
    }
}

impl EngineFactory for ReferenceEngineFactory {
    fn backend_installed(&self, backend: &Backend) -> bool {
        match backend {
            Backend::Serial => true,
            Backend::Concurrent { package, .. } => package == ACCELERATOR_PACKAGE,
        }
    }

    fn create(&self, backend: &Backend) -> Result<Box<dyn Engine>> {
        if !self.backend_installed(backend) {
            bail!("backend {} is not available in the reference engine", backend);
        }
        Ok(Box::new(ReferenceEngine::new(backend.clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DATA: &str = "two atoms\n\n2 atoms\n1 bonds\n1 atom types\n1 bond types\n\n\
        Masses\n\n1 1.0\n\nAtoms\n\n1 1 0.0 0.0 0.0\n2 1 0.0 1.5 0.0\n\nBonds\n\n1 1 1 2\n";

    fn engine_with_bond(dir: &std::path::Path, backend: Backend) -> ReferenceEngine {
        let data = dir.join("data.pair");
        std::fs::write(&data, DATA).unwrap();
        let mut engine = ReferenceEngine::new(backend);
        engine.command("atom_style bond").unwrap();
        engine
            .command(&format!("read_data {}", data.display()))
            .unwrap();
        engine.command("bond_style harmonic").unwrap();
        engine.command("bond_coeff 1 1.5 1.0").unwrap();
        engine
    }

    #[test]
    fn test_two_atom_harmonic_is_exact() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = engine_with_bond(dir.path(), Backend::Serial);
        engine.command("run 0 post no").unwrap();
        assert_eq!(engine.atom_ids(), vec![1, 2]);
        assert_eq!(engine.forces()[0][1], 1.5);
        assert_eq!(engine.forces()[1][1], -1.5);
        let state = engine.style_state(StyleKind::Bond).unwrap();
        assert_eq!(state.energy, 0.375);
        assert_eq!(state.virial[1], -2.25);
        assert_eq!(state.name, "harmonic");
    }

    #[test]
    fn test_run_moves_atoms_and_cross_check() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = engine_with_bond(dir.path(), Backend::Serial);
        for line in [
            "fix 1 all nve",
            "compute pe all pe/atom",
            "compute sum all reduce sum c_pe",
            "thermo_style custom step temp pe press c_sum",
            "thermo 2",
            "run 4 post no",
        ] {
            engine.command(line).unwrap();
        }
        let state = engine.style_state(StyleKind::Bond).unwrap();
        assert!(state.energy < 0.375);
        let sum = engine.compute_scalar("sum").unwrap();
        assert!((sum - state.energy).abs() < 1e-15);
        assert_eq!(engine.compute_scalar("pe"), None);
    }

    #[test]
    fn test_clear_keeps_variables() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = engine_with_bond(dir.path(), Backend::Serial);
        engine.command("variable newton_bond index off").unwrap();
        engine.command("variable newton_bond index on").unwrap();
        assert_eq!(engine.variable("newton_bond"), Some("off"));
        engine.command("clear").unwrap();
        assert_eq!(engine.natoms(), 0);
        assert!(engine.style_state(StyleKind::Bond).is_none());
        assert_eq!(engine.variable("newton_bond"), Some("off"));
        engine.command("variable newton_bond delete").unwrap();
        assert_eq!(engine.variable("newton_bond"), None);
    }

    #[test]
    fn test_restart_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = engine_with_bond(dir.path(), Backend::Serial);
        engine.command("newton on off").unwrap();
        engine.command("run 0").unwrap();
        let restart = dir.path().join("state.restart");
        engine
            .command(&format!("write_restart {}", restart.display()))
            .unwrap();
        let before = engine.forces();

        engine.command("clear").unwrap();
        engine
            .command(&format!("read_restart {}", restart.display()))
            .unwrap();
        assert!(!engine.newton_bond);
        engine.command("run 0").unwrap();
        assert_eq!(engine.forces(), before);
    }

    #[test]
    fn test_errors_are_reported() {
        let mut engine = ReferenceEngine::new(Backend::Serial);
        assert!(matches!(
            engine.command("frobnicate 1"),
            Err(EngineError::UnknownCommand(_))
        ));
        assert!(matches!(
            engine.command("bond_style fene"),
            Err(EngineError::UnknownStyle { .. })
        ));
        assert!(matches!(
            engine.command("bond_coeff 1 1.0 1.0"),
            Err(EngineError::InvalidCommand { .. })
        ));
        assert!(matches!(
            engine.command("run 0"),
            Err(EngineError::NotReady(_))
        ));
        assert!(matches!(
            engine.command("include /nonexistent/in.script"),
            Err(EngineError::Io { .. })
        ));
    }

    #[test]
    fn test_suffix_resolution_and_factory() {
        let factory = ReferenceEngineFactory::new();
        let omp = Backend::Concurrent {
            package: "omp".to_string(),
            threads: 2,
        };
        let gpu = Backend::Concurrent {
            package: "gpu".to_string(),
            threads: 2,
        };
        assert!(factory.backend_installed(&Backend::Serial));
        assert!(factory.backend_installed(&omp));
        assert!(!factory.backend_installed(&gpu));
        assert!(factory.create(&gpu).is_err());

        let dir = tempfile::tempdir().unwrap();
        let mut engine = engine_with_bond(dir.path(), omp);
        engine.command("run 0").unwrap();
        assert_eq!(engine.suffix(), Some("omp"));
        assert_eq!(
            engine.style_state(StyleKind::Bond).unwrap().name,
            "harmonic/omp"
        );
    }
}
