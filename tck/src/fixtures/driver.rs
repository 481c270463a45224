//! Engine driver: scripts one engine instance through a test case.
//!
//! Every stage is a fixed sequence of textual commands. The persistence
//! artifacts written during initialization belong to the [`EngineHandle`]
//! and are removed when it goes out of scope, whichever way the scenario
//! ends.

use std::path::{Path, PathBuf};

use super::backend::{Backend, Engine, EngineFactory};
use super::types::{Bookkeeping, Prerequisite, ScenarioResult, Stress, TestCase};
use crate::config::HarnessConfig;
use crate::error::ScenarioError;

/// Files written during initialization and consumed by the reloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifacts {
    /// Full-state restart file
    pub restart: PathBuf,
    /// Coordinate and topology data file
    pub data: PathBuf,
    /// Coefficient script
    pub coeffs: PathBuf,
}

impl Artifacts {
    fn new(work_dir: &Path, basename: &str) -> Self {
        Self {
            restart: work_dir.join(format!("{}.restart", basename)),
            data: work_dir.join(format!("{}.data", basename)),
            coeffs: work_dir.join(format!("{}-coeffs.in", basename)),
        }
    }

    fn paths(&self) -> [&Path; 3] {
        [&self.restart, &self.data, &self.coeffs]
    }
}

/// An initialized engine plus the artifacts it owns.
pub struct EngineHandle {
    engine: Box<dyn Engine>,
    backend: Backend,
    artifacts: Artifacts,
    released: bool,
}

impl EngineHandle {
    /// The scripted engine.
    pub fn engine(&self) -> &dyn Engine {
        self.engine.as_ref()
    }

    /// Backend the engine was created with.
    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    /// Persistence artifacts of this instance.
    pub fn artifacts(&self) -> &Artifacts {
        &self.artifacts
    }

    fn remove_artifacts(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        for path in self.artifacts.paths() {
            match std::fs::remove_file(path) {
                Ok(()) => log::debug!("removed {}", path.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => log::warn!("could not remove {}: {}", path.display(), e),
            }
        }
    }
}

impl Drop for EngineHandle {
    fn drop(&mut self) {
        self.remove_artifacts();
    }
}

/// Result of initializing an engine for a test case.
pub enum Setup {
    /// All prerequisites present, engine initialized
    Ready(EngineHandle),
    /// Missing capabilities; nothing was run
    Skipped(Vec<Prerequisite>),
}

/// Drives engines created by a factory through the scenario stages.
pub struct EngineDriver<'a> {
    factory: &'a dyn EngineFactory,
    config: &'a HarnessConfig,
}

/// A path as one command word, whatever characters it contains.
fn quoted(path: &Path) -> String {
    let text = path.display().to_string();
    if text.contains('\'') {
        format!("\"{}\"", text)
    } else {
        format!("'{}'", text)
    }
}

fn issue(engine: &mut dyn Engine, line: &str) -> Result<(), ScenarioError> {
    if log::log_enabled!(log::Level::Debug) {
        log::debug!("> {}", line);
    }
    engine.command(line)?;
    Ok(())
}

fn issue_all<'l>(
    engine: &mut dyn Engine,
    lines: impl IntoIterator<Item = &'l String>,
) -> Result<(), ScenarioError> {
    for line in lines {
        issue(engine, line)?;
    }
    Ok(())
}

impl<'a> EngineDriver<'a> {
    /// Create a driver.
    pub fn new(factory: &'a dyn EngineFactory, config: &'a HarnessConfig) -> Self {
        Self { factory, config }
    }

    /// The harness configuration in use.
    pub fn config(&self) -> &HarnessConfig {
        self.config
    }

    /// Whether the factory can create engines for `backend`.
    pub fn backend_installed(&self, backend: &Backend) -> bool {
        self.factory.backend_installed(backend)
    }

    /// Prerequisites the engine does not provide.
    ///
    /// On a suffixed backend the prerequisite naming the style kind under
    /// test is probed with the suffix appended.
    pub fn missing_prerequisites(&self, engine: &dyn Engine, case: &TestCase) -> Vec<Prerequisite> {
        case.prerequisites
            .iter()
            .filter(|prerequisite| {
                let probe = match engine.suffix() {
                    Some(suffix) if prerequisite.kind == case.style_kind.as_str() => {
                        format!("{}/{}", prerequisite.style, suffix)
                    }
                    _ => prerequisite.style.clone(),
                };
                !engine.has_style(&prerequisite.kind, &probe)
            })
            .cloned()
            .collect()
    }

    /// Create an engine, check prerequisites and run the setup sequence.
    pub fn initialize(
        &self,
        case: &TestCase,
        backend: &Backend,
        bookkeeping: Bookkeeping,
    ) -> Result<Setup, ScenarioError> {
        let engine = self.factory.create(backend)?;

        let missing = self.missing_prerequisites(engine.as_ref(), case);
        if !missing.is_empty() {
            return Ok(Setup::Skipped(missing));
        }

        let mut handle = EngineHandle {
            engine,
            backend: backend.clone(),
            artifacts: Artifacts::new(&self.config.work_dir, &case.basename),
            released: false,
        };
        let engine = handle.engine.as_mut();

        issue(
            engine,
            &format!(
                "variable {} index {}",
                case.style_kind.newton_variable(),
                bookkeeping.flag()
            ),
        )?;
        issue(
            engine,
            &format!("variable input_dir index {}", quoted(&self.config.input_dir)),
        )?;
        issue_all(engine, &case.pre_commands)?;
        issue(
            engine,
            &format!("include {}", quoted(&self.config.input_dir.join(&case.input_file))),
        )?;
        issue(engine, &case.style_command())?;
        issue_all(engine, &case.coeff_commands())?;
        issue_all(engine, &case.post_commands)?;
        issue(engine, "run 0 post no")?;

        issue(
            engine,
            &format!("write_restart {}", quoted(&handle.artifacts.restart)),
        )?;
        issue(
            engine,
            &format!("write_data {}", quoted(&handle.artifacts.data)),
        )?;
        issue(
            engine,
            &format!("write_coeff {}", quoted(&handle.artifacts.coeffs)),
        )?;

        Ok(Setup::Ready(handle))
    }

    /// Read forces, energy and stress of the style under test.
    pub fn snapshot(
        &self,
        handle: &EngineHandle,
        case: &TestCase,
    ) -> Result<ScenarioResult, ScenarioError> {
        let engine = handle.engine();
        let state = engine
            .style_state(case.style_kind)
            .ok_or_else(|| ScenarioError::NoStyle(case.style_kind.to_string()))?;
        Ok(ScenarioResult {
            natoms: engine.natoms(),
            nlocal: engine.nlocal(),
            ids: engine.atom_ids(),
            forces: engine.forces(),
            energy: state.energy,
            stress: Stress::from_array(state.virial),
        })
    }

    /// Integrate a short trajectory with a per-atom energy reduction.
    pub fn advance(&self, handle: &mut EngineHandle) -> Result<(), ScenarioError> {
        const SEQUENCE: [&str; 6] = [
            "fix 1 all nve",
            "compute pe all pe/atom",
            "compute sum all reduce sum c_pe",
            "thermo_style custom step temp pe press c_sum",
            "thermo 2",
            "run 4 post no",
        ];
        let engine = handle.engine.as_mut();
        for line in SEQUENCE {
            issue(engine, line)?;
        }
        Ok(())
    }

    /// Sum of per-atom energies from the reduction installed by [`advance`].
    ///
    /// [`advance`]: EngineDriver::advance
    pub fn energy_cross_check(&self, handle: &EngineHandle) -> Result<f64, ScenarioError> {
        handle
            .engine()
            .compute_scalar("sum")
            .ok_or_else(|| ScenarioError::MissingCompute("sum".to_string()))
    }

    /// Rebuild the engine state from the restart file.
    pub fn reload_from_restart(
        &self,
        handle: &mut EngineHandle,
        case: &TestCase,
    ) -> Result<(), ScenarioError> {
        let restart = handle.artifacts.restart.clone();
        let engine = handle.engine.as_mut();

        issue(engine, "clear")?;
        issue(engine, &format!("read_restart {}", quoted(&restart)))?;

        if engine.style_state(case.style_kind).is_none() {
            issue(engine, &case.style_command())?;
        }
        let writes_coeffs = engine
            .style_state(case.style_kind)
            .map(|state| state.writes_coeffs)
            .unwrap_or(false);
        // Hybrid styles restore their sub-styles without coefficients
        if case.is_hybrid() || !writes_coeffs {
            issue_all(engine, &case.coeff_commands())?;
        }
        issue_all(engine, &case.post_commands)?;
        issue(engine, "run 0 post no")
    }

    /// Rebuild the engine state from the data file and the scenario script.
    pub fn reload_from_data(
        &self,
        handle: &mut EngineHandle,
        case: &TestCase,
    ) -> Result<(), ScenarioError> {
        let data = handle.artifacts.data.clone();
        let kind = case.style_kind;
        let engine = handle.engine.as_mut();

        issue(engine, "clear")?;
        issue(engine, &format!("variable {} delete", kind.style_key()))?;
        issue(engine, "variable data_file delete")?;
        issue(engine, &format!("variable {} delete", kind.newton_variable()))?;
        issue(
            engine,
            &format!("variable {} index on", kind.newton_variable()),
        )?;
        issue_all(engine, &case.pre_commands)?;
        issue(
            engine,
            &format!("variable {} index '{}'", kind.style_key(), case.style_name),
        )?;
        issue(engine, &format!("variable data_file index {}", quoted(&data)))?;
        issue(
            engine,
            &format!("include {}", quoted(&self.config.input_dir.join(&case.input_file))),
        )?;
        issue_all(engine, &case.coeff_commands())?;
        issue_all(engine, &case.post_commands)?;
        issue(engine, "run 0 post no")
    }

    /// Coefficient names the style fails to expose as declared.
    pub fn check_extract(&self, handle: &EngineHandle, case: &TestCase) -> Vec<String> {
        let engine = handle.engine();
        case.extract
            .iter()
            .filter_map(|directive| {
                match engine.extract(case.style_kind, &directive.name) {
                    None => Some(format!(
                        "{} style does not expose '{}'",
                        case.style_kind, directive.name
                    )),
                    Some(dim) if dim != directive.dim => Some(format!(
                        "'{}' has dimension {}, expected {}",
                        directive.name, dim, directive.dim
                    )),
                    Some(_) => None,
                }
            })
            .collect()
    }

    /// Remove the artifacts and release the engine.
    pub fn teardown(&self, mut handle: EngineHandle) {
        log::debug!(
            "tearing down {} engine, removing {}",
            handle.backend,
            handle.artifacts.restart.display()
        );
        handle.remove_artifacts();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::backends::reference::ReferenceEngineFactory;
    use crate::fixtures::types::StyleKind;

    const DATA: &str = "bond pair\n\n\
        2 atoms\n1 bonds\n0 angles\n1 atom types\n1 bond types\n0 angle types\n\n\
        Masses\n\n1 1.0\n\n\
        Atoms\n\n1 1 0.0 0.0 0.0\n2 1 0.0 1.5 0.0\n\n\
        Bonds\n\n1 1 1 2\n";

    const SCRIPT: &str = "variable newton_bond index on\n\
        variable input_dir index .\n\
        variable data_file index ${input_dir}/pair.data\n\
        variable bond_style index zero\n\
        atom_style bond\n\
        newton on ${newton_bond}\n\
        read_data ${data_file}\n\
        bond_style ${bond_style}\n";

    fn case() -> TestCase {
        TestCase {
            engine_version: None,
            date_generated: None,
            epsilon: 1e-13,
            prerequisites: vec![Prerequisite {
                kind: "bond".to_string(),
                style: "harmonic".to_string(),
            }],
            pre_commands: vec![],
            post_commands: vec![],
            input_file: "in.pair".to_string(),
            style_kind: StyleKind::Bond,
            style_name: "harmonic".to_string(),
            style_coeffs: vec!["1 1.5 1.0".to_string()],
            extract: vec![],
            natoms: 2,
            init: Default::default(),
            run: Default::default(),
            basename: "bond-harmonic-test".to_string(),
        }
    }

    fn setup() -> (tempfile::TempDir, HarnessConfig) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("pair.data"), DATA).unwrap();
        std::fs::write(dir.path().join("in.pair"), SCRIPT).unwrap();
        let config = HarnessConfig::default()
            .with_input_dir(dir.path())
            .with_work_dir(dir.path());
        (dir, config)
    }

    fn ready(setup: Setup) -> EngineHandle {
        match setup {
            Setup::Ready(handle) => handle,
            Setup::Skipped(missing) => panic!("unexpected skip: {:?}", missing),
        }
    }

    #[test]
    fn test_initialize_writes_artifacts_and_teardown_removes_them() {
        let (_dir, config) = setup();
        let factory = ReferenceEngineFactory::new();
        let driver = EngineDriver::new(&factory, &config);
        let test_case = case();
        let handle = ready(
            driver
                .initialize(&test_case, &Backend::Serial, Bookkeeping::SymmetricOn)
                .unwrap(),
        );
        let artifacts = handle.artifacts().clone();
        for path in artifacts.paths() {
            assert!(path.exists(), "{} missing", path.display());
        }

        let result = driver.snapshot(&handle, &test_case).unwrap();
        assert_eq!(result.natoms, 2);
        assert_eq!(result.energy, 0.375);

        driver.teardown(handle);
        for path in artifacts.paths() {
            assert!(!path.exists(), "{} left behind", path.display());
        }
    }

    #[test]
    fn test_drop_removes_artifacts() {
        let (_dir, config) = setup();
        let factory = ReferenceEngineFactory::new();
        let driver = EngineDriver::new(&factory, &config);
        let handle = ready(
            driver
                .initialize(&case(), &Backend::Serial, Bookkeeping::SymmetricOff)
                .unwrap(),
        );
        let restart = handle.artifacts().restart.clone();
        assert!(restart.exists());
        drop(handle);
        assert!(!restart.exists());
    }

    #[test]
    fn test_missing_prerequisite_uses_suffix() {
        let (_dir, config) = setup();
        let factory = ReferenceEngineFactory::new();
        let driver = EngineDriver::new(&factory, &config);
        let mut test_case = case();
        test_case.prerequisites.push(Prerequisite {
            kind: "bond".to_string(),
            style: "zero".to_string(),
        });
        let omp = Backend::Concurrent {
            package: "omp".to_string(),
            threads: 2,
        };
        match driver
            .initialize(&test_case, &omp, Bookkeeping::SymmetricOn)
            .unwrap()
        {
            Setup::Skipped(missing) => {
                assert_eq!(missing.len(), 1);
                assert_eq!(missing[0].style, "zero");
            }
            Setup::Ready(_) => panic!("zero/omp is not registered"),
        }
        match driver
            .initialize(&test_case, &Backend::Serial, Bookkeeping::SymmetricOn)
            .unwrap()
        {
            Setup::Ready(_) => {}
            Setup::Skipped(missing) => panic!("unexpected skip: {:?}", missing),
        }
    }

    #[test]
    fn test_reloads_reproduce_initial_state() {
        let (_dir, config) = setup();
        let factory = ReferenceEngineFactory::new();
        let driver = EngineDriver::new(&factory, &config);
        let test_case = case();
        let mut handle = ready(
            driver
                .initialize(&test_case, &Backend::Serial, Bookkeeping::SymmetricOff)
                .unwrap(),
        );
        let initial = driver.snapshot(&handle, &test_case).unwrap();

        driver.advance(&mut handle).unwrap();
        let sum = driver.energy_cross_check(&handle).unwrap();
        let after = driver.snapshot(&handle, &test_case).unwrap();
        assert!((sum - after.energy).abs() < 1e-12);

        driver.reload_from_restart(&mut handle, &test_case).unwrap();
        assert_eq!(driver.snapshot(&handle, &test_case).unwrap().energy, initial.energy);

        driver.reload_from_data(&mut handle, &test_case).unwrap();
        let reloaded = driver.snapshot(&handle, &test_case).unwrap();
        assert_eq!(reloaded.force_table(), initial.force_table());
    }

    #[test]
    fn test_paths_with_spaces() {
        let dir = tempfile::tempdir().unwrap();
        let spaced = dir.path().join("my inputs");
        std::fs::create_dir(&spaced).unwrap();
        std::fs::write(spaced.join("pair.data"), DATA).unwrap();
        std::fs::write(spaced.join("in.pair"), SCRIPT).unwrap();
        let config = HarnessConfig::default()
            .with_input_dir(&spaced)
            .with_work_dir(&spaced);
        let factory = ReferenceEngineFactory::new();
        let driver = EngineDriver::new(&factory, &config);
        let test_case = case();

        let mut handle = ready(
            driver
                .initialize(&test_case, &Backend::Serial, Bookkeeping::SymmetricOn)
                .unwrap(),
        );
        assert!(handle.artifacts().restart.exists());
        let initial = driver.snapshot(&handle, &test_case).unwrap();

        driver.reload_from_restart(&mut handle, &test_case).unwrap();
        driver.reload_from_data(&mut handle, &test_case).unwrap();
        let reloaded = driver.snapshot(&handle, &test_case).unwrap();
        assert_eq!(reloaded.force_table(), initial.force_table());
        assert_eq!(reloaded.energy, initial.energy);
    }

    #[test]
    fn test_quoted_paths() {
        assert_eq!(quoted(Path::new("/tmp/a b/x.data")), "'/tmp/a b/x.data'");
        assert_eq!(quoted(Path::new("/tmp/it's")), "\"/tmp/it's\"");
    }

    #[test]
    fn test_engine_error_aborts_initialize() {
        let (_dir, config) = setup();
        let factory = ReferenceEngineFactory::new();
        let driver = EngineDriver::new(&factory, &config);
        let mut test_case = case();
        test_case.post_commands.push("frobnicate all".to_string());
        let err = match driver.initialize(&test_case, &Backend::Serial, Bookkeeping::SymmetricOn) {
            Err(err) => err,
            Ok(_) => panic!("bogus command accepted"),
        };
        assert!(matches!(err, ScenarioError::Engine(_)));
        assert!(!config.work_dir.join("bond-harmonic-test.restart").exists());
    }

    #[test]
    fn test_check_extract() {
        let (_dir, config) = setup();
        let factory = ReferenceEngineFactory::new();
        let driver = EngineDriver::new(&factory, &config);
        let mut test_case = case();
        test_case.extract = vec![
            crate::fixtures::types::ExtractDirective {
                name: "k".to_string(),
                dim: 1,
            },
            crate::fixtures::types::ExtractDirective {
                name: "bogus".to_string(),
                dim: 1,
            },
        ];
        let handle = ready(
            driver
                .initialize(&test_case, &Backend::Serial, Bookkeeping::SymmetricOn)
                .unwrap(),
        );
        let problems = driver.check_extract(&handle, &test_case);
        assert_eq!(problems.len(), 1);
        assert!(problems[0].contains("bogus"));
    }
}
