//! Scenario matrix runner.
//!
//! Drives one test case through every scenario in a fixed order and turns
//! the comparisons into a [`StyleReport`]. Each scenario is independent: a
//! fatal error or a skip in one never prevents the next from running.

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::Result;

use super::backend::{Backend, EngineFactory};
use super::driver::{EngineDriver, EngineHandle, Setup};
use super::parser::{load_fixtures_from_dir, parse_fixture, parse_fixture_file};
use super::types::{Bookkeeping, Prerequisite, ScenarioResult, Snapshot, TestCase};
use super::verification::{
    compare_energy, compare_forces, compare_stress, validate_atom_count, GroupCheck,
};
use crate::config::{HarnessConfig, Tolerances};
use crate::error::ScenarioError;
use crate::report::{ScenarioOutcome, StyleReport, TestReport, TestStatus};
use crate::stats::ErrorStats;

/// How a scenario body ended when it did not fail.
enum Completion {
    Ran,
    Skipped(Vec<Prerequisite>),
}

/// Tolerances for one snapshot comparison.
#[derive(Debug, Clone, Copy)]
struct Limits {
    forces: f64,
    stress: f64,
    energy: f64,
}

impl Limits {
    fn init(t: &Tolerances) -> Self {
        Self {
            forces: t.init_forces,
            stress: t.init_stress,
            energy: t.init_energy,
        }
    }

    fn run(t: &Tolerances) -> Self {
        Self {
            forces: t.run_forces,
            stress: t.run_stress,
            energy: t.run_energy,
        }
    }

    fn uniform(epsilon: f64) -> Self {
        Self {
            forces: epsilon,
            stress: epsilon,
            energy: epsilon,
        }
    }
}

/// Group checks and combined statistics of one scenario.
#[derive(Default)]
struct Checks {
    groups: Vec<GroupCheck>,
    stats: ErrorStats,
}

impl Checks {
    fn snapshot(
        &mut self,
        stage: &str,
        mode: Option<Bookkeeping>,
        case: &TestCase,
        result: &ScenarioResult,
        reference: &Snapshot,
        limits: Limits,
    ) -> Result<(), ScenarioError> {
        let label = |quantity: &str| match mode {
            Some(mode) => format!("{}_{} ({})", stage, quantity, mode),
            None => format!("{}_{}", stage, quantity),
        };
        validate_atom_count(&label("forces"), case.natoms, result)?;
        self.groups.push(compare_forces(
            &label("forces"),
            result,
            &reference.forces,
            limits.forces,
            &mut self.stats,
        )?);
        self.groups.push(compare_stress(
            &label("stress"),
            &result.stress,
            &reference.stress,
            limits.stress,
            &mut self.stats,
        ));
        self.groups.push(compare_energy(
            &label("energy"),
            result.energy,
            reference.energy,
            limits.energy,
            &mut self.stats,
        ));
        Ok(())
    }

    fn cross_check(&mut self, mode: Bookkeeping, sum: f64, energy: f64, tolerance: f64) {
        self.groups.push(compare_energy(
            &format!("run_energy_cross_check ({})", mode),
            sum,
            energy,
            tolerance,
            &mut self.stats,
        ));
    }
}

/// Runs the scenario matrix for test cases.
pub struct MatrixRunner<'a> {
    driver: EngineDriver<'a>,
}

impl<'a> MatrixRunner<'a> {
    /// Create a runner over an engine factory.
    pub fn new(factory: &'a dyn EngineFactory, config: &'a HarnessConfig) -> Self {
        Self {
            driver: EngineDriver::new(factory, config),
        }
    }

    /// Run a fixture from a YAML string.
    pub fn run_fixture(&self, name: &str, yaml: &str) -> Result<StyleReport> {
        let case = parse_fixture(yaml)?;
        Ok(self.execute(name, &case))
    }

    /// Run a fixture from a file path.
    pub fn run_fixture_file(&self, path: &Path) -> Result<StyleReport> {
        let case = parse_fixture_file(path)?;
        Ok(self.execute(&case.basename, &case))
    }

    /// Run fixture files and every fixture below fixture directories.
    ///
    /// All fixtures are loaded before anything runs, so a schema error
    /// aborts the whole run.
    pub fn run_paths(&self, paths: &[PathBuf]) -> Result<TestReport> {
        let start = Instant::now();
        let mut cases = Vec::new();
        for path in paths {
            if path.is_dir() {
                cases.extend(load_fixtures_from_dir(path)?.into_iter().map(|(_, case)| case));
            } else {
                cases.push(parse_fixture_file(path)?);
            }
        }

        let mut report = TestReport::new();
        for case in &cases {
            report.add_style(self.execute(&case.basename, case));
        }
        report.duration = start.elapsed();
        Ok(report)
    }

    /// Run every scenario for one test case.
    pub fn execute(&self, name: &str, case: &TestCase) -> StyleReport {
        let style = format!("{} {}", case.style_kind, case.style_name);
        let mut report = StyleReport::new(name, &style);
        log::info!("{}: {}", name, style);

        // Phase 1: serial backend, both bookkeeping modes plus reloads
        report.scenarios.push(self.scenario("plain", name, |checks| {
            self.run_backend(case, &Backend::Serial, true, checks)
        }));

        // Phase 2: accelerated backend, both bookkeeping modes
        if let Some(backend) = &self.driver.config().concurrent {
            if self.driver.backend_installed(backend) {
                report.scenarios.push(self.scenario("concurrent", name, |checks| {
                    self.run_backend(case, backend, false, checks)
                }));
            } else {
                log::warn!("{}: backend {} is not installed", name, backend);
                report.scenarios.push(ScenarioOutcome::skipped(
                    "concurrent",
                    format!("backend {} is not installed", backend),
                ));
            }
        }

        // Phase 3: coefficient extraction
        if !case.extract.is_empty() {
            report.scenarios.push(self.extract_scenario(name, case));
        }

        report
    }

    fn scenario(
        &self,
        scenario: &str,
        name: &str,
        body: impl FnOnce(&mut Checks) -> Result<Completion, ScenarioError>,
    ) -> ScenarioOutcome {
        let start = Instant::now();
        let mut checks = Checks::default();
        let result = body(&mut checks);

        let (status, message) = match result {
            Ok(Completion::Skipped(missing)) => {
                let list: Vec<String> = missing.iter().map(|p| p.to_string()).collect();
                let reason = format!("missing prerequisites: {}", list.join(", "));
                log::warn!("{} [{}] skipped, {}", name, scenario, reason);
                (TestStatus::Skip, Some(reason))
            }
            Err(e) => {
                log::info!("{} [{}] failed: {}", name, scenario, e);
                (TestStatus::Fail, Some(e.to_string()))
            }
            Ok(Completion::Ran) => {
                let failing: Vec<&str> = checks
                    .groups
                    .iter()
                    .filter(|g| !g.passed())
                    .map(|g| g.group.as_str())
                    .collect();
                if failing.is_empty() {
                    log::info!("{} [{}] passed", name, scenario);
                    (TestStatus::Pass, None)
                } else {
                    let message = format!("tolerance exceeded in {}", failing.join(", "));
                    log::info!("{} [{}] failed: {}", name, scenario, message);
                    (TestStatus::Fail, Some(message))
                }
            }
        };

        ScenarioOutcome {
            name: scenario.to_string(),
            status,
            duration: start.elapsed(),
            groups: checks.groups,
            stats: checks.stats,
            message,
        }
    }

    fn ready(setup: Setup) -> std::result::Result<EngineHandle, Vec<Prerequisite>> {
        match setup {
            Setup::Ready(handle) => Ok(handle),
            Setup::Skipped(missing) => Err(missing),
        }
    }

    /// Initial and short-run comparisons for one bookkeeping mode. The
    /// handle is returned for further stages.
    fn run_mode(
        &self,
        case: &TestCase,
        backend: &Backend,
        mode: Bookkeeping,
        checks: &mut Checks,
    ) -> Result<std::result::Result<EngineHandle, Vec<Prerequisite>>, ScenarioError> {
        let tolerances = self
            .driver
            .config()
            .tolerance
            .scenario(case.epsilon, backend, mode);

        let mut handle = match Self::ready(self.driver.initialize(case, backend, mode)?) {
            Ok(handle) => handle,
            Err(missing) => return Ok(Err(missing)),
        };

        let initial = self.driver.snapshot(&handle, case)?;
        checks.snapshot("init", Some(mode), case, &initial, &case.init, Limits::init(&tolerances))?;

        self.driver.advance(&mut handle)?;
        let after = self.driver.snapshot(&handle, case)?;
        checks.snapshot("run", Some(mode), case, &after, &case.run, Limits::run(&tolerances))?;

        let exempt = case.is_hybrid() && matches!(backend, Backend::Concurrent { .. });
        if exempt {
            log::warn!(
                "{}: energy cross-check skipped for hybrid style on {}",
                case.basename,
                backend
            );
            checks
                .groups
                .push(GroupCheck::exempt(&format!("run_energy_cross_check ({})", mode)));
        } else {
            let sum = self.driver.energy_cross_check(&handle)?;
            checks.cross_check(mode, sum, after.energy, tolerances.cross_check);
        }

        Ok(Ok(handle))
    }

    fn run_backend(
        &self,
        case: &TestCase,
        backend: &Backend,
        with_reloads: bool,
        checks: &mut Checks,
    ) -> Result<Completion, ScenarioError> {
        let handle = match self.run_mode(case, backend, Bookkeeping::SymmetricOn, checks)? {
            Ok(handle) => handle,
            Err(missing) => return Ok(Completion::Skipped(missing)),
        };
        self.driver.teardown(handle);

        let mut handle = match self.run_mode(case, backend, Bookkeeping::SymmetricOff, checks)? {
            Ok(handle) => handle,
            Err(missing) => return Ok(Completion::Skipped(missing)),
        };

        if with_reloads {
            let limits = Limits::uniform(self.driver.config().tolerance.reload(case.epsilon));

            self.driver.reload_from_restart(&mut handle, case)?;
            let restored = self.driver.snapshot(&handle, case)?;
            checks.snapshot("restart", None, case, &restored, &case.init, limits)?;

            self.driver.reload_from_data(&mut handle, case)?;
            let reloaded = self.driver.snapshot(&handle, case)?;
            checks.snapshot("data", None, case, &reloaded, &case.init, limits)?;
        }

        self.driver.teardown(handle);
        Ok(Completion::Ran)
    }

    fn extract_scenario(&self, name: &str, case: &TestCase) -> ScenarioOutcome {
        let start = Instant::now();
        let result = self
            .driver
            .initialize(case, &Backend::Serial, Bookkeeping::SymmetricOn)
            .map(|setup| match Self::ready(setup) {
                Ok(handle) => {
                    let problems = self.driver.check_extract(&handle, case);
                    self.driver.teardown(handle);
                    Ok(problems)
                }
                Err(missing) => Err(missing),
            });

        let (status, message) = match result {
            Ok(Ok(problems)) if problems.is_empty() => (TestStatus::Pass, None),
            Ok(Ok(problems)) => (TestStatus::Fail, Some(problems.join("; "))),
            Ok(Err(missing)) => {
                let list: Vec<String> = missing.iter().map(|p| p.to_string()).collect();
                (
                    TestStatus::Skip,
                    Some(format!("missing prerequisites: {}", list.join(", "))),
                )
            }
            Err(e) => (TestStatus::Fail, Some(e.to_string())),
        };
        log::info!("{} [extract] {:?}", name, status);

        ScenarioOutcome {
            name: "extract".to_string(),
            status,
            duration: start.elapsed(),
            groups: Vec::new(),
            stats: ErrorStats::new(),
            message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::backends::reference::ReferenceEngineFactory;
    use crate::fixtures::regression::{capture, Capture};
    use crate::fixtures::types::{ExtractDirective, StyleKind};

    const DATA: &str = "three atoms\n\n\
        3 atoms\n2 bonds\n1 angles\n1 atom types\n2 bond types\n1 angle types\n\n\
        Masses\n\n1 12.0\n\n\
        Atoms\n\n1 1 0.0 0.0 0.0\n2 1 1.1 0.2 0.0\n3 1 1.6 1.3 0.3\n\n\
        Velocities\n\n1 0.01 0.0 0.0\n2 0.0 -0.02 0.0\n3 0.0 0.0 0.03\n\n\
        Bonds\n\n1 1 1 2\n2 2 2 3\n\n\
        Angles\n\n1 1 1 2 3\n";

    const SCRIPT: &str = "variable newton_bond index on\n\
        variable input_dir index .\n\
        variable data_file index ${input_dir}/three.data\n\
        variable bond_style index zero\n\
        atom_style angle\n\
        newton on ${newton_bond}\n\
        read_data ${data_file}\n\
        bond_style ${bond_style}\n";

    fn template(style: &str, coeffs: &[&str]) -> TestCase {
        TestCase {
            engine_version: None,
            date_generated: None,
            epsilon: 1e-10,
            prerequisites: vec![
                Prerequisite {
                    kind: "atom".to_string(),
                    style: "angle".to_string(),
                },
                Prerequisite {
                    kind: "bond".to_string(),
                    style: style.split_whitespace().next().unwrap().to_string(),
                },
            ],
            pre_commands: vec![],
            post_commands: vec![],
            input_file: "in.three".to_string(),
            style_kind: StyleKind::Bond,
            style_name: style.to_string(),
            style_coeffs: coeffs.iter().map(|c| c.to_string()).collect(),
            extract: vec![],
            natoms: 0,
            init: Default::default(),
            run: Default::default(),
            basename: format!("runner-{}", style.replace(' ', "-")),
        }
    }

    fn config() -> (tempfile::TempDir, HarnessConfig) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("three.data"), DATA).unwrap();
        std::fs::write(dir.path().join("in.three"), SCRIPT).unwrap();
        let config = HarnessConfig::default()
            .with_input_dir(dir.path())
            .with_work_dir(dir.path())
            .with_threads(2);
        (dir, config)
    }

    fn captured(case: &TestCase, factory: &ReferenceEngineFactory, config: &HarnessConfig) -> TestCase {
        match capture(case, factory, config).unwrap() {
            Capture::Captured(case) => case,
            Capture::Skipped(missing) => panic!("unexpected skip: {:?}", missing),
        }
    }

    #[test]
    fn test_captured_fixture_passes_every_scenario() {
        let (_dir, config) = config();
        let factory = ReferenceEngineFactory::new();
        let case = captured(
            &template("harmonic", &["1 250.0 1.1", "2 100.0 1.3"]),
            &factory,
            &config,
        );
        let report = MatrixRunner::new(&factory, &config).execute("harmonic", &case);

        let names: Vec<&str> = report.scenarios.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["plain", "concurrent"]);
        for scenario in &report.scenarios {
            assert_eq!(
                scenario.status,
                TestStatus::Pass,
                "{}: {:?}",
                scenario.name,
                scenario.message
            );
        }
        let plain = &report.scenarios[0];
        // init, run and cross-check per mode, then restart and data reloads
        assert_eq!(plain.groups.len(), 7 + 7 + 3 + 3);
        assert!(plain.groups.iter().any(|g| g.group == "restart_forces"));
        assert!(plain.groups.iter().any(|g| g.group == "init_stress (newton off)"));
        assert_eq!(report.scenarios[1].groups.len(), 14);
    }

    #[test]
    fn test_hybrid_cross_check_exempt_on_concurrent_backend() {
        let (_dir, config) = config();
        let factory = ReferenceEngineFactory::new();
        let mut case = template(
            "hybrid harmonic morse",
            &["1 harmonic 250.0 1.1", "2 morse 5.0 2.0 1.2"],
        );
        case.prerequisites[1].style = "hybrid".to_string();
        let case = captured(&case, &factory, &config);
        let report = MatrixRunner::new(&factory, &config).execute("hybrid", &case);

        let plain = &report.scenarios[0];
        assert_eq!(plain.status, TestStatus::Pass, "{:?}", plain.message);
        assert_eq!(plain.exempted_groups().count(), 0);

        let concurrent = &report.scenarios[1];
        assert_eq!(concurrent.status, TestStatus::Pass, "{:?}", concurrent.message);
        assert_eq!(concurrent.exempted_groups().count(), 2);
    }

    #[test]
    fn test_perturbed_reference_fails_with_stats() {
        let (_dir, config) = config();
        let config = config.serial_only();
        let factory = ReferenceEngineFactory::new();
        let mut case = captured(&template("morse", &["* 5.0 2.0 1.2"]), &factory, &config);
        case.init.energy += 1e-6;

        let report = MatrixRunner::new(&factory, &config).execute("morse", &case);
        assert_eq!(report.scenarios.len(), 1);
        let plain = &report.scenarios[0];
        assert_eq!(plain.status, TestStatus::Fail);
        let failing: Vec<&str> = plain.failing_groups().map(|g| g.group.as_str()).collect();
        assert_eq!(
            failing,
            vec![
                "init_energy (newton on)",
                "init_energy (newton off)",
                "restart_energy",
                "data_energy"
            ]
        );
        assert!(plain.stats.max_abs() >= 1e-6 * 0.99);
        assert!(plain.message.as_deref().unwrap().contains("init_energy (newton on)"));
    }

    #[test]
    fn test_unknown_prerequisite_skips_without_failure() {
        let (_dir, config) = config();
        let factory = ReferenceEngineFactory::new();
        let mut case = template("harmonic", &["* 250.0 1.1"]);
        case.prerequisites.push(Prerequisite {
            kind: "pair".to_string(),
            style: "lj/cut".to_string(),
        });
        let report = MatrixRunner::new(&factory, &config).execute("skip", &case);
        assert_eq!(report.status(), TestStatus::Skip);
        assert!(report
            .scenarios
            .iter()
            .all(|s| s.status == TestStatus::Skip));
        assert!(report.scenarios[0]
            .message
            .as_deref()
            .unwrap()
            .contains("pair_style lj/cut"));
    }

    #[test]
    fn test_extract_scenario() {
        let (_dir, config) = config();
        let config = config.serial_only();
        let factory = ReferenceEngineFactory::new();
        let mut case = captured(&template("harmonic", &["* 250.0 1.1"]), &factory, &config);
        case.extract = vec![
            ExtractDirective {
                name: "k".to_string(),
                dim: 1,
            },
            ExtractDirective {
                name: "r0".to_string(),
                dim: 2,
            },
        ];
        let report = MatrixRunner::new(&factory, &config).execute("extract", &case);
        let extract = report.scenarios.last().unwrap();
        assert_eq!(extract.name, "extract");
        assert_eq!(extract.status, TestStatus::Fail);
        assert!(extract.message.as_deref().unwrap().contains("'r0' has dimension 1"));
    }
}
