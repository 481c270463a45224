//! YAML fixture parsing.
//!
//! A fixture is a flat mapping of named sections. Each section name is
//! resolved to a [`Section`] and dispatched to a handler that fills in the
//! test case under construction. Unknown sections are schema errors: numeric
//! mismatches are tolerated and reported later, schema mistakes are not.

use std::hash::Hasher;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde_yaml::Value;
use siphasher::sip::SipHasher13;
use walkdir::WalkDir;

use super::types::{
    AtomId, ExtractDirective, ForceTable, Prerequisite, Snapshot, Stress, StyleKind, TestCase,
};
use crate::error::FixtureError;

/// Recognized fixture sections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    /// Engine build that produced the golden values (informational)
    EngineVersion,
    /// Generation timestamp (informational)
    DateGenerated,
    /// Base tolerance
    Epsilon,
    /// `<capability-kind> <style>` lines
    Prerequisites,
    /// Commands before the scenario file
    PreCommands,
    /// Commands after the style is applied
    PostCommands,
    /// Scenario file reference
    InputFile,
    /// `<kind>_style` declaration
    Style(StyleKind),
    /// `<kind>_coeff` lines
    Coeff(StyleKind),
    /// `<name> <dim>` extraction directives
    Extract,
    /// Atom count
    Natoms,
    /// Initial energy
    InitEnergy,
    /// Initial stress
    InitStress,
    /// Initial forces
    InitForces,
    /// Post-run energy
    RunEnergy,
    /// Post-run stress
    RunStress,
    /// Post-run forces
    RunForces,
}

impl Section {
    /// Resolve a section name.
    pub fn from_key(key: &str) -> Option<Self> {
        let section = match key {
            "engine_version" | "lammps_version" => Section::EngineVersion,
            "date_generated" => Section::DateGenerated,
            "epsilon" => Section::Epsilon,
            "prerequisites" => Section::Prerequisites,
            "pre_commands" => Section::PreCommands,
            "post_commands" => Section::PostCommands,
            "input_file" => Section::InputFile,
            "extract" => Section::Extract,
            "natoms" => Section::Natoms,
            "init_energy" => Section::InitEnergy,
            "init_stress" => Section::InitStress,
            "init_forces" => Section::InitForces,
            "run_energy" => Section::RunEnergy,
            "run_stress" => Section::RunStress,
            "run_forces" => Section::RunForces,
            other => {
                return StyleKind::from_style_key(other)
                    .map(Section::Style)
                    .or_else(|| StyleKind::from_coeff_key(other).map(Section::Coeff));
            }
        };
        Some(section)
    }
}

/// Test case under construction while sections are dispatched.
#[derive(Debug, Default)]
struct PartialTestCase {
    engine_version: Option<String>,
    date_generated: Option<String>,
    epsilon: Option<f64>,
    prerequisites: Vec<Prerequisite>,
    pre_commands: Vec<String>,
    post_commands: Vec<String>,
    input_file: Option<String>,
    style: Option<(StyleKind, String)>,
    coeffs: Option<(StyleKind, Vec<String>)>,
    extract: Vec<ExtractDirective>,
    natoms: Option<usize>,
    init: Snapshot,
    run: Snapshot,
}

/// Parse a fixture from a YAML string.
///
/// The persistence basename is derived from the style identity.
pub fn parse_fixture(yaml: &str) -> std::result::Result<TestCase, FixtureError> {
    let root: Value = serde_yaml::from_str(yaml)?;
    let mapping = match untag(&root) {
        Value::Mapping(mapping) => mapping,
        _ => return Err(FixtureError::NotAMapping),
    };

    let mut partial = PartialTestCase::default();
    for (key, value) in mapping {
        let key = scalar_text(key).ok_or(FixtureError::NotAMapping)?;
        let section =
            Section::from_key(&key).ok_or_else(|| FixtureError::UnknownSection(key.clone()))?;
        apply_section(&mut partial, section, &key, untag(value))?;
    }

    finish(partial)
}

/// Parse a fixture from a file path.
///
/// The persistence basename is the file stem, so fixtures living next to each
/// other never share artifacts.
pub fn parse_fixture_file(path: &Path) -> Result<TestCase> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read fixture file: {}", path.display()))?;
    let mut case = parse_fixture(&content)
        .with_context(|| format!("Failed to parse fixture file: {}", path.display()))?;
    if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
        case.basename = sanitize(stem);
    }
    Ok(case)
}

/// Load every `.yaml`/`.yml` fixture below a directory, sorted by path.
///
/// Any schema error aborts loading.
pub fn load_fixtures_from_dir(dir: &Path) -> Result<Vec<(PathBuf, TestCase)>> {
    if !dir.is_dir() {
        anyhow::bail!("Not a directory: {}", dir.display());
    }

    let mut paths = Vec::new();
    for entry in WalkDir::new(dir) {
        let entry =
            entry.with_context(|| format!("Failed to read directory: {}", dir.display()))?;
        let path = entry.path();
        if entry.file_type().is_file()
            && path
                .extension()
                .is_some_and(|ext| ext == "yaml" || ext == "yml")
        {
            paths.push(path.to_path_buf());
        }
    }
    paths.sort();

    paths
        .into_iter()
        .map(|path| {
            let case = parse_fixture_file(&path)?;
            Ok((path, case))
        })
        .collect()
}

/// Deterministic basename for a fixture that was not loaded from a file.
pub fn derive_basename(kind: StyleKind, style_name: &str, coeffs: &[String]) -> String {
    let mut hasher = SipHasher13::new_with_keys(0, 0);
    hasher.write(kind.as_str().as_bytes());
    hasher.write_u8(0);
    hasher.write(style_name.as_bytes());
    for line in coeffs {
        hasher.write_u8(0);
        hasher.write(line.as_bytes());
    }
    format!(
        "{}-{}-{:016x}",
        kind.as_str(),
        sanitize(style_name),
        hasher.finish()
    )
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Dispatch one section value into the partial test case.
fn apply_section(
    partial: &mut PartialTestCase,
    section: Section,
    key: &str,
    value: &Value,
) -> std::result::Result<(), FixtureError> {
    match section {
        Section::EngineVersion => partial.engine_version = Some(expect_text(key, value)?),
        Section::DateGenerated => partial.date_generated = Some(expect_text(key, value)?),
        Section::Epsilon => partial.epsilon = Some(expect_f64(key, value)?),
        Section::Prerequisites => {
            partial.prerequisites = fields_per_line(key, value, 2)?
                .into_iter()
                .map(|fields| Prerequisite {
                    kind: fields[0].clone(),
                    style: fields[1].clone(),
                })
                .collect();
        }
        Section::PreCommands => partial.pre_commands = block_lines(key, value)?,
        Section::PostCommands => partial.post_commands = block_lines(key, value)?,
        Section::InputFile => partial.input_file = Some(expect_text(key, value)?),
        Section::Style(kind) => {
            check_kind(partial, kind)?;
            partial.style = Some((kind, expect_text(key, value)?));
        }
        Section::Coeff(kind) => {
            check_kind(partial, kind)?;
            partial.coeffs = Some((kind, block_lines(key, value)?));
        }
        Section::Extract => {
            partial.extract = fields_per_line(key, value, 2)?
                .into_iter()
                .map(|fields| {
                    let dim = fields[1]
                        .parse::<usize>()
                        .map_err(|_| invalid_number(key, &fields[1]))?;
                    Ok(ExtractDirective {
                        name: fields[0].clone(),
                        dim,
                    })
                })
                .collect::<std::result::Result<_, FixtureError>>()?;
        }
        Section::Natoms => {
            let text = expect_text(key, value)?;
            partial.natoms = Some(
                text.parse::<usize>()
                    .map_err(|_| invalid_number(key, &text))?,
            );
        }
        Section::InitEnergy => partial.init.energy = expect_f64(key, value)?,
        Section::InitStress => partial.init.stress = parse_stress(key, value)?,
        Section::InitForces => partial.init.forces = parse_forces(key, value)?,
        Section::RunEnergy => partial.run.energy = expect_f64(key, value)?,
        Section::RunStress => partial.run.stress = parse_stress(key, value)?,
        Section::RunForces => partial.run.forces = parse_forces(key, value)?,
    }
    Ok(())
}

/// A fixture tests exactly one style kind.
fn check_kind(partial: &PartialTestCase, kind: StyleKind) -> std::result::Result<(), FixtureError> {
    let existing = partial
        .style
        .as_ref()
        .map(|(k, _)| *k)
        .or_else(|| partial.coeffs.as_ref().map(|(k, _)| *k));
    match existing {
        Some(other) if other != kind => Err(FixtureError::ConflictingStyleKinds {
            first: other.style_key().to_string(),
            second: kind.style_key().to_string(),
        }),
        _ => Ok(()),
    }
}

/// Validate the collected sections and build the test case.
fn finish(partial: PartialTestCase) -> std::result::Result<TestCase, FixtureError> {
    let (style_kind, style_name) = partial
        .style
        .ok_or_else(|| FixtureError::MissingSection("<kind>_style".to_string()))?;
    let style_coeffs = partial.coeffs.map(|(_, lines)| lines).unwrap_or_default();

    let epsilon = partial
        .epsilon
        .ok_or_else(|| FixtureError::MissingSection("epsilon".to_string()))?;
    if !(epsilon > 0.0) {
        return Err(FixtureError::NonPositiveEpsilon(epsilon));
    }

    let input_file = partial
        .input_file
        .ok_or_else(|| FixtureError::MissingSection("input_file".to_string()))?;

    let natoms = partial.natoms.unwrap_or(0);
    for (section, snapshot) in [("init_forces", &partial.init), ("run_forces", &partial.run)] {
        if snapshot.forces.is_empty() {
            continue;
        }
        if snapshot.forces.len() != natoms {
            return Err(FixtureError::AtomCountMismatch {
                section: section.to_string(),
                natoms,
                found: snapshot.forces.len(),
            });
        }
        if let Some(id) = snapshot
            .forces
            .keys()
            .copied()
            .find(|id| *id == 0 || *id > natoms as AtomId)
        {
            return Err(FixtureError::InvalidAtomId {
                section: section.to_string(),
                id,
            });
        }
    }

    let basename = derive_basename(style_kind, &style_name, &style_coeffs);
    Ok(TestCase {
        engine_version: partial.engine_version,
        date_generated: partial.date_generated,
        epsilon,
        prerequisites: partial.prerequisites,
        pre_commands: partial.pre_commands,
        post_commands: partial.post_commands,
        input_file,
        style_kind,
        style_name,
        style_coeffs,
        extract: partial.extract,
        natoms,
        init: partial.init,
        run: partial.run,
        basename,
    })
}

/// Strip YAML tags such as the non-specific `!` in front of block scalars.
fn untag(value: &Value) -> &Value {
    match value {
        Value::Tagged(tagged) => untag(&tagged.value),
        other => other,
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match untag(value) {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn expect_text(key: &str, value: &Value) -> std::result::Result<String, FixtureError> {
    scalar_text(value)
        .map(|s| s.trim().to_string())
        .ok_or_else(|| FixtureError::WrongShape {
            section: key.to_string(),
            expected: "a scalar",
        })
}

fn expect_f64(key: &str, value: &Value) -> std::result::Result<f64, FixtureError> {
    match untag(value) {
        Value::Number(n) => n.as_f64().ok_or_else(|| invalid_number(key, &n.to_string())),
        Value::String(s) => parse_f64(key, s.trim()),
        _ => Err(FixtureError::WrongShape {
            section: key.to_string(),
            expected: "a number",
        }),
    }
}

fn parse_f64(key: &str, text: &str) -> std::result::Result<f64, FixtureError> {
    text.parse::<f64>().map_err(|_| invalid_number(key, text))
}

fn invalid_number(key: &str, text: &str) -> FixtureError {
    FixtureError::InvalidNumber {
        section: key.to_string(),
        value: text.to_string(),
    }
}

/// Non-empty, trimmed lines of a block section. `null` is an empty block.
fn block_lines(key: &str, value: &Value) -> std::result::Result<Vec<String>, FixtureError> {
    match untag(value) {
        Value::Null => Ok(Vec::new()),
        Value::Sequence(items) => items.iter().map(|item| expect_text(key, item)).collect(),
        other => {
            let text = scalar_text(other).ok_or_else(|| FixtureError::WrongShape {
                section: key.to_string(),
                expected: "a block of lines",
            })?;
            Ok(text
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_string)
                .collect())
        }
    }
}

/// Split every block line into exactly `expected` whitespace-separated fields.
fn fields_per_line(
    key: &str,
    value: &Value,
    expected: usize,
) -> std::result::Result<Vec<Vec<String>>, FixtureError> {
    block_lines(key, value)?
        .into_iter()
        .enumerate()
        .map(|(idx, line)| {
            let fields: Vec<String> = line.split_whitespace().map(str::to_string).collect();
            if fields.len() != expected {
                return Err(FixtureError::FieldCount {
                    section: key.to_string(),
                    line: idx + 1,
                    expected,
                    found: fields.len(),
                });
            }
            Ok(fields)
        })
        .collect()
}

fn parse_stress(key: &str, value: &Value) -> std::result::Result<Stress, FixtureError> {
    let text = block_lines(key, value)?.join(" ");
    let fields: Vec<&str> = text.split_whitespace().collect();
    if fields.len() != 6 {
        return Err(FixtureError::FieldCount {
            section: key.to_string(),
            line: 1,
            expected: 6,
            found: fields.len(),
        });
    }
    let mut components = [0.0; 6];
    for (slot, field) in components.iter_mut().zip(&fields) {
        *slot = parse_f64(key, field)?;
    }
    Ok(Stress::from_array(components))
}

fn parse_forces(key: &str, value: &Value) -> std::result::Result<ForceTable, FixtureError> {
    let mut forces = ForceTable::new();
    for fields in fields_per_line(key, value, 4)? {
        let id = fields[0]
            .parse::<AtomId>()
            .map_err(|_| invalid_number(key, &fields[0]))?;
        let force = [
            parse_f64(key, &fields[1])?,
            parse_f64(key, &fields[2])?,
            parse_f64(key, &fields[3])?,
        ];
        if forces.insert(id, force).is_some() {
            return Err(FixtureError::DuplicateAtom {
                section: key.to_string(),
                id,
            });
        }
    }
    Ok(forces)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ANGLE_FIXTURE: &str = r#"---
lammps_version: 24 Aug 2020
date_generated: Tue Sep 15 09:44:35 2020
epsilon: 2.5e-13
prerequisites: ! |
  atom full
  angle harmonic
pre_commands: ! ""
post_commands: ! ""
input_file: in.angles
angle_style: harmonic
angle_coeff: ! |
  1 75.0 110.1
  2 45.0 111.0
extract: ! |
  k 1
  theta0 1
natoms: 3
init_energy: 41.53081789649104
init_stress: ! |2-
   8.9723357320869297e+01 -8.7188643750026529e+01 -2.5347135708426610e+00  9.2043419883119782e+01  2.8187841258247503e+01 -2.2071649420135084e+00
init_forces: ! |2
    1  4.7390355473786949e+01  9.9371704753520520e+01 -1.7317935565931226e+00
    2 -4.7390355473786949e+01 -9.9371704753520520e+01  1.7317935565931226e+00
    3  0.0000000000000000e+00  0.0000000000000000e+00  0.0000000000000000e+00
run_energy: 41.2
run_stress: ! |2-
   1.0e+00  2.0e+00  3.0e+00  4.0e+00  5.0e+00  6.0e+00
run_forces: ! |2
    1  1.0e+00  0.0e+00  0.0e+00
    2 -1.0e+00  0.0e+00  0.0e+00
    3  0.0e+00  0.0e+00  0.0e+00
...
"#;

    #[test]
    fn test_parse_angle_fixture() {
        let case = parse_fixture(ANGLE_FIXTURE).unwrap();
        assert_eq!(case.style_kind, StyleKind::Angle);
        assert_eq!(case.style_name, "harmonic");
        assert_eq!(case.engine_version.as_deref(), Some("24 Aug 2020"));
        assert_eq!(case.epsilon, 2.5e-13);
        assert_eq!(case.prerequisites.len(), 2);
        assert_eq!(case.prerequisites[1].kind, "angle");
        assert_eq!(case.prerequisites[1].style, "harmonic");
        assert!(case.pre_commands.is_empty());
        assert_eq!(case.style_coeffs, vec!["1 75.0 110.1", "2 45.0 111.0"]);
        assert_eq!(case.extract[1].name, "theta0");
        assert_eq!(case.extract[1].dim, 1);
        assert_eq!(case.natoms, 3);
        assert_eq!(case.init.forces.len(), 3);
        assert_eq!(case.init.stress.xx, 8.9723357320869297e+01);
        assert_eq!(case.init.stress.yz, -2.2071649420135084e+00);
        assert_eq!(case.init.forces[&2][1], -9.9371704753520520e+01);
        assert_eq!(case.run.stress.xz, 5.0);
    }

    #[test]
    fn test_unknown_section_is_fatal() {
        let yaml = "epsilon: 1e-13\ninput_file: in.bonds\nbond_style: zero\nbond_stlye: harmonic\n";
        match parse_fixture(yaml) {
            Err(FixtureError::UnknownSection(name)) => assert_eq!(name, "bond_stlye"),
            other => panic!("expected unknown section error, got {:?}", other),
        }
    }

    #[test]
    fn test_stress_field_count() {
        let yaml = "epsilon: 1e-13\ninput_file: in.bonds\nbond_style: zero\ninit_stress: 1.0 2.0 3.0\n";
        assert!(matches!(
            parse_fixture(yaml),
            Err(FixtureError::FieldCount { expected: 6, found: 3, .. })
        ));
    }

    #[test]
    fn test_prerequisite_field_count() {
        let yaml = "epsilon: 1e-13\ninput_file: in.bonds\nbond_style: zero\nprerequisites: |\n  atom\n";
        assert!(matches!(
            parse_fixture(yaml),
            Err(FixtureError::FieldCount { expected: 2, found: 1, .. })
        ));
    }

    #[test]
    fn test_missing_style_and_bad_epsilon() {
        let yaml = "epsilon: 1e-13\ninput_file: in.bonds\n";
        assert!(matches!(
            parse_fixture(yaml),
            Err(FixtureError::MissingSection(_))
        ));

        let yaml = "epsilon: 0.0\ninput_file: in.bonds\nbond_style: zero\n";
        assert!(matches!(
            parse_fixture(yaml),
            Err(FixtureError::NonPositiveEpsilon(_))
        ));
    }

    #[test]
    fn test_conflicting_style_kinds() {
        let yaml = "epsilon: 1e-13\ninput_file: in.bonds\nbond_style: zero\nangle_coeff: \"* 1.0\"\n";
        assert!(matches!(
            parse_fixture(yaml),
            Err(FixtureError::ConflictingStyleKinds { .. })
        ));
    }

    #[test]
    fn test_force_block_must_match_natoms() {
        let yaml = r#"
epsilon: 1e-13
input_file: in.bonds
bond_style: zero
natoms: 3
init_forces: |2
    1 0.0 0.0 0.0
    2 0.0 0.0 0.0
"#;
        assert!(matches!(
            parse_fixture(yaml),
            Err(FixtureError::AtomCountMismatch { natoms: 3, found: 2, .. })
        ));
    }

    #[test]
    fn test_duplicate_and_zero_atom_ids() {
        let yaml = r#"
epsilon: 1e-13
input_file: in.bonds
bond_style: zero
natoms: 2
init_forces: |2
    1 0.0 0.0 0.0
    1 0.0 0.0 0.0
"#;
        assert!(matches!(
            parse_fixture(yaml),
            Err(FixtureError::DuplicateAtom { id: 1, .. })
        ));

        let yaml = r#"
epsilon: 1e-13
input_file: in.bonds
bond_style: zero
natoms: 2
init_forces: |2
    0 0.0 0.0 0.0
    1 0.0 0.0 0.0
"#;
        assert!(matches!(
            parse_fixture(yaml),
            Err(FixtureError::InvalidAtomId { id: 0, .. })
        ));
    }

    #[test]
    fn test_basename_is_deterministic_and_distinct() {
        let coeffs = vec!["1 250.0 1.5".to_string()];
        let a = derive_basename(StyleKind::Bond, "harmonic", &coeffs);
        let b = derive_basename(StyleKind::Bond, "harmonic", &coeffs);
        let c = derive_basename(StyleKind::Bond, "morse", &coeffs);
        let d = derive_basename(StyleKind::Bond, "hybrid harmonic morse", &coeffs);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with("bond-harmonic-"));
        assert!(d.starts_with("bond-hybrid_harmonic_morse-"));
    }

    #[test]
    fn test_parse_fixture_file_uses_stem() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("angle-harmonic.yaml");
        std::fs::write(&path, ANGLE_FIXTURE).unwrap();
        let case = parse_fixture_file(&path).unwrap();
        assert_eq!(case.basename, "angle-harmonic");
    }

    #[test]
    fn test_load_fixtures_from_dir_sorted() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.yaml"), ANGLE_FIXTURE).unwrap();
        std::fs::write(dir.path().join("a.yml"), ANGLE_FIXTURE).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();
        let loaded = load_fixtures_from_dir(dir.path()).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].1.basename, "a");
        assert_eq!(loaded[1].1.basename, "b");
    }
}
