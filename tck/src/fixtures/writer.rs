//! YAML fixture emission.
//!
//! Output is formatted by hand so that section order, literal blocks and the
//! fixed-width scientific notation of the golden values stay stable across
//! regenerations and diff cleanly.

use std::io::Write as _;
use std::path::Path;

use anyhow::{Context, Result};
use serde_yaml::Value;

use super::types::{Snapshot, Stress, StyleKind, TestCase};

/// Format a value like C's `% 23.16e`: sign slot, 17 significant digits,
/// signed two-digit exponent, right-aligned to 23 columns.
pub fn format_float(value: f64) -> String {
    let raw = format!("{:.16e}", value);
    let body = match raw.split_once('e') {
        Some((mantissa, exponent)) => {
            let exp: i32 = exponent.parse().unwrap_or(0);
            let sign = if exp < 0 { '-' } else { '+' };
            format!("{}e{}{:02}", mantissa, sign, exp.unsigned_abs())
        }
        // NaN and infinities carry no exponent
        None => raw,
    };
    if body.starts_with('-') {
        format!("{:>23}", body)
    } else {
        format!("{:>23}", format!(" {}", body))
    }
}

/// Render a test case as fixture YAML, sections in canonical order.
pub fn to_yaml(case: &TestCase) -> String {
    let mut yaml = String::new();
    yaml.push_str("---\n");

    if let Some(version) = &case.engine_version {
        yaml.push_str(&format!("engine_version: {}\n", scalar(version)));
    }
    if let Some(date) = &case.date_generated {
        yaml.push_str(&format!("date_generated: {}\n", scalar(date)));
    }
    yaml.push_str(&format!("epsilon: {:e}\n", case.epsilon));

    let prerequisites: Vec<String> = case
        .prerequisites
        .iter()
        .map(|p| format!("{} {}", p.kind, p.style))
        .collect();
    push_block(&mut yaml, "prerequisites", &prerequisites, false);
    push_block(&mut yaml, "pre_commands", &case.pre_commands, false);
    push_block(&mut yaml, "post_commands", &case.post_commands, false);
    yaml.push_str(&format!("input_file: {}\n", scalar(&case.input_file)));

    push_style(&mut yaml, case.style_kind, &case.style_name, &case.style_coeffs);

    let extract: Vec<String> = case
        .extract
        .iter()
        .map(|e| format!("{} {}", e.name, e.dim))
        .collect();
    push_block(&mut yaml, "extract", &extract, false);
    yaml.push_str(&format!("natoms: {}\n", case.natoms));

    push_snapshot(&mut yaml, "init", &case.init);
    push_snapshot(&mut yaml, "run", &case.run);

    yaml.push_str("...\n");
    yaml
}

/// Write a test case to a YAML file, creating parent directories.
///
/// The text goes to a temporary file in the target directory first and is
/// renamed into place, so an existing fixture is never left truncated.
pub fn write_yaml(case: &TestCase, path: &Path) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent)
        .with_context(|| format!("Failed to create directory: {}", parent.display()))?;

    let mut staged = tempfile::NamedTempFile::new_in(parent)
        .with_context(|| format!("Failed to create temporary file in {}", parent.display()))?;
    staged
        .write_all(to_yaml(case).as_bytes())
        .with_context(|| format!("Failed to write fixture file: {}", path.display()))?;
    staged
        .persist(path)
        .with_context(|| format!("Failed to replace fixture file: {}", path.display()))?;
    Ok(())
}

fn push_style(yaml: &mut String, kind: StyleKind, name: &str, coeffs: &[String]) {
    yaml.push_str(&format!("{}: {}\n", kind.style_key(), scalar(name)));
    push_block(yaml, kind.coeff_key(), coeffs, false);
}

fn push_snapshot(yaml: &mut String, stage: &str, snapshot: &Snapshot) {
    yaml.push_str(&format!(
        "{}_energy: {}\n",
        stage,
        format_float(snapshot.energy).trim_start()
    ));
    push_block(
        yaml,
        &format!("{}_stress", stage),
        &[stress_line(&snapshot.stress)],
        true,
    );
    let forces: Vec<String> = snapshot
        .forces
        .iter()
        .map(|(id, f)| {
            format!(
                "{:>3} {} {} {}",
                id,
                format_float(f[0]),
                format_float(f[1]),
                format_float(f[2])
            )
        })
        .collect();
    push_block(yaml, &format!("{}_forces", stage), &forces, false);
}

fn stress_line(stress: &Stress) -> String {
    stress
        .to_array()
        .iter()
        .map(|v| format_float(*v))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Literal block with an explicit indentation indicator, so lines that start
/// with padding keep it.
fn push_block(yaml: &mut String, key: &str, lines: &[String], strip: bool) {
    if lines.is_empty() {
        yaml.push_str(&format!("{}: \"\"\n", key));
        return;
    }
    yaml.push_str(&format!("{}: |2{}\n", key, if strip { "-" } else { "" }));
    for line in lines {
        yaml.push_str("  ");
        yaml.push_str(line);
        yaml.push('\n');
    }
}

/// Plain scalar when it reads back unchanged, double-quoted otherwise.
fn scalar(text: &str) -> String {
    match serde_yaml::from_str::<Value>(text) {
        Ok(Value::String(parsed)) if parsed == text => text.to_string(),
        _ => serde_json::to_string(text).unwrap_or_else(|_| format!("\"{}\"", text)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::parser::parse_fixture;
    use crate::fixtures::types::{ExtractDirective, ForceTable, Prerequisite};

    #[test]
    fn test_format_float_matches_c_layout() {
        assert_eq!(format_float(0.0), " 0.0000000000000000e+00");
        assert_eq!(format_float(-1.5), "-1.5000000000000000e+00");
        assert_eq!(format_float(0.25), " 2.5000000000000000e-01");
        assert_eq!(format_float(2.5e-13), " 2.4999999999999999e-13");
        assert_eq!(format_float(41.5).len(), 23);
        assert_eq!(format_float(1e100), " 1.0000000000000000e+100");
    }

    #[test]
    fn test_scalar_quoting() {
        assert_eq!(scalar("harmonic"), "harmonic");
        assert_eq!(scalar("in.bonds"), "in.bonds");
        assert_eq!(scalar("1.0"), "\"1.0\"");
        assert_eq!(scalar("true"), "\"true\"");
        assert_eq!(scalar("a: b"), "\"a: b\"");
    }

    #[test]
    fn test_to_yaml_reparses_exactly() {
        let mut forces = ForceTable::new();
        forces.insert(1, [0.0, 1.5, 0.0]);
        forces.insert(2, [0.0, -1.5, 1.0 / 3.0]);
        forces.insert(3, [-2.0e-7, 3.0e12, -0.0]);
        let case = TestCase {
            engine_version: Some("1 Jan 2026".to_string()),
            date_generated: Some("Thu Jan  1 00:00:00 2026".to_string()),
            epsilon: 2.5e-13,
            prerequisites: vec![Prerequisite {
                kind: "bond".to_string(),
                style: "harmonic".to_string(),
            }],
            pre_commands: vec!["variable newton_bond delete".to_string()],
            post_commands: vec![],
            input_file: "in.bonds".to_string(),
            style_kind: StyleKind::Bond,
            style_name: "harmonic".to_string(),
            style_coeffs: vec!["1 1.5 1.0".to_string(), "2 2.0 1.2".to_string()],
            extract: vec![ExtractDirective {
                name: "k".to_string(),
                dim: 1,
            }],
            natoms: 3,
            init: Snapshot {
                energy: 0.375,
                stress: Stress::from_array([0.0, -2.25, 0.0, 1e-300, -0.1, 7.0]),
                forces: forces.clone(),
            },
            run: Snapshot {
                energy: 0.1 + 0.2,
                stress: Stress::default(),
                forces,
            },
            basename: "bond-harmonic".to_string(),
        };

        let yaml = to_yaml(&case);
        let parsed = parse_fixture(&yaml).unwrap();
        assert_eq!(parsed.engine_version, case.engine_version);
        assert_eq!(parsed.date_generated, case.date_generated);
        assert_eq!(parsed.epsilon, case.epsilon);
        assert_eq!(parsed.prerequisites, case.prerequisites);
        assert_eq!(parsed.pre_commands, case.pre_commands);
        assert_eq!(parsed.style_coeffs, case.style_coeffs);
        assert_eq!(parsed.extract, case.extract);
        assert_eq!(parsed.init, case.init);
        assert_eq!(parsed.run, case.run);
    }

    #[test]
    fn test_write_yaml_creates_parent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("bond-zero.yaml");
        let case = TestCase {
            engine_version: None,
            date_generated: None,
            epsilon: 1e-14,
            prerequisites: vec![],
            pre_commands: vec![],
            post_commands: vec![],
            input_file: "in.bonds".to_string(),
            style_kind: StyleKind::Bond,
            style_name: "zero".to_string(),
            style_coeffs: vec!["*".to_string()],
            extract: vec![],
            natoms: 0,
            init: Snapshot::default(),
            run: Snapshot::default(),
            basename: "bond-zero".to_string(),
        };
        write_yaml(&case, &path).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("bond_style: zero"));
        assert!(content.contains("bond_coeff: |2\n  *\n"));
    }
}
