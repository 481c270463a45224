//! Command interpreter of the reference engine.
//!
//! Lines are stripped of comments, variables are substituted outside quotes,
//! the result is split into words (quoted words kept whole) and dispatched on
//! the first word.

use std::path::Path;
use std::sync::OnceLock;

use regex_lite::Regex;

use super::persist::{self, RestartImage};
use super::styles::{parse_type_range, registered, StyleInstance};
use super::{Compute, ReferenceEngine};
use crate::error::EngineError;
use crate::fixtures::types::StyleKind;

/// Nested `include` limit.
const MAX_INCLUDE_DEPTH: usize = 16;

fn variable_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\$\{([A-Za-z0-9_]+)\}|\$([A-Za-z0-9_])").expect("variable pattern is valid")
    })
}

fn invalid(command: &str, reason: impl Into<String>) -> EngineError {
    EngineError::InvalidCommand {
        command: command.to_string(),
        reason: reason.into(),
    }
}

/// Drop everything from the first `#` outside quotes.
pub(crate) fn strip_comment(line: &str) -> &str {
    let mut quote = None;
    for (idx, c) in line.char_indices() {
        match (quote, c) {
            (None, '\'' | '"') => quote = Some(c),
            (Some(q), _) if c == q => quote = None,
            (None, '#') => return &line[..idx],
            _ => {}
        }
    }
    line
}

/// Replace `${name}` and `$x` references outside quoted text.
pub(crate) fn substitute(
    line: &str,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<String, EngineError> {
    let mut out = String::with_capacity(line.len());
    let mut rest = line;
    while !rest.is_empty() {
        let quote_at = rest.find(['\'', '"']);
        let (plain, quoted) = match quote_at {
            Some(start) => {
                let q = rest[start..].chars().next().unwrap_or('"');
                let end = rest[start + 1..]
                    .find(q)
                    .map(|e| start + 1 + e + 1)
                    .unwrap_or(rest.len());
                (&rest[..start], &rest[start..end])
            }
            None => (rest, ""),
        };

        let mut last = 0;
        for caps in variable_pattern().captures_iter(plain) {
            let whole = caps.get(0).map(|m| (m.start(), m.end())).unwrap_or((0, 0));
            let name = caps
                .get(1)
                .or_else(|| caps.get(2))
                .map(|m| m.as_str())
                .unwrap_or("");
            let value =
                lookup(name).ok_or_else(|| EngineError::UndefinedVariable(name.to_string()))?;
            out.push_str(&plain[last..whole.0]);
            push_value(&mut out, &value);
            last = whole.1;
        }
        out.push_str(&plain[last..]);
        out.push_str(quoted);
        rest = &rest[plain.len() + quoted.len()..];
    }
    Ok(out)
}

/// Values containing whitespace are quoted so they stay one word.
fn push_value(out: &mut String, value: &str) {
    if !value.contains(char::is_whitespace) {
        out.push_str(value);
    } else if value.contains('\'') {
        out.push('"');
        out.push_str(value);
        out.push('"');
    } else {
        out.push('\'');
        out.push_str(value);
        out.push('\'');
    }
}

/// Split style arguments that arrived as one quoted word, as in
/// `bond_style ${bond_style}` with `hybrid harmonic morse`.
fn split_words(args: &[String]) -> Vec<String> {
    args.iter()
        .flat_map(|arg| arg.split_whitespace().map(str::to_string))
        .collect()
}

/// Split into words; quoted text forms one word without its quotes.
pub(crate) fn tokenize(line: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut quote = None;
    let mut in_word = false;
    for c in line.chars() {
        match (quote, c) {
            (None, '\'' | '"') => {
                quote = Some(c);
                in_word = true;
            }
            (Some(q), _) if c == q => quote = None,
            (None, c) if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            _ => {
                current.push(c);
                in_word = true;
            }
        }
    }
    if in_word {
        words.push(current);
    }
    words
}

fn parse_on_off(command: &str, word: &str) -> Result<bool, EngineError> {
    match word {
        "on" | "yes" => Ok(true),
        "off" | "no" => Ok(false),
        other => Err(invalid(command, format!("expected on/off, got '{}'", other))),
    }
}

fn parse_number<T: std::str::FromStr>(command: &str, word: &str) -> Result<T, EngineError> {
    word.parse::<T>()
        .map_err(|_| invalid(command, format!("invalid number '{}'", word)))
}

fn require<'a>(command: &str, args: &'a [String], n: usize) -> Result<&'a [String], EngineError> {
    if args.len() < n {
        return Err(invalid(
            command,
            format!("expected at least {} arguments, got {}", n, args.len()),
        ));
    }
    Ok(args)
}

impl ReferenceEngine {
    /// Execute one command line.
    pub(super) fn execute(&mut self, line: &str) -> Result<(), EngineError> {
        let line = strip_comment(line).trim();
        if line.is_empty() {
            return Ok(());
        }
        let expanded = substitute(line, |name| self.variables.get(name).cloned())?;
        let words = tokenize(&expanded);
        let Some((verb, args)) = words.split_first() else {
            return Ok(());
        };

        if log::log_enabled!(log::Level::Trace) {
            log::trace!("reference engine: {}", expanded);
        }

        match verb.as_str() {
            "variable" => self.cmd_variable(args),
            "include" => {
                let path = require(verb, args, 1)?;
                self.include(Path::new(&path[0]))
            }
            "units" => {
                self.units = require(verb, args, 1)?[0].clone();
                Ok(())
            }
            "atom_style" => {
                let name = &require(verb, args, 1)?[0];
                if !registered("atom", name) {
                    return Err(EngineError::UnknownStyle {
                        kind: "atom".to_string(),
                        name: name.clone(),
                    });
                }
                self.atom_style = name.clone();
                Ok(())
            }
            "newton" => {
                let args = require(verb, args, 1)?;
                let pair = parse_on_off(verb, &args[0])?;
                let bond = match args.get(1) {
                    Some(word) => parse_on_off(verb, word)?,
                    None => pair,
                };
                self.newton_pair = pair;
                self.newton_bond = bond;
                Ok(())
            }
            "timestep" => {
                self.timestep = parse_number(verb, &require(verb, args, 1)?[0])?;
                Ok(())
            }
            "mass" => self.cmd_mass(args),
            "read_data" => {
                let path = require(verb, args, 1)?;
                if !self.system.atoms.is_empty() {
                    return Err(invalid(verb, "cannot read data after atoms exist"));
                }
                self.system = persist::read_data(Path::new(&path[0]))?;
                self.reset_per_atom();
                Ok(())
            }
            "run" => {
                let steps: u64 = parse_number(verb, &require(verb, args, 1)?[0])?;
                self.run(steps)
            }
            "fix" => {
                let args = require(verb, args, 3)?;
                if args[2] != "nve" {
                    return Err(invalid(verb, format!("unsupported fix style '{}'", args[2])));
                }
                self.fixes.insert(args[0].clone(), args[2].clone());
                Ok(())
            }
            "unfix" => {
                let id = &require(verb, args, 1)?[0];
                self.fixes
                    .shift_remove(id)
                    .map(|_| ())
                    .ok_or_else(|| invalid(verb, format!("no fix with ID '{}'", id)))
            }
            "compute" => self.cmd_compute(args),
            "uncompute" => {
                let id = &require(verb, args, 1)?[0];
                self.computes
                    .shift_remove(id)
                    .map(|_| ())
                    .ok_or_else(|| invalid(verb, format!("no compute with ID '{}'", id)))
            }
            "thermo" | "thermo_style" | "thermo_modify" => Ok(()),
            "write_restart" => {
                let path = require(verb, args, 1)?;
                let image = self.restart_image();
                persist::write_restart(Path::new(&path[0]), &image)
            }
            "read_restart" => {
                let path = require(verb, args, 1)?;
                let image = persist::read_restart(Path::new(&path[0]))?;
                self.restore(image)
            }
            "write_data" => {
                let path = require(verb, args, 1)?;
                persist::write_data(Path::new(&path[0]), &self.system)
            }
            "write_coeff" => {
                let path = require(verb, args, 1)?;
                persist::write_coeff(Path::new(&path[0]), self.styles.values())
            }
            "clear" => {
                self.clear();
                Ok(())
            }
            other => {
                if let Some(kind) = StyleKind::from_style_key(other) {
                    self.cmd_style(kind, &split_words(args))
                } else if let Some(kind) = StyleKind::from_coeff_key(other) {
                    self.cmd_coeff(kind, &split_words(args))
                } else {
                    Err(EngineError::UnknownCommand(other.to_string()))
                }
            }
        }
    }

    /// Run every line of a script file, joining `&` continuation lines.
    fn include(&mut self, path: &Path) -> Result<(), EngineError> {
        if self.include_depth >= MAX_INCLUDE_DEPTH {
            return Err(invalid("include", "too many nested includes"));
        }
        let text = std::fs::read_to_string(path).map_err(|e| EngineError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        self.include_depth += 1;
        let mut pending = String::new();
        let mut result = Ok(());
        for raw in text.lines() {
            let trimmed = raw.trim_end();
            if let Some(head) = trimmed.strip_suffix('&') {
                pending.push_str(head);
                pending.push(' ');
                continue;
            }
            pending.push_str(trimmed);
            let line = std::mem::take(&mut pending);
            result = self.execute(&line);
            if result.is_err() {
                break;
            }
        }
        if result.is_ok() && !pending.trim().is_empty() {
            result = self.execute(&pending);
        }
        self.include_depth -= 1;
        result
    }

    fn cmd_variable(&mut self, args: &[String]) -> Result<(), EngineError> {
        let args = require("variable", args, 2)?;
        let name = &args[0];
        match args[1].as_str() {
            "delete" => {
                self.variables.shift_remove(name);
                Ok(())
            }
            // index: first definition wins, later ones are ignored
            "index" => {
                let value = require("variable", args, 3)?[2].clone();
                self.variables.entry(name.clone()).or_insert(value);
                Ok(())
            }
            "string" => {
                let value = require("variable", args, 3)?[2].clone();
                self.variables.insert(name.clone(), value);
                Ok(())
            }
            other => Err(invalid(
                "variable",
                format!("unsupported variable style '{}'", other),
            )),
        }
    }

    fn cmd_mass(&mut self, args: &[String]) -> Result<(), EngineError> {
        let args = require("mass", args, 2)?;
        let (lo, hi) =
            parse_type_range(&args[0], self.system.atom_types).map_err(|e| invalid("mass", e))?;
        let mass: f64 = parse_number("mass", &args[1])?;
        if mass <= 0.0 {
            return Err(invalid("mass", "mass must be positive"));
        }
        for t in lo..=hi {
            self.system.masses.insert(t, mass);
        }
        Ok(())
    }

    fn cmd_compute(&mut self, args: &[String]) -> Result<(), EngineError> {
        let args = require("compute", args, 3)?;
        let compute = match args[2].as_str() {
            "pe/atom" => Compute::PeAtom,
            "reduce" => {
                let args = require("compute", args, 5)?;
                if args[3] != "sum" {
                    return Err(invalid("compute", format!("unsupported reduction '{}'", args[3])));
                }
                let source = args[4]
                    .strip_prefix("c_")
                    .ok_or_else(|| invalid("compute", "reduce input must be c_ID"))?;
                Compute::ReduceSum {
                    source: source.to_string(),
                }
            }
            other => return Err(invalid("compute", format!("unsupported compute '{}'", other))),
        };
        self.computes.insert(args[0].clone(), compute);
        Ok(())
    }

    fn cmd_style(&mut self, kind: StyleKind, args: &[String]) -> Result<(), EngineError> {
        let style = StyleInstance::declare(kind, args, self.backend.suffix())?;
        if log::log_enabled!(log::Level::Debug) {
            log::debug!("{} resolved to {}", kind.style_key(), style.name);
        }
        self.styles.insert(kind, style);
        Ok(())
    }

    fn cmd_coeff(&mut self, kind: StyleKind, args: &[String]) -> Result<(), EngineError> {
        let ntypes = self.system.types_for(kind);
        let style = self.styles.get_mut(&kind).ok_or_else(|| {
            invalid(
                kind.coeff_key(),
                format!("{} must be set first", kind.style_key()),
            )
        })?;
        style.coeff(args, ntypes)
    }

    fn restart_image(&self) -> RestartImage {
        RestartImage {
            format: RestartImage::format_tag(),
            units: self.units.clone(),
            atom_style: self.atom_style.clone(),
            newton_pair: self.newton_pair,
            newton_bond: self.newton_bond,
            timestep: self.timestep,
            step: self.step,
            system: self.system.clone(),
            styles: self.styles.values().map(RestartImage::style_entry).collect(),
        }
    }

    fn restore(&mut self, image: RestartImage) -> Result<(), EngineError> {
        if !self.system.atoms.is_empty() {
            return Err(invalid("read_restart", "cannot read restart after atoms exist"));
        }
        self.units = image.units;
        self.atom_style = image.atom_style;
        self.newton_pair = image.newton_pair;
        self.newton_bond = image.newton_bond;
        self.timestep = image.timestep;
        self.step = image.step;
        self.system = image.system;
        self.reset_per_atom();

        for entry in image.styles {
            let args = tokenize(&entry.declared);
            let mut style = StyleInstance::declare(entry.kind, &args, self.backend.suffix())?;
            let ntypes = self.system.types_for(entry.kind);
            for line in entry.coeffs.unwrap_or_default() {
                style.coeff(&tokenize(&line), ntypes)?;
            }
            self.styles.insert(entry.kind, style);
        }
        Ok(())
    }
}
