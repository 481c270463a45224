//! Bonded style registry and interaction laws of the reference engine.

use std::collections::BTreeMap;

use crate::error::EngineError;
use crate::fixtures::types::{StyleKind, Vec3};

const ATOM_STYLES: &[&str] = &["atomic", "bond", "angle", "molecular", "full"];
const BOND_STYLES: &[&str] = &[
    "zero",
    "harmonic",
    "morse",
    "hybrid",
    "harmonic/omp",
    "morse/omp",
    "hybrid/omp",
];
const ANGLE_STYLES: &[&str] = &[
    "zero",
    "harmonic",
    "cosine",
    "hybrid",
    "harmonic/omp",
    "cosine/omp",
    "hybrid/omp",
];

/// Angles this close to 0 or 180 degrees use a clamped sine.
const SMALL: f64 = 0.001;

/// Whether `name` is a registered style of capability `kind`.
pub(crate) fn registered(kind: &str, name: &str) -> bool {
    let table = match kind {
        "atom" => ATOM_STYLES,
        "bond" => BOND_STYLES,
        "angle" => ANGLE_STYLES,
        _ => return false,
    };
    table.contains(&name)
}

/// Resolve a type range (`3`, `*`, `2*`, `*4`, `1*3`) against `ntypes`.
pub(crate) fn parse_type_range(text: &str, ntypes: usize) -> Result<(usize, usize), String> {
    let parse = |s: &str, default: usize| -> Result<usize, String> {
        if s.is_empty() {
            Ok(default)
        } else {
            s.parse::<usize>()
                .map_err(|_| format!("invalid type range '{}'", text))
        }
    };
    let (lo, hi) = match text.split_once('*') {
        Some((lo, hi)) => (parse(lo, 1)?, parse(hi, ntypes)?),
        None => {
            let single = parse(text, 0)?;
            (single, single)
        }
    };
    if lo == 0 || lo > hi || hi > ntypes {
        return Err(format!(
            "type range '{}' outside 1..={} or empty",
            text, ntypes
        ));
    }
    Ok((lo, hi))
}

/// Interaction law with its coefficients for one term type.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Law {
    /// Optional equilibrium distance is accepted and ignored
    BondZero,
    BondHarmonic { k: f64, r0: f64 },
    BondMorse { d0: f64, alpha: f64, r0: f64 },
    AngleZero,
    /// `theta0` in degrees, as written in the coefficient command
    AngleHarmonic { k: f64, theta0: f64 },
    AngleCosine { k: f64 },
}

impl Law {
    fn parse(kind: StyleKind, style: &str, args: &[String]) -> Result<Law, String> {
        let nums = args
            .iter()
            .map(|a| {
                a.parse::<f64>()
                    .map_err(|_| format!("invalid coefficient '{}'", a))
            })
            .collect::<Result<Vec<f64>, String>>()?;
        let expect = |n: usize| -> Result<(), String> {
            if nums.len() == n {
                Ok(())
            } else {
                Err(format!(
                    "{} {} expects {} coefficients, got {}",
                    kind,
                    style,
                    n,
                    nums.len()
                ))
            }
        };
        match (kind, style) {
            (StyleKind::Bond, "zero") if nums.len() <= 1 => Ok(Law::BondZero),
            (StyleKind::Bond, "harmonic") => {
                expect(2)?;
                Ok(Law::BondHarmonic {
                    k: nums[0],
                    r0: nums[1],
                })
            }
            (StyleKind::Bond, "morse") => {
                expect(3)?;
                Ok(Law::BondMorse {
                    d0: nums[0],
                    alpha: nums[1],
                    r0: nums[2],
                })
            }
            (StyleKind::Angle, "zero") if nums.len() <= 1 => Ok(Law::AngleZero),
            (StyleKind::Angle, "harmonic") => {
                expect(2)?;
                Ok(Law::AngleHarmonic {
                    k: nums[0],
                    theta0: nums[1],
                })
            }
            (StyleKind::Angle, "cosine") => {
                expect(1)?;
                Ok(Law::AngleCosine { k: nums[0] })
            }
            (_, "zero") => Err(format!("{} zero takes at most one coefficient", kind)),
            _ => Err(format!("no {} law named '{}'", kind, style)),
        }
    }

    /// Named coefficients this law exposes through extraction.
    fn extract_names(kind: StyleKind, style: &str) -> &'static [&'static str] {
        match (kind, style) {
            (StyleKind::Bond, "zero") => &["r0"],
            (StyleKind::Bond, "harmonic") => &["k", "r0"],
            (StyleKind::Bond, "morse") => &["d0", "alpha", "r0"],
            (StyleKind::Angle, "zero") => &["theta0"],
            (StyleKind::Angle, "harmonic") => &["k", "theta0"],
            (StyleKind::Angle, "cosine") => &["k"],
            _ => &[],
        }
    }
}

/// Contribution of one bonded term: forces on up to three atoms, energy and
/// virial.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Term {
    pub n: usize,
    pub atoms: [usize; 3],
    pub forces: [Vec3; 3],
    pub energy: f64,
    pub virial: [f64; 6],
}

fn sub(a: Vec3, b: Vec3) -> Vec3 {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

/// Two-body term between atoms at indices `i1`, `i2`.
pub(crate) fn bond_term(law: &Law, i1: usize, i2: usize, x1: Vec3, x2: Vec3) -> Term {
    let del = sub(x1, x2);
    let rsq = del[0] * del[0] + del[1] * del[1] + del[2] * del[2];
    let r = rsq.sqrt();

    let (fbond, energy) = match *law {
        Law::BondHarmonic { k, r0 } => {
            let dr = r - r0;
            let rk = k * dr;
            let fbond = if r > 0.0 { -2.0 * rk / r } else { 0.0 };
            (fbond, rk * dr)
        }
        Law::BondMorse { d0, alpha, r0 } => {
            let dr = r - r0;
            let ralpha = (-alpha * dr).exp();
            let fbond = if r > 0.0 {
                -2.0 * d0 * alpha * (1.0 - ralpha) * ralpha / r
            } else {
                0.0
            };
            (fbond, d0 * (1.0 - ralpha) * (1.0 - ralpha))
        }
        _ => (0.0, 0.0),
    };

    let f1 = [del[0] * fbond, del[1] * fbond, del[2] * fbond];
    Term {
        n: 2,
        atoms: [i1, i2, 0],
        forces: [f1, [-f1[0], -f1[1], -f1[2]], [0.0; 3]],
        energy,
        virial: [
            del[0] * del[0] * fbond,
            del[1] * del[1] * fbond,
            del[2] * del[2] * fbond,
            del[0] * del[1] * fbond,
            del[0] * del[2] * fbond,
            del[1] * del[2] * fbond,
        ],
    }
}

/// Three-body term with `i2` at the vertex.
pub(crate) fn angle_term(
    law: &Law,
    atoms: [usize; 3],
    x1: Vec3,
    x2: Vec3,
    x3: Vec3,
) -> Term {
    let d1 = sub(x1, x2);
    let d2 = sub(x3, x2);
    let rsq1 = d1[0] * d1[0] + d1[1] * d1[1] + d1[2] * d1[2];
    let rsq2 = d2[0] * d2[0] + d2[1] * d2[1] + d2[2] * d2[2];
    let r1 = rsq1.sqrt();
    let r2 = rsq2.sqrt();

    let mut c = (d1[0] * d2[0] + d1[1] * d2[1] + d1[2] * d2[2]) / (r1 * r2);
    c = c.clamp(-1.0, 1.0);

    let (energy, a11, a12, a22) = match *law {
        Law::AngleHarmonic { k, theta0 } => {
            let s = (1.0 - c * c).sqrt().max(SMALL);
            let dtheta = c.acos() - theta0.to_radians();
            let tk = k * dtheta;
            let a = -2.0 * tk / s;
            (tk * dtheta, a * c / rsq1, -a / (r1 * r2), a * c / rsq2)
        }
        Law::AngleCosine { k } => (k * (1.0 + c), k * c / rsq1, -k / (r1 * r2), k * c / rsq2),
        _ => (0.0, 0.0, 0.0, 0.0),
    };

    let mut f1 = [0.0; 3];
    let mut f3 = [0.0; 3];
    for axis in 0..3 {
        f1[axis] = a11 * d1[axis] + a12 * d2[axis];
        f3[axis] = a22 * d2[axis] + a12 * d1[axis];
    }
    let f2 = [
        -f1[0] - f3[0],
        -f1[1] - f3[1],
        -f1[2] - f3[2],
    ];

    Term {
        n: 3,
        atoms,
        forces: [f1, f2, f3],
        energy,
        virial: [
            d1[0] * f1[0] + d2[0] * f3[0],
            d1[1] * f1[1] + d2[1] * f3[1],
            d1[2] * f1[2] + d2[2] * f3[2],
            d1[0] * f1[1] + d2[0] * f3[1],
            d1[0] * f1[2] + d2[0] * f3[2],
            d1[1] * f1[2] + d2[1] * f3[2],
        ],
    }
}

/// One declared style: its resolved name, per-type laws and the coefficient
/// commands that produced them.
#[derive(Debug, Clone)]
pub(crate) struct StyleInstance {
    pub kind: StyleKind,
    /// Declaration as written, without suffix
    pub declared: String,
    /// Resolved name, with suffix when an accelerated variant exists
    pub name: String,
    substyles: Vec<String>,
    params: BTreeMap<usize, (String, Law)>,
    pub coeff_lines: Vec<String>,
    pub energy: f64,
    pub virial: [f64; 6],
}

impl StyleInstance {
    /// Declare a style from command arguments.
    pub fn declare(
        kind: StyleKind,
        args: &[String],
        suffix: Option<&str>,
    ) -> Result<Self, EngineError> {
        let base = args.first().ok_or_else(|| EngineError::InvalidCommand {
            command: kind.style_key().to_string(),
            reason: "missing style name".to_string(),
        })?;
        let unknown = |name: &str| EngineError::UnknownStyle {
            kind: kind.to_string(),
            name: name.to_string(),
        };
        if base.contains('/') || !registered(kind.as_str(), base) {
            return Err(unknown(base));
        }

        let substyles: Vec<String> = if base == "hybrid" {
            let subs = args[1..].to_vec();
            if subs.is_empty() {
                return Err(EngineError::InvalidCommand {
                    command: kind.style_key().to_string(),
                    reason: "hybrid needs at least one sub-style".to_string(),
                });
            }
            if let Some(bad) = subs
                .iter()
                .find(|s| *s == "hybrid" || s.contains('/') || !registered(kind.as_str(), s))
            {
                return Err(unknown(bad));
            }
            subs
        } else {
            Vec::new()
        };

        let name = match suffix {
            Some(sfx) if registered(kind.as_str(), &format!("{}/{}", base, sfx)) => {
                format!("{}/{}", base, sfx)
            }
            _ => base.clone(),
        };

        Ok(Self {
            kind,
            declared: args.join(" "),
            name,
            substyles,
            params: BTreeMap::new(),
            coeff_lines: Vec::new(),
            energy: 0.0,
            virial: [0.0; 6],
        })
    }

    /// Declared name without suffix or arguments.
    pub fn base(&self) -> &str {
        self.declared
            .split_whitespace()
            .next()
            .unwrap_or(&self.declared)
    }

    pub fn is_hybrid(&self) -> bool {
        self.base() == "hybrid"
    }

    /// Hybrid dispatch cannot be restored from a restart file alone.
    pub fn writes_coeffs(&self) -> bool {
        !self.is_hybrid()
    }

    /// Whether evaluation runs on the accelerated backend.
    pub fn accelerated(&self) -> bool {
        self.name.contains('/')
    }

    /// Apply a coefficient command for the types in the leading range.
    pub fn coeff(&mut self, args: &[String], ntypes: usize) -> Result<(), EngineError> {
        let invalid = |reason: String| EngineError::InvalidCommand {
            command: self.kind.coeff_key().to_string(),
            reason,
        };
        if ntypes == 0 {
            return Err(invalid(format!(
                "coefficients given before any {} types exist",
                self.kind
            )));
        }
        let range = args
            .first()
            .ok_or_else(|| invalid("missing type range".to_string()))?;
        let (lo, hi) = parse_type_range(range, ntypes).map_err(&invalid)?;

        let (sub, rest) = if self.is_hybrid() {
            let sub = args
                .get(1)
                .ok_or_else(|| invalid("hybrid coefficients need a sub-style".to_string()))?;
            if !self.substyles.contains(sub) {
                return Err(invalid(format!("'{}' is not a sub-style of this hybrid", sub)));
            }
            (sub.clone(), &args[2..])
        } else {
            (self.base().to_string(), &args[1..])
        };
        let law = Law::parse(self.kind, &sub, rest).map_err(&invalid)?;

        for t in lo..=hi {
            self.params.insert(t, (sub.clone(), law.clone()));
        }
        self.coeff_lines.push(args.join(" "));
        Ok(())
    }

    /// Law for a term type, if coefficients were set.
    pub fn law(&self, term_type: usize) -> Option<&Law> {
        self.params.get(&term_type).map(|(_, law)| law)
    }

    /// Dimensionality of a named coefficient; per-type coefficients are 1-D.
    pub fn extract(&self, name: &str) -> Option<usize> {
        if self.is_hybrid() {
            return None;
        }
        Law::extract_names(self.kind, self.base())
            .contains(&name)
            .then_some(1)
    }
}
