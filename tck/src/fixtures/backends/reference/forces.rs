//! Force, energy and virial accumulation for one style.
//!
//! With newton on every term is tallied whole. With newton off each atom of a
//! term tallies its own share of energy and virial, and terms are visited in
//! reverse. On the accelerated backend terms are split into contiguous chunks,
//! each worker fills a private accumulator and the chunks are reduced in order.
//! All three paths give the same physics and differ only in rounding.

use std::collections::HashMap;

use super::styles::{angle_term, bond_term, Law, StyleInstance, Term};
use super::system::System;
use crate::error::EngineError;
use crate::fixtures::types::{AtomId, StyleKind, Vec3};

#[derive(Debug, Clone)]
pub(crate) struct Accumulator {
    pub forces: Vec<Vec3>,
    pub eatom: Vec<f64>,
    pub energy: f64,
    pub virial: [f64; 6],
}

impl Accumulator {
    pub fn new(natoms: usize) -> Self {
        Self {
            forces: vec![[0.0; 3]; natoms],
            eatom: vec![0.0; natoms],
            energy: 0.0,
            virial: [0.0; 6],
        }
    }

    fn tally(&mut self, term: &Term, newton: bool) {
        let share = 1.0 / term.n as f64;
        if newton {
            self.energy += term.energy;
            for (v, tv) in self.virial.iter_mut().zip(term.virial) {
                *v += tv;
            }
        }
        for slot in 0..term.n {
            let idx = term.atoms[slot];
            for axis in 0..3 {
                self.forces[idx][axis] += term.forces[slot][axis];
            }
            self.eatom[idx] += share * term.energy;
            if !newton {
                self.energy += share * term.energy;
                for (v, tv) in self.virial.iter_mut().zip(term.virial) {
                    *v += share * tv;
                }
            }
        }
    }

    /// Add another accumulator into this one.
    pub fn absorb(&mut self, other: &Accumulator) {
        for (f, of) in self.forces.iter_mut().zip(&other.forces) {
            for axis in 0..3 {
                f[axis] += of[axis];
            }
        }
        for (e, oe) in self.eatom.iter_mut().zip(&other.eatom) {
            *e += oe;
        }
        self.energy += other.energy;
        for (v, ov) in self.virial.iter_mut().zip(other.virial) {
            *v += ov;
        }
    }
}

/// A term resolved to its law and atom storage indices.
struct Resolved<'a> {
    law: &'a Law,
    n: usize,
    atoms: [usize; 3],
}

fn resolve<'a>(
    style: &'a StyleInstance,
    system: &System,
    index: &HashMap<AtomId, usize>,
) -> Result<Vec<Resolved<'a>>, EngineError> {
    let kind = style.kind;
    system
        .terms_for(kind)
        .iter()
        .map(|term| {
            let law = style.law(term.term_type).ok_or_else(|| {
                EngineError::NotReady(format!(
                    "{} coefficients for type {} are not set",
                    kind, term.term_type
                ))
            })?;
            let mut atoms = [0usize; 3];
            for (slot, id) in term.atoms.iter().enumerate().take(3) {
                atoms[slot] = *index.get(id).ok_or_else(|| {
                    EngineError::NotReady(format!("{} references unknown atom {}", kind, id))
                })?;
            }
            Ok(Resolved {
                law,
                n: term.atoms.len().min(3),
                atoms,
            })
        })
        .collect()
}

fn evaluate_chunk(
    kind: StyleKind,
    terms: &[Resolved<'_>],
    x: &[Vec3],
    newton: bool,
) -> Accumulator {
    let mut acc = Accumulator::new(x.len());
    let visit = |acc: &mut Accumulator, r: &Resolved<'_>| {
        let term = match kind {
            StyleKind::Bond => bond_term(r.law, r.atoms[0], r.atoms[1], x[r.atoms[0]], x[r.atoms[1]]),
            _ => angle_term(
                r.law,
                r.atoms,
                x[r.atoms[0]],
                x[r.atoms[1]],
                x[r.atoms[2]],
            ),
        };
        debug_assert_eq!(term.n, r.n);
        acc.tally(&term, newton);
    };
    if newton {
        terms.iter().for_each(|r| visit(&mut acc, r));
    } else {
        terms.iter().rev().for_each(|r| visit(&mut acc, r));
    }
    acc
}

/// Evaluate every term of one style.
pub(crate) fn evaluate_style(
    style: &StyleInstance,
    system: &System,
    index: &HashMap<AtomId, usize>,
    newton: bool,
    threads: usize,
) -> Result<Accumulator, EngineError> {
    let terms = resolve(style, system, index)?;
    let x = system.positions();

    if !style.accelerated() || threads <= 1 || terms.len() < 2 {
        return Ok(evaluate_chunk(style.kind, &terms, &x, newton));
    }

    let chunk = terms.len().div_ceil(threads);
    let kind = style.kind;
    let partials = std::thread::scope(|scope| {
        let handles: Vec<_> = terms
            .chunks(chunk)
            .map(|part| {
                let x = &x;
                scope.spawn(move || evaluate_chunk(kind, part, x, newton))
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join())
            .collect::<Result<Vec<_>, _>>()
    })
    .map_err(|_| EngineError::NotReady("force worker panicked".to_string()))?;

    let mut total = Accumulator::new(x.len());
    for partial in &partials {
        total.absorb(partial);
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::backends::reference::system::{Atom, Bonded};

    fn chain(n: usize) -> System {
        let atoms = (0..n)
            .map(|i| Atom {
                id: i as AtomId + 1,
                atom_type: 1,
                x: [
                    1.1 * i as f64,
                    0.3 * ((i * 7) % 5) as f64,
                    0.2 * ((i * 3) % 4) as f64,
                ],
                v: [0.0; 3],
            })
            .collect();
        let bonds = (1..n)
            .map(|i| Bonded {
                term_type: 1,
                atoms: vec![i as AtomId, i as AtomId + 1],
            })
            .collect();
        let angles = (2..n)
            .map(|i| Bonded {
                term_type: 1,
                atoms: vec![i as AtomId - 1, i as AtomId, i as AtomId + 1],
            })
            .collect();
        System {
            atoms,
            atom_types: 1,
            bond_types: 1,
            angle_types: 1,
            masses: Default::default(),
            bonds,
            angles,
        }
    }

    fn style(kind: StyleKind, name: &str, coeff: &[&str], suffix: Option<&str>) -> StyleInstance {
        let mut style = StyleInstance::declare(kind, &[name.to_string()], suffix).unwrap();
        let args: Vec<String> = coeff.iter().map(|s| s.to_string()).collect();
        style.coeff(&args, 1).unwrap();
        style
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() <= 1e-10 * (1.0 + a.abs().max(b.abs()))
    }

    #[test]
    fn test_newton_modes_agree() {
        let system = chain(12);
        let index = system.index();
        let bonds = style(StyleKind::Bond, "harmonic", &["*", "250.0", "1.2"], None);
        let on = evaluate_style(&bonds, &system, &index, true, 1).unwrap();
        let off = evaluate_style(&bonds, &system, &index, false, 1).unwrap();
        assert!(close(on.energy, off.energy));
        for (a, b) in on.virial.iter().zip(off.virial) {
            assert!(close(*a, b));
        }
        for (fa, fb) in on.forces.iter().zip(&off.forces) {
            for axis in 0..3 {
                assert!(close(fa[axis], fb[axis]));
            }
        }
    }

    #[test]
    fn test_threaded_matches_serial() {
        let system = chain(30);
        let index = system.index();
        let serial = style(StyleKind::Angle, "harmonic", &["*", "75.0", "110.1"], None);
        let threaded = style(StyleKind::Angle, "harmonic", &["*", "75.0", "110.1"], Some("omp"));
        assert!(threaded.accelerated());
        let a = evaluate_style(&serial, &system, &index, true, 1).unwrap();
        let b = evaluate_style(&threaded, &system, &index, true, 4).unwrap();
        assert!(close(a.energy, b.energy));
        let eatom_sum: f64 = b.eatom.iter().sum();
        assert!(close(eatom_sum, b.energy));
        for (fa, fb) in a.forces.iter().zip(&b.forces) {
            for axis in 0..3 {
                assert!(close(fa[axis], fb[axis]));
            }
        }
    }

    #[test]
    fn test_missing_coefficients() {
        let system = chain(3);
        let index = system.index();
        let bare = StyleInstance::declare(StyleKind::Bond, &["morse".to_string()], None).unwrap();
        assert!(matches!(
            evaluate_style(&bare, &system, &index, true, 1),
            Err(EngineError::NotReady(_))
        ));
    }
}
