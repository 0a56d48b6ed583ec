//! Pattern matching of atoms against ground facts.
//!
//! Variables are scoped to one formula, so a flat name → term map is
//! enough; no occurs check is needed because facts are always ground.

use std::collections::HashMap;

use crate::formula::Atom;
use crate::term::Term;

/// A substitution from variable names to (ground) terms.
pub type Bindings = HashMap<String, Term>;

/// Matches `pattern` against the ground atom `fact` under `bindings`.
///
/// Returns the extended substitution on success. The two atoms must
/// address the same table (name, modal); the policy qualifier is not
/// compared — resolution to a concrete table happens before matching.
#[must_use]
pub fn match_atom(pattern: &Atom, fact: &Atom, bindings: &Bindings) -> Option<Bindings> {
    if pattern.table != fact.table
        || pattern.modal != fact.modal
        || pattern.args.len() != fact.args.len()
    {
        return None;
    }
    let mut out = bindings.clone();
    for (pat, ground) in pattern.args.iter().zip(&fact.args) {
        match pat {
            Term::Constant(_) => {
                if pat != ground {
                    return None;
                }
            }
            Term::Variable(name) => match out.get(name) {
                Some(bound) => {
                    if bound != ground {
                        return None;
                    }
                }
                None => {
                    out.insert(name.clone(), ground.clone());
                }
            },
        }
    }
    Some(out)
}

/// Applies `bindings` to an atom, replacing bound variables.
#[must_use]
pub fn apply_atom(atom: &Atom, bindings: &Bindings) -> Atom {
    let mut out = atom.clone();
    for term in &mut out.args {
        if let Term::Variable(name) = term {
            if let Some(bound) = bindings.get(name) {
                *term = bound.clone();
            }
        }
    }
    out
}
