//! # Polity - A Multi-Policy Datalog Engine
//!
//! Polity hosts any number of named policies, each backed by a Datalog
//! theory, and evaluates queries that may reach across policy
//! boundaries. Updates are transactional batches; registered triggers
//! fire when the derivable content of a watched table actually changes;
//! a simulation mode answers "what would hold if" questions against a
//! scratch copy of the state.
//!
//! ## Core Concepts
//!
//! - **Policy**: a named theory — facts and rules with one of four
//!   evaluation disciplines ([`TheoryKind`])
//! - **Formula**: a fact or rule; rule bodies may reference other
//!   policies' tables (`other:q(x)`) and negate by failure
//! - **Event**: one insert or delete of a formula in a target policy
//! - **Trigger**: a callback on a qualified table, fired with the
//!   table's old and new result sets
//! - **Simulation**: speculative updates and action invocations,
//!   evaluated and then rolled back
//!
//! ## Usage
//!
//! ```rust,ignore
//! use polity::{Atom, Formula, Literal, Runtime, Term, TheoryKind};
//!
//! let mut run = Runtime::new();
//! run.create_policy("alice", TheoryKind::Nonrecursive)?;
//! run.insert(
//!     Formula::rule(
//!         Atom::new("p", vec![Term::var("x")]),
//!         vec![Literal::pos(Atom::new("q", vec![Term::var("x")]))],
//!     ),
//!     "alice",
//! );
//! run.insert(Formula::fact(Atom::new("q", vec![Term::int(1)])), "alice");
//! let answers = run.select(&Atom::new("p", vec![Term::var("x")]), "alice")?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Data model
pub mod error;
pub mod formula;
pub mod term;
pub mod unify;

// Engine
pub mod graph;
pub mod registry;
pub mod runtime;
pub mod simulate;
pub mod theory;

// Re-export primary types at crate root for convenience
pub use error::{EngineError, EngineResult, ValidationError};
pub use formula::{Atom, Event, Formula, Literal, Modal, QualifiedTable, Rule, TableKey};
pub use graph::DependencyGraph;
pub use registry::{Trigger, TriggerCallback, TriggerId, TriggerRegistry};
pub use runtime::{DanglingRefs, Runtime, UpdateResult};
pub use term::{Term, Value};
pub use theory::{
    ActionTheory, Database, ExternalPolicies, MaterializedTheory, NoExternalPolicies,
    NonrecursiveTheory, Theory, TheoryKind,
};
