//! Formulas: atoms, literals, rules, and the events that carry them.
//!
//! An [`Atom`] may be qualified with the name of another policy (a
//! cross-policy table reference) and may carry an update marker
//! ([`Modal`]) denoting an insertion/deletion action rather than a
//! plain fact. These types are intentionally serializable so formulas
//! can be represented in IR payloads.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::term::Term;

/// Update marker on a table name: `+` denotes insertion, `-` deletion.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Modal {
    /// `table+(…)` — the atom describes an insertion action.
    Insert,
    /// `table-(…)` — the atom describes a deletion action.
    Delete,
}

impl Modal {
    /// The suffix character used in the textual form.
    #[must_use]
    pub const fn suffix(self) -> char {
        match self {
            Self::Insert => '+',
            Self::Delete => '-',
        }
    }
}

impl fmt::Display for Modal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.suffix())
    }
}

/// The storage key of a table inside one theory: qualifier, base table
/// name, and update marker. Two atoms address the same stored table iff
/// their keys are equal.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TableKey {
    /// Policy qualifier, if the atom names another policy's table.
    pub policy: Option<String>,
    /// Base table name without any modal suffix.
    pub table: String,
    /// Update marker, if any.
    pub modal: Option<Modal>,
}

impl fmt::Display for TableKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(policy) = &self.policy {
            write!(f, "{policy}:")?;
        }
        write!(f, "{}", self.table)?;
        if let Some(modal) = self.modal {
            write!(f, "{modal}")?;
        }
        Ok(())
    }
}

/// The global addressing unit for the dependency graph and trigger
/// registry: a `(policy, table)` pair, where `table` keeps its modal
/// suffix so `p` and `p+` are distinct nodes.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct QualifiedTable {
    /// Owning (or referenced) policy name.
    pub policy: String,
    /// Table name, modal suffix included.
    pub table: String,
}

impl QualifiedTable {
    /// Builds a qualified table from raw parts.
    pub fn new(policy: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            policy: policy.into(),
            table: table.into(),
        }
    }
}

impl fmt::Display for QualifiedTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.policy, self.table)
    }
}

/// A predicate applied to an ordered sequence of terms.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Atom {
    /// Policy qualifier; `None` means the theory holding the formula.
    pub policy: Option<String>,
    /// Base table name.
    pub table: String,
    /// Update marker, if this atom denotes an action.
    pub modal: Option<Modal>,
    /// Arguments; arity is `args.len()`.
    pub args: Vec<Term>,
}

impl Atom {
    /// An unqualified plain atom.
    pub fn new(table: impl Into<String>, args: Vec<Term>) -> Self {
        Self {
            policy: None,
            table: table.into(),
            modal: None,
            args,
        }
    }

    /// Returns this atom qualified by a policy name.
    #[must_use]
    pub fn qualified(mut self, policy: impl Into<String>) -> Self {
        self.policy = Some(policy.into());
        self
    }

    /// Returns this atom carrying an update marker.
    #[must_use]
    pub const fn with_modal(mut self, modal: Modal) -> Self {
        self.modal = Some(modal);
        self
    }

    /// Arity of the atom.
    #[must_use]
    pub fn arity(&self) -> usize {
        self.args.len()
    }

    /// True when every argument is a constant.
    #[must_use]
    pub fn is_ground(&self) -> bool {
        self.args.iter().all(Term::is_constant)
    }

    /// The local storage key this atom addresses.
    #[must_use]
    pub fn key(&self) -> TableKey {
        TableKey {
            policy: self.policy.clone(),
            table: self.table.clone(),
            modal: self.modal,
        }
    }

    /// Table name with its modal suffix, as used in graph node names.
    #[must_use]
    pub fn table_with_modal(&self) -> String {
        match self.modal {
            Some(modal) => format!("{}{}", self.table, modal.suffix()),
            None => self.table.clone(),
        }
    }

    /// The graph node this atom addresses, defaulting the qualifier to
    /// `default_policy`.
    #[must_use]
    pub fn qualified_table(&self, default_policy: &str) -> QualifiedTable {
        QualifiedTable {
            policy: self
                .policy
                .clone()
                .unwrap_or_else(|| default_policy.to_string()),
            table: self.table_with_modal(),
        }
    }

    /// Collects variable names into `out`.
    pub fn collect_variables(&self, out: &mut BTreeSet<String>) {
        for term in &self.args {
            if let Term::Variable(name) = term {
                out.insert(name.clone());
            }
        }
    }

    /// Same atom without any update marker.
    #[must_use]
    pub fn without_modal(&self) -> Self {
        let mut atom = self.clone();
        atom.modal = None;
        atom
    }

    /// Same atom without any policy qualifier.
    #[must_use]
    pub fn without_policy(&self) -> Self {
        let mut atom = self.clone();
        atom.policy = None;
        atom
    }
}

impl fmt::Display for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.key())?;
        for (i, arg) in self.args.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{arg}")?;
        }
        write!(f, ")")
    }
}

/// An atom with a polarity: positive or negated-by-failure.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Literal {
    /// The underlying atom.
    pub atom: Atom,
    /// True for negation-as-failure literals.
    pub negated: bool,
}

impl Literal {
    /// A positive literal.
    #[must_use]
    pub const fn pos(atom: Atom) -> Self {
        Self {
            atom,
            negated: false,
        }
    }

    /// A negated literal.
    #[must_use]
    pub const fn neg(atom: Atom) -> Self {
        Self {
            atom,
            negated: true,
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.negated {
            write!(f, "not ")?;
        }
        write!(f, "{}", self.atom)
    }
}

/// A head atom derived from an ordered sequence of body literals.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Rule {
    /// Derived atom.
    pub head: Atom,
    /// Body literals, evaluated as a conjunction.
    pub body: Vec<Literal>,
}

impl Rule {
    /// Builds a rule. The body must be non-empty; empty-body rules are
    /// represented as [`Formula::Fact`].
    #[must_use]
    pub const fn new(head: Atom, body: Vec<Literal>) -> Self {
        Self { head, body }
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} :- ", self.head)?;
        for (i, lit) in self.body.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{lit}")?;
        }
        Ok(())
    }
}

/// A fact or a rule — the unit of theory content.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Formula {
    /// A ground (or groundable) atom asserted as data.
    Fact(Atom),
    /// A derivation rule.
    Rule(Rule),
}

impl Formula {
    /// A fact formula.
    #[must_use]
    pub const fn fact(atom: Atom) -> Self {
        Self::Fact(atom)
    }

    /// A rule formula; an empty body is normalized to a fact.
    #[must_use]
    pub fn rule(head: Atom, body: Vec<Literal>) -> Self {
        if body.is_empty() {
            Self::Fact(head)
        } else {
            Self::Rule(Rule::new(head, body))
        }
    }

    /// The head atom: the atom itself for facts, the rule head otherwise.
    #[must_use]
    pub const fn head(&self) -> &Atom {
        match self {
            Self::Fact(atom) => atom,
            Self::Rule(rule) => &rule.head,
        }
    }

    /// True if this formula is a rule.
    #[must_use]
    pub const fn is_rule(&self) -> bool {
        matches!(self, Self::Rule(_))
    }

    /// The rule, if this formula is one.
    #[must_use]
    pub const fn as_rule(&self) -> Option<&Rule> {
        match self {
            Self::Rule(rule) => Some(rule),
            Self::Fact(_) => None,
        }
    }
}

impl fmt::Display for Formula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fact(atom) => write!(f, "{atom}"),
            Self::Rule(rule) => write!(f, "{rule}"),
        }
    }
}

impl From<Atom> for Formula {
    fn from(atom: Atom) -> Self {
        Self::Fact(atom)
    }
}

impl From<Rule> for Formula {
    fn from(rule: Rule) -> Self {
        Self::Rule(rule)
    }
}

/// The unit of mutation: a formula, an insert/delete flag, and the name
/// of the policy it applies to. A submitted batch is a sequence of
/// events applied together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// The formula being inserted or deleted.
    pub formula: Formula,
    /// True for insertion, false for deletion.
    pub insert: bool,
    /// Target policy name.
    pub target: String,
}

impl Event {
    /// An insertion event.
    pub fn insert(formula: Formula, target: impl Into<String>) -> Self {
        Self {
            formula,
            insert: true,
            target: target.into(),
        }
    }

    /// A deletion event.
    pub fn delete(formula: Formula, target: impl Into<String>) -> Self {
        Self {
            formula,
            insert: false,
            target: target.into(),
        }
    }

    /// The graph node changed by this event: the rule's head table, or
    /// the fact's own table.
    #[must_use]
    pub fn changed_table(&self) -> QualifiedTable {
        self.formula.head().qualified_table(&self.target)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = if self.insert { "insert" } else { "delete" };
        write!(f, "{op}[{}] {}", self.target, self.formula)
    }
}
