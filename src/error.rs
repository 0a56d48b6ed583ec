//! Error types for the policy engine.
//!
//! All errors are strongly typed using thiserror. Validation failures
//! surface in the `errors` list returned by `Runtime::update`; lookup
//! failures (unknown policy, unknown trigger) are distinct
//! [`EngineError`] variants returned to the direct caller.

use thiserror::Error;

use crate::registry::TriggerId;

/// Validation errors that reject an event batch. The batch is rolled
/// back in full; nothing is partially applied.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// A rule or fact head is qualified with a policy other than the
    /// one it is being inserted into.
    #[error("head {head} inserted into policy {policy} should not reference any policy")]
    CrossPolicyHead {
        /// Textual form of the offending head atom.
        head: String,
        /// The event's target policy.
        policy: String,
    },

    /// A rule was submitted to a database policy, which holds ground
    /// facts only.
    #[error("policy {policy} is a database and cannot hold rules")]
    RuleInDatabase {
        /// The database policy named by the event.
        policy: String,
    },

    /// The batch would introduce an illegal recursion cycle.
    #[error("Rules are recursive: cycle through policies {}", policies.join(", "))]
    Recursion {
        /// Policies participating in the cycle.
        policies: Vec<String>,
    },

    /// A materialized theory was given a table that is both recursively
    /// derived and negated within the same cycle.
    #[error("table {policy}:{table} is negated within its own recursive cycle and cannot be stratified")]
    Unstratifiable {
        /// Policy holding the cycle.
        policy: String,
        /// Table whose negation breaks stratification.
        table: String,
    },

    /// An event targets a policy that does not exist.
    #[error("event targets unknown policy {name}")]
    UnknownPolicy {
        /// The missing policy name.
        name: String,
    },
}

/// Top-level error type for engine operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// A validation failure (see [`ValidationError`]).
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Named policy does not exist.
    #[error("policy not found: {name}")]
    PolicyNotFound {
        /// The missing policy name.
        name: String,
    },

    /// A policy with this name already exists.
    #[error("policy already exists: {name}")]
    PolicyExists {
        /// The duplicate policy name.
        name: String,
    },

    /// The trigger handle is not currently registered.
    #[error("trigger not found: {id}")]
    TriggerNotFound {
        /// The unknown trigger identity.
        id: TriggerId,
    },

    /// Simulation was pointed at a policy that is not an action theory.
    #[error("policy {name} is not an action policy")]
    NotActionPolicy {
        /// The offending policy name.
        name: String,
    },

    /// A simulation sequence entry that is neither a state update nor a
    /// declared action.
    #[error("simulation step {step} is neither a state update nor a declared action")]
    IllegalSimulationStep {
        /// Textual form of the offending step.
        step: String,
    },

    /// Deleting the policy would leave other policies' rules pointing at
    /// its tables.
    #[error("cannot delete policy {policy}: still referenced by {}", referents.join(", "))]
    DanglingReference {
        /// The policy being deleted.
        policy: String,
        /// Policies whose rules reference it.
        referents: Vec<String>,
    },
}

impl EngineError {
    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this is a not-found condition.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::PolicyNotFound { .. } | Self::TriggerNotFound { .. }
        )
    }
}

/// Result type alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cross_policy_head_message() {
        let err = ValidationError::CrossPolicyHead {
            head: "test2:p(x)".to_string(),
            policy: "test1".to_string(),
        };
        assert!(err.to_string().contains("should not reference any policy"));
    }

    #[test]
    fn recursion_message_names_policies() {
        let err = ValidationError::Recursion {
            policies: vec!["test1".to_string(), "test2".to_string()],
        };
        let msg = err.to_string();
        assert!(msg.contains("Rules are recursive"));
        assert!(msg.contains("test1"));
        assert!(msg.contains("test2"));
    }

    #[test]
    fn engine_error_classification() {
        let err: EngineError = ValidationError::UnknownPolicy {
            name: "nope".to_string(),
        }
        .into();
        assert!(err.is_validation());
        assert!(!err.is_not_found());

        let err = EngineError::PolicyNotFound {
            name: "nope".to_string(),
        };
        assert!(err.is_not_found());
    }

    #[test]
    fn dangling_reference_message() {
        let err = EngineError::DanglingReference {
            policy: "test2".to_string(),
            referents: vec!["test1".to_string()],
        };
        let msg = err.to_string();
        assert!(msg.contains("test2"));
        assert!(msg.contains("test1"));
    }
}
