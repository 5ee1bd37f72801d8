//! Engine errors.
//!
//! `MalformedIr` and `Parse` are load-time and fatal. Every other variant is
//! raised while a step is running and is recovered at the scope of a single
//! rule invocation (see [`RuleFailure`]).

use std::fmt;

use thiserror::Error;

use crate::components::EntityId;
use crate::timeline::EventId;

/// Engine result type
pub type Result<T> = std::result::Result<T, SimError>;

/// Engine errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SimError {
    #[error("malformed IR in {location}: {message}")]
    MalformedIr { location: String, message: String },

    #[error("invalid IR document: {0}")]
    Parse(String),

    #[error("invalid component {component}: {message}")]
    InvalidComponent { component: String, message: String },

    #[error("type mismatch in {context}: expected {expected}, found {found}")]
    TypeMismatch {
        context: String,
        expected: String,
        found: String,
    },

    #[error("division by zero")]
    DivisionByZero,

    #[error("null entity reference in {context}")]
    NullEntityReference { context: String },

    #[error("unknown function: {0}")]
    UnknownFunction(String),

    #[error("entity {entity} has no choice function {name}")]
    MissingChoiceFunction { entity: EntityId, name: String },

    #[error("unknown variable: {0}")]
    UnknownVariable(String),

    #[error("unknown entity {0}")]
    UnknownEntity(EntityId),

    #[error("invalid argument to {function}: {message}")]
    InvalidArgument { function: String, message: String },

    #[error("call depth exceeded {0}")]
    RecursionLimit(usize),

    #[error("{operation} not allowed while {state}")]
    InvalidState {
        operation: &'static str,
        state: &'static str,
    },
}

impl SimError {
    pub(crate) fn malformed(location: impl Into<String>, message: impl Into<String>) -> Self {
        Self::MalformedIr {
            location: location.into(),
            message: message.into(),
        }
    }

    pub(crate) fn mismatch(
        context: impl Into<String>,
        expected: impl Into<String>,
        found: impl Into<String>,
    ) -> Self {
        Self::TypeMismatch {
            context: context.into(),
            expected: expected.into(),
            found: found.into(),
        }
    }

    /// Whether this error rejects a module before any step runs.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::MalformedIr { .. } | Self::Parse(_))
    }
}

impl From<serde_json::Error> for SimError {
    fn from(err: serde_json::Error) -> Self {
        Self::Parse(err.to_string())
    }
}

/// A runtime error recovered at rule scope, reported to the host.
///
/// The rule's remaining actions were skipped; mutations made by earlier
/// actions of the same invocation stay in place.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleFailure {
    pub rule_id: u32,
    pub rule_name: Option<String>,
    pub event_id: EventId,
    pub event_type: String,
    pub time: f64,
    /// Entity the invocation was bound to, if any.
    pub entity: Option<EntityId>,
    pub error: SimError,
}

impl fmt::Display for RuleFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rule {}", self.rule_id)?;
        if let Some(name) = &self.rule_name {
            write!(f, " ({name})")?;
        }
        write!(f, " on {} at t={}", self.event_type, self.time)?;
        if let Some(entity) = self.entity {
            write!(f, " for {entity}")?;
        }
        write!(f, ": {}", self.error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_boundary() {
        assert!(SimError::malformed("rule 3", "unknown component Mana").is_fatal());
        assert!(!SimError::DivisionByZero.is_fatal());
        assert!(!SimError::UnknownFunction("foo".into()).is_fatal());
    }

    #[test]
    fn test_failure_display_names_rule_and_entity() {
        let failure = RuleFailure {
            rule_id: 4,
            rule_name: Some("heal".into()),
            event_id: EventId(9),
            event_type: "HealEvent".into(),
            time: 2.5,
            entity: Some(EntityId(1)),
            error: SimError::DivisionByZero,
        };
        assert_eq!(
            failure.to_string(),
            "rule 4 (heal) on HealEvent at t=2.5 for #1: division by zero"
        );
    }
}
