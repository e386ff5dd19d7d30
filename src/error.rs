use std::time::Duration;

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Every way a single execution request can fail.
///
/// A failure always covers the whole request: there is no partial result.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// A clause could not be parsed.
    #[error("syntax error at line {line}, column {column}: {message}")]
    Syntax {
        /// What the parser expected or found
        message: String,
        /// 1-based line of the offending input
        line: usize,
        /// 1-based column (in characters) of the offending input
        column: usize,
    },

    /// A variable is not bound by any positive body literal.
    #[error("unsafe clause `{clause}`: variable `{variable}` does not appear in a positive body literal")]
    UnsafeRule {
        /// Canonical text of the offending clause
        clause: String,
        /// Name of the unrestricted variable
        variable: String,
    },

    /// Negation goes through a recursive cycle.
    #[error("program is not stratifiable: `{predicate}` depends negatively on itself")]
    NotStratifiable {
        /// `name/arity` of a predicate on the offending cycle
        predicate: String,
    },

    /// The configured iteration or time budget ran out before the fixpoint.
    #[error("evaluation budget exceeded after {iterations} iterations ({elapsed:?})")]
    EvaluationBudgetExceeded {
        /// Iterations completed before giving up
        iterations: usize,
        /// Wall time spent evaluating
        elapsed: Duration,
    },

    /// A background execution did not run to completion.
    #[cfg(feature = "async")]
    #[error("execution cancelled: {reason}")]
    Cancelled {
        /// Message from the runtime
        reason: String,
    },
}

/// Coarse classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ErrorKind {
    /// Malformed program text
    Syntax,
    /// Range-restriction violation
    Safety,
    /// Negation through recursion
    Stratification,
    /// Iteration or time budget exceeded
    Budget,
    /// Background task failure
    Cancelled,
}

impl Error {
    /// Returns the coarse kind of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Syntax { .. } => ErrorKind::Syntax,
            Self::UnsafeRule { .. } => ErrorKind::Safety,
            Self::NotStratifiable { .. } => ErrorKind::Stratification,
            Self::EvaluationBudgetExceeded { .. } => ErrorKind::Budget,
            #[cfg(feature = "async")]
            Self::Cancelled { .. } => ErrorKind::Cancelled,
        }
    }

    pub(crate) fn unsafe_rule(clause: impl ToString, variable: &str) -> Self {
        Self::UnsafeRule {
            clause: clause.to_string(),
            variable: variable.to_string(),
        }
    }
}
