//! Runtime error taxonomy.
//!
//! `StoryCorruption` is fatal to the runner; everything else is recoverable
//! at the call site that produced it (the failed operation is a no-op).

use thiserror::Error;

/// Errors surfaced by the execution engine and snapshot codec.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuntimeError {
    /// Malformed bytecode or a broken interpreter invariant. Fatal: the
    /// runner must not continue with undefined state.
    #[error("story corruption: {0}")]
    StoryCorruption(String),
    /// An operator was applied to incompatible value kinds.
    #[error("type mismatch: `{op}` on {lhs} and {rhs}")]
    TypeMismatch {
        /// Operator name.
        op: String,
        /// Left operand kind.
        lhs: &'static str,
        /// Right operand kind (same as `lhs` for unary operators).
        rhs: &'static str,
    },
    /// The story called an external function with no binding and no
    /// in-story fallback path.
    #[error("unbound external function `{0}`")]
    UnboundExternalFunction(String),
    /// An external function was called with the wrong number of arguments.
    #[error("external function `{name}` expects {expected} arguments, got {got}")]
    ArgumentCountMismatch {
        /// Function name.
        name: String,
        /// Declared arity.
        expected: u8,
        /// Arguments supplied at the call site.
        got: u8,
    },
    /// `choose` was called with an out-of-range index or no pending choices.
    #[error("invalid choice index {index} ({available} available)")]
    InvalidChoice {
        /// The rejected index.
        index: usize,
        /// Number of pending choices.
        available: usize,
    },
    /// A snapshot does not belong to the story it was restored against.
    #[error("incompatible snapshot: {0}")]
    IncompatibleSnapshot(String),
}

impl RuntimeError {
    /// Build a `TypeMismatch` from an operator and two operand kind names.
    #[must_use]
    pub fn type_mismatch(op: impl std::fmt::Display, lhs: &'static str, rhs: &'static str) -> Self {
        Self::TypeMismatch {
            op: op.to_string(),
            lhs,
            rhs,
        }
    }
}
