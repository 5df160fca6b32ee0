//! Error handling for the rvcc compiler core.

use std::panic::Location;
use thiserror::Error;

/// The error type produced by the IR builder contract, the optimizer, and the backend.
///
/// The core assumes a semantically-checked, well-formed AST as input. Violations of
/// that contract, and violations of the core's own invariants, are programmer bugs
/// rather than user-facing diagnostics: every variant carries enough context to locate
/// the offending construct, but none of it is meant to be pretty-printed to an end user.
#[derive(Error, Debug, Clone)]
pub enum RvccError {
    /// The AST shape handed to the IR builder does not match the frontend contract.
    #[error("invalid AST shape: {message}")]
    InvalidAst { message: String },

    /// A construct is syntactically well-formed but not representable in this IR
    /// (e.g. float modulo, an unsupported conversion).
    #[error("unsupported construct: {operation}")]
    Unsupported { operation: String },

    /// An internal invariant (terminator count, SSA uniqueness, operand-factory
    /// consistency, register-class agreement, ...) was violated.
    #[error("internal invariant violated at {location}: {message}")]
    InvariantViolation { message: String, location: String },

    /// The register allocator could not satisfy a constraint (e.g. ran out of frame
    /// space, or a fixed-register constraint could not be honored).
    #[error("register allocation failed: {message}")]
    AllocationFailed { message: String },
}

/// Result alias used throughout the compiler core.
pub type RvccResult<T> = Result<T, RvccError>;

impl RvccError {
    pub fn invalid_ast(message: impl Into<String>) -> Self {
        Self::InvalidAst { message: message.into() }
    }

    pub fn unsupported(operation: impl Into<String>) -> Self {
        Self::Unsupported { operation: operation.into() }
    }

    pub fn allocation_failed(message: impl Into<String>) -> Self {
        Self::AllocationFailed { message: message.into() }
    }

    /// Builds an `InvariantViolation` tagged with the caller's source location.
    #[track_caller]
    pub fn invariant(message: impl Into<String>) -> Self {
        let location = Location::caller();
        Self::InvariantViolation {
            message: message.into(),
            location: format!("{}:{}:{}", location.file(), location.line(), location.column()),
        }
    }
}
