//! Error types for encrypted operations.

use thiserror::Error;

/// Errors that can occur while evaluating encrypted operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FheError {
    #[error("Unknown ciphertext handle {0}")]
    UnknownHandle(String),

    #[error("Ciphertext type mismatch: expected {expected}")]
    TypeMismatch { expected: &'static str },

    #[error("Division by zero")]
    DivisionByZero,

    #[error("Input proof does not match sender")]
    InvalidInputProof,

    #[error("Input width mismatch")]
    InputWidthMismatch,

    #[error("Access to ciphertext denied")]
    AccessDenied,
}
