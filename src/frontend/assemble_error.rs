use thiserror::Error;

/// Assembly failed. Assembly stops at the first of these.
///
/// Every variant carries the 1-based source line it was detected on.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AssembleError {
    #[error("line {line}: duplicate label '{label}'")]
    DuplicateLabel { label: String, line: usize },

    #[error("line {line}: unknown label '{label}'")]
    UnknownLabel { label: String, line: usize },

    #[error("line {line}: {opcode} requires an operand")]
    MissingOperand { opcode: String, line: usize },

    #[error("line {line}: {opcode} expects {expected}, got {found}")]
    InvalidOperand {
        opcode: String,
        expected: &'static str,
        found: String,
        line: usize,
    },

    #[error("line {line}: integer literal out of range: {literal}")]
    InvalidInteger { literal: String, line: usize },
}
