use std::collections::BTreeMap;

use thiserror::Error;

use crate::bytecode::disasm::format_value;
use crate::lang::value::Value;

/// What went wrong while executing.
#[derive(Debug, Error)]
pub enum FaultKind {
    #[error("instruction pointer out of range: {target} (program has {len} instructions)")]
    IpOutOfRange { target: i64, len: usize },

    #[error("unknown opcode: {0}")]
    UnknownOpcode(String),

    #[error("stack underflow: need {needed}, have {had}")]
    StackUnderflow { needed: usize, had: usize },

    #[error("type error: {opcode} expected {expected}, got {found}")]
    TypeMismatch {
        opcode: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("undefined variable: {0}")]
    UndefinedVariable(String),

    #[error("division by zero")]
    DivisionByZero,

    #[error("integer overflow in {opcode}")]
    Overflow { opcode: String },

    #[error("vm already faulted; a faulted run cannot be resumed")]
    AlreadyFaulted,

    #[error("output sink failed: {0}")]
    Output(#[from] std::io::Error),
}

/// A fault plus the machine state at the moment it was raised.
///
/// Nothing is rolled back, so `stack` and `variables` reflect every mutation
/// made before the faulting instruction (and any pops it already did).
#[derive(Debug)]
pub struct RuntimeError {
    pub kind: FaultKind,
    pub ip: usize,
    pub stack: Vec<Value>,
    pub variables: BTreeMap<String, Value>,
}

impl std::fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "runtime error at ip={}: {}", self.ip, self.kind)?;
        write!(f, "\n  stack: {}", format_stack(&self.stack))?;
        write!(f, "\n  variables: {}", format_variables(&self.variables))
    }
}

impl std::error::Error for RuntimeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.kind)
    }
}

impl RuntimeError {
    pub fn new(
        kind: FaultKind,
        ip: usize,
        stack: &[Value],
        variables: &BTreeMap<String, Value>,
    ) -> Self {
        RuntimeError {
            kind,
            ip,
            stack: stack.to_vec(),
            variables: variables.clone(),
        }
    }
}

/// `[1, "two"]`, bottom of the stack first.
pub fn format_stack(stack: &[Value]) -> String {
    let items: Vec<String> = stack.iter().map(format_value).collect();
    format!("[{}]", items.join(", "))
}

/// `{n: 3, s: "x"}`, sorted by name.
pub fn format_variables(variables: &BTreeMap<String, Value>) -> String {
    let items: Vec<String> = variables
        .iter()
        .map(|(name, v)| format!("{}: {}", name, format_value(v)))
        .collect();
    format!("{{{}}}", items.join(", "))
}
