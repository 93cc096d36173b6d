use crate::lang::value::Value;
use serde::{Deserialize, Serialize};

// =============================================================================
// OPCODE - the closed instruction set
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Opcode {
    // literals
    Push,

    // arithmetic
    Add,
    Sub,
    Mul,
    Div,

    // stack ops
    Dup,
    Swap,

    // variables
    Store,
    Load,

    // ==========================================================================
    // Control flow - absolute jumps, targets resolved by the assembler
    // ==========================================================================
    Jmp,
    /// Pop integer, jump if it is zero.
    Jz,
    /// Pop integer, jump if it is non-zero.
    Jnz,

    // I/O
    Print,

    Halt,

    /// A mnemonic outside the instruction set. Carried through assembly and
    /// decoding so the VM can report it when (and only if) it is executed.
    Unknown(String),
}

/// How the assembler treats the operand token following a mnemonic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandClass {
    /// Label name or literal address.
    Jump,
    /// Variable name.
    Variable,
    /// Integer or text literal.
    Literal,
    /// Operand is ignored.
    None,
}

impl Opcode {
    /// Look up a mnemonic as written in source. Matching is case-insensitive.
    pub fn from_mnemonic(name: &str) -> Opcode {
        Opcode::from_name(&name.to_ascii_uppercase())
    }

    /// Look up an exact, uppercase opcode name.
    pub fn from_name(name: &str) -> Opcode {
        match name {
            "PUSH" => Opcode::Push,
            "ADD" => Opcode::Add,
            "SUB" => Opcode::Sub,
            "MUL" => Opcode::Mul,
            "DIV" => Opcode::Div,
            "DUP" => Opcode::Dup,
            "SWAP" => Opcode::Swap,
            "STORE" => Opcode::Store,
            "LOAD" => Opcode::Load,
            "JMP" => Opcode::Jmp,
            "JZ" => Opcode::Jz,
            "JNZ" => Opcode::Jnz,
            "PRINT" => Opcode::Print,
            "HALT" => Opcode::Halt,
            other => Opcode::Unknown(other.to_string()),
        }
    }

    pub fn mnemonic(&self) -> &str {
        match self {
            Opcode::Push => "PUSH",
            Opcode::Add => "ADD",
            Opcode::Sub => "SUB",
            Opcode::Mul => "MUL",
            Opcode::Div => "DIV",
            Opcode::Dup => "DUP",
            Opcode::Swap => "SWAP",
            Opcode::Store => "STORE",
            Opcode::Load => "LOAD",
            Opcode::Jmp => "JMP",
            Opcode::Jz => "JZ",
            Opcode::Jnz => "JNZ",
            Opcode::Print => "PRINT",
            Opcode::Halt => "HALT",
            Opcode::Unknown(name) => name.as_str(),
        }
    }

    pub fn operand_class(&self) -> OperandClass {
        match self {
            Opcode::Jmp | Opcode::Jz | Opcode::Jnz => OperandClass::Jump,
            Opcode::Store | Opcode::Load => OperandClass::Variable,
            Opcode::Push => OperandClass::Literal,
            _ => OperandClass::None,
        }
    }

    pub fn is_jump(&self) -> bool {
        self.operand_class() == OperandClass::Jump
    }
}

impl std::fmt::Display for Opcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.mnemonic())
    }
}

// =============================================================================
// INSTRUCTION
// =============================================================================

/// One opcode plus its optional operand. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    pub opcode: Opcode,
    pub operand: Option<Value>,
}

impl Instruction {
    pub fn new(opcode: Opcode) -> Self {
        Self {
            opcode,
            operand: None,
        }
    }

    pub fn with_operand(opcode: Opcode, operand: impl Into<Value>) -> Self {
        Self {
            opcode,
            operand: Some(operand.into()),
        }
    }
}

impl std::fmt::Display for Instruction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.operand {
            Some(v) => write!(f, "{} {}", self.opcode, v),
            None => write!(f, "{}", self.opcode),
        }
    }
}
