use crate::bytecode::op::{Instruction, Opcode};
use crate::lang::value::Value;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// An assembled (or decoded) program: the instruction stream in execution order.
///
/// Jump operands are already absolute addresses, so nothing else is needed
/// to run it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Program {
    pub instructions: Vec<Instruction>,
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("bytecode json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("binary bytecode: {0}")]
    Binary(#[from] postcard::Error),
}

/// One entry of the JSON exchange format: `{"op": "PUSH", "arg": 3}`.
#[derive(Debug, Serialize, Deserialize)]
struct Record {
    op: String,
    #[serde(default)]
    arg: Option<RecordArg>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum RecordArg {
    Integer(i64),
    Text(String),
}

impl From<&Instruction> for Record {
    fn from(instr: &Instruction) -> Self {
        Record {
            op: instr.opcode.mnemonic().to_string(),
            arg: instr.operand.as_ref().map(|v| match v {
                Value::Integer(n) => RecordArg::Integer(*n),
                Value::Text(s) => RecordArg::Text(s.clone()),
            }),
        }
    }
}

impl From<Record> for Instruction {
    fn from(record: Record) -> Self {
        Instruction {
            opcode: Opcode::from_name(&record.op),
            operand: record.arg.map(|arg| match arg {
                RecordArg::Integer(n) => Value::Integer(n),
                RecordArg::Text(s) => Value::Text(s),
            }),
        }
    }
}

impl Program {
    pub fn new(instructions: Vec<Instruction>) -> Self {
        Self { instructions }
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Instruction> {
        self.instructions.iter()
    }

    /// Encode as the pretty-printed JSON exchange format.
    pub fn to_json(&self) -> Result<String, CodecError> {
        let records: Vec<Record> = self.instructions.iter().map(Record::from).collect();
        Ok(serde_json::to_string_pretty(&records)?)
    }

    /// Decode the JSON exchange format. Op names must match a mnemonic
    /// exactly (`"push"` is not `PUSH`); anything else is kept as an unknown
    /// opcode and faults when the VM reaches it.
    pub fn from_json(data: &str) -> Result<Self, CodecError> {
        let records: Vec<Record> = serde_json::from_str(data)?;
        Ok(Self::new(records.into_iter().map(Instruction::from).collect()))
    }

    /// Encode as compact postcard bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
        Ok(postcard::to_allocvec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        Ok(postcard::from_bytes(bytes)?)
    }
}
