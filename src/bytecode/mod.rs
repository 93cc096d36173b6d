pub mod disasm;
pub mod ir;
pub mod op;

pub use ir::{CodecError, Program};
pub use op::{Instruction, Opcode};
