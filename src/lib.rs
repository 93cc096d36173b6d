//! # toyvm
//!
//! A small stack machine and its assembler.
//!
//! Source text goes through [`assemble`] to become a [`Program`], and a
//! [`Vm`] runs a program against its own value stack and variable store:
//!
//! ```
//! let asm = toyvm::assemble("PUSH 10\nPUSH 3\nSUB\nPRINT\nHALT").unwrap();
//! let mut vm = toyvm::Vm::new(&asm.program, Vec::new());
//! vm.run().unwrap();
//! assert_eq!(vm.into_output(), b"7\n");
//! ```
//!
//! Programs can also be persisted in a JSON exchange format
//! ([`Program::to_json`]) or as compact postcard bytes ([`Program::to_bytes`]).

pub mod bytecode;
pub mod error;
pub mod frontend;
pub mod lang;
pub mod runtime;

use std::io::Write;

pub use bytecode::{Instruction, Opcode, Program};
pub use error::{Error, Result};
pub use frontend::{AssembleError, Assembly, LabelTable, assemble};
pub use lang::Value;
pub use runtime::{FaultKind, RuntimeError, StepOutcome, Vm, VmConfig, VmState};

/// Assemble `source` and run it to completion, writing `PRINT` output to `out`.
pub fn run_source<W: Write>(source: &str, out: W, config: VmConfig) -> Result<W> {
    let asm = assemble(source)?;
    run_program(&asm.program, out, config)
}

/// Run an already assembled or decoded program to completion.
pub fn run_program<W: Write>(program: &Program, out: W, config: VmConfig) -> Result<W> {
    let mut vm = Vm::with_config(program, out, config);
    vm.run()?;
    Ok(vm.into_output())
}
