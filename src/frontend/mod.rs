pub mod assemble_error;
pub mod assembler;
pub mod lexer;
pub mod token;

pub use assemble_error::AssembleError;
pub use assembler::{Assembly, LabelTable, assemble};
