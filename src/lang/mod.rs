//! # Values
//!
//! The dynamic value model shared by the assembler (as literal operands)
//! and the VM (as stack and variable contents).

pub mod value;

pub use value::Value;
