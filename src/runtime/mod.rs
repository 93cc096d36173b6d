pub mod runtime_error;
pub mod vm;

pub use runtime_error::{FaultKind, RuntimeError};
pub use vm::{StepOutcome, Vm, VmConfig, VmState};
