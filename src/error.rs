use thiserror::Error;

use crate::bytecode::CodecError;
use crate::frontend::AssembleError;
use crate::runtime::RuntimeError;

pub type Result<T> = std::result::Result<T, Error>;

/// Any failure of the assemble / load / run pipeline.
///
/// `Assemble` means the program was rejected before it ran; `Runtime` means
/// it assembled (or decoded) fine and then faulted.
#[derive(Debug, Error)]
pub enum Error {
    #[error("assembly failed: {0}")]
    Assemble(#[from] AssembleError),

    #[error("{0}")]
    Runtime(#[from] RuntimeError),

    #[error("{0}")]
    Codec(#[from] CodecError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
