//! Layout errors.

use thiserror::Error;

/// Errors raised while laying out or emitting code and data.
#[derive(Debug, Error)]
pub enum LayoutError {
    /// An instruction produced no bytes for its current operands and address.
    #[error("instruction {index} ({name}) cannot be encoded")]
    Unencodable { index: usize, name: String },

    /// Address-dependent encodings kept changing size.
    #[error("code layout did not settle after {passes} relaxation passes")]
    RelaxationDiverged { passes: usize },

    #[error("string constant {0:?} is not ASCII")]
    NonAscii(String),

    #[error("label `{0}` is not defined")]
    UnknownLabel(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
