//! Error types for krait-analysis.

use thiserror::Error;

use krait_core::{Address, CoreError, DecodeError, Tag};

/// Errors produced by the analyzer.
#[derive(Error, Debug)]
pub enum AnalysisError {
    /// A document operation failed.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// The architecture back-end could not decode an instruction.
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// All 32 architecture ids are taken.
    #[error("architecture id pool is exhausted")]
    IdPoolExhausted,

    /// Unregistering architectures is reserved and not implemented.
    #[error("unregistering architectures is not supported")]
    UnregisterUnsupported,

    /// No architecture is registered under the tag.
    #[error("no architecture registered for tag {0}")]
    UnknownArchitecture(Tag),

    /// The address names an imported symbol; there is no body to analyze.
    #[error("address {0} is labeled as imported")]
    ImportedAddress(Address),

    /// No function could be delimited at the address (no return reached,
    /// or the length threshold was exceeded).
    #[error("no function delimited at {0}")]
    FunctionRejected(Address),

    /// The function's control flow graph could not be constructed.
    #[error("control flow graph construction failed at {0}")]
    CfgConstruction(Address),

    /// No string was recognized at the address.
    #[error("no string recognized at {0}")]
    NoString(Address),

    /// No label carries the name.
    #[error("no label named {0:?}")]
    UnknownLabel(String),
}

/// Result type for analysis operations.
pub type AnalysisResult<T> = Result<T, AnalysisError>;
