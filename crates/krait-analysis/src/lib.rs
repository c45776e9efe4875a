//! # krait-analysis
//!
//! Analysis passes for the krait toolkit.
//!
//! This crate provides:
//! - Execution-path disassembly (recursive discovery from entry points)
//! - Cross-reference building and label synthesis
//! - Function delimitation and CFG construction
//! - String recognition (ASCII and UTF-16)
//! - Forward/backward operand tracking

pub mod analyzer;
pub mod error;
pub mod function_builder;
pub mod output;
pub mod registry;
pub mod strings;
pub mod tracker;

pub use analyzer::{Analyzer, AnalyzerConfig};
pub use error::{AnalysisError, AnalysisResult};
pub use function_builder::{FunctionExtent, FUNCTION_LENGTH_THRESHOLD};
pub use registry::ArchitectureRegistry;
pub use strings::{AsciiCharset, CharacterSet, WideCharset};
pub use tracker::Tracker;
