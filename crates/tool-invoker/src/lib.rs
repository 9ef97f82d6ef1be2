//! Poppler tool invocation
//!
//! This crate runs the pre-installed poppler command-line utilities
//! (`pdftotext`, `pdftoppm`, `pdfinfo`) against uploaded PDF documents:
//! - Conversion modes are a closed allow-list, never free-form arguments
//! - Every invocation works in its own scratch directory, removed on drop
//! - Child processes run under a wall-clock timeout and are killed on expiry
//!
//! The HTTP layer lives in `convert-server`; this crate has no knowledge of
//! requests or status codes beyond the error kinds it reports.

pub mod convert;
pub mod scoring;
pub mod toolchain;

pub use convert::{
    Artifact, ConversionMode, ConversionOptions, ConversionRequest, ErrorKind, InvokeError,
    Invoker, InvokerConfig, ModeSet,
};
pub use scoring::{ExtractionScore, ScoreStatus};
pub use toolchain::{Tool, ToolStatus, Toolchain};
