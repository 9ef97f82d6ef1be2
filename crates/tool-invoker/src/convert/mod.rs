//! Conversion of PDF documents through the poppler tools

pub mod errors;
pub mod mode;
pub mod run;

pub use errors::{ErrorKind, InvokeError};
pub use mode::{ConversionMode, ConversionOptions, ModeSet, ResolvedOptions};
pub use run::Invocation;

use std::path::PathBuf;
use std::time::Duration;

use bytes::Bytes;

use crate::toolchain::Toolchain;

/// 100 MiB
pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 100 * 1024 * 1024;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Request to convert one document
#[derive(Debug, Clone)]
pub struct ConversionRequest {
    /// Raw PDF bytes, shared with the HTTP body without copying
    pub document: Bytes,
    pub mode: ConversionMode,
    pub options: ConversionOptions,
}

impl ConversionRequest {
    pub fn new(document: impl Into<Bytes>, mode: ConversionMode) -> Self {
        Self {
            document: document.into(),
            mode,
            options: ConversionOptions::default(),
        }
    }

    pub fn with_options(mut self, options: ConversionOptions) -> Self {
        self.options = options;
        self
    }
}

/// Output of a successful conversion
#[derive(Debug, Clone)]
pub struct Artifact {
    pub data: Vec<u8>,
    pub mode: ConversionMode,
    pub mime_type: &'static str,
    /// Known for `info` only
    pub page_count: Option<u32>,
    pub elapsed: Duration,
}

/// Invoker settings
#[derive(Debug, Clone)]
pub struct InvokerConfig {
    pub toolchain: Toolchain,
    /// Wall-clock limit for one child process
    pub timeout: Duration,
    pub max_payload_bytes: usize,
    /// Parent of the per-invocation scratch directories; OS temp dir when unset
    pub scratch_root: Option<PathBuf>,
    pub modes: ModeSet,
}

impl Default for InvokerConfig {
    fn default() -> Self {
        Self {
            toolchain: Toolchain::default(),
            timeout: DEFAULT_TIMEOUT,
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
            scratch_root: None,
            modes: ModeSet::all(),
        }
    }
}

/// Runs conversions; holds no per-request state and is shared across tasks
#[derive(Debug, Clone)]
pub struct Invoker {
    config: InvokerConfig,
}

impl Invoker {
    pub fn new(config: InvokerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &InvokerConfig {
        &self.config
    }

    pub fn modes(&self) -> &ModeSet {
        &self.config.modes
    }

    /// Reject payloads over the configured limit
    pub fn check_size(&self, size: usize) -> Result<(), InvokeError> {
        if size > self.config.max_payload_bytes {
            return Err(InvokeError::PayloadTooLarge {
                size,
                limit: self.config.max_payload_bytes,
            });
        }
        Ok(())
    }
}
