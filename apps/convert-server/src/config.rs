//! Command-line and environment configuration

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::Parser;
use tool_invoker::convert::DEFAULT_MAX_PAYLOAD_BYTES;
use tool_invoker::{InvokerConfig, ModeSet, Toolchain};

/// Headroom for multipart framing and the other form fields
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Command-line arguments for the conversion server
///
/// Every flag can also be set through the environment; `PORT` is the one the
/// hosting platform provides.
#[derive(Parser, Debug, Clone)]
#[command(name = "convert-server")]
#[command(about = "HTTP front end for poppler PDF conversion")]
#[command(version)]
pub struct Args {
    /// Port to listen on
    #[arg(short, long, env = "PORT", default_value = "8080")]
    pub port: u16,

    /// Host address to bind to
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Request-handling worker threads
    #[arg(
        long,
        env = "WORKERS",
        default_value = "8",
        value_parser = clap::value_parser!(u16).range(1..=512)
    )]
    pub workers: u16,

    /// Maximum tool processes running at once (defaults to --workers)
    #[arg(
        long,
        env = "MAX_CONCURRENT_TOOLS",
        value_parser = clap::value_parser!(u16).range(1..=512)
    )]
    pub max_concurrent_tools: Option<u16>,

    /// Tool timeout in milliseconds
    #[arg(
        long,
        env = "TOOL_TIMEOUT_MS",
        default_value = "30000",
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub timeout_ms: u64,

    /// Largest accepted document in bytes
    #[arg(long, env = "MAX_PAYLOAD_BYTES", default_value_t = DEFAULT_MAX_PAYLOAD_BYTES)]
    pub max_payload_bytes: usize,

    /// Comma separated list of enabled conversion modes
    #[arg(long, env = "ALLOWED_MODES", default_value = "text,layout,info,png,jpeg")]
    pub modes: ModeSet,

    /// Directory holding the poppler executables (defaults to $PATH lookup)
    #[arg(long, env = "POPPLER_BIN_DIR")]
    pub bin_dir: Option<PathBuf>,

    /// Parent directory for per-request scratch directories
    #[arg(long, env = "SCRATCH_DIR")]
    pub scratch_dir: Option<PathBuf>,

    /// Rate limit: requests per second per IP (0 disables)
    #[arg(long, env = "RATE_LIMIT", default_value = "0")]
    pub rate_limit: u32,

    /// Start even if a required poppler tool is missing
    #[arg(long)]
    pub skip_tool_check: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl Args {
    pub fn validate(&self) -> Result<()> {
        if self.max_payload_bytes == 0 {
            bail!("--max-payload-bytes must be greater than zero");
        }
        if let Some(dir) = &self.scratch_dir {
            if !dir.is_dir() {
                bail!("scratch directory {} does not exist", dir.display());
            }
        }
        if let Some(dir) = &self.bin_dir {
            if !dir.is_dir() {
                bail!("poppler bin directory {} does not exist", dir.display());
            }
        }
        Ok(())
    }

    pub fn max_concurrent_tools(&self) -> usize {
        usize::from(self.max_concurrent_tools.unwrap_or(self.workers))
    }

    /// Per-IP limit, `None` when `--rate-limit` is 0
    pub fn rate_limiter(&self) -> Option<RateLimit> {
        RateLimit::per_second(self.rate_limit)
    }

    pub fn invoker_config(&self) -> InvokerConfig {
        InvokerConfig {
            toolchain: Toolchain::new(self.bin_dir.clone()),
            timeout: Duration::from_millis(self.timeout_ms),
            max_payload_bytes: self.max_payload_bytes,
            scratch_root: self.scratch_dir.clone(),
            modes: self.modes.clone(),
        }
    }
}

/// Token-bucket settings for `tower_governor`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    /// Time to replenish one request of the quota
    pub period: Duration,
    pub burst: u32,
}

impl RateLimit {
    /// `requests` per second with a burst of twice that
    pub fn per_second(requests: u32) -> Option<Self> {
        if requests == 0 {
            return None;
        }
        let nanos = (1_000_000_000 / u64::from(requests)).max(1);
        Some(Self {
            period: Duration::from_nanos(nanos),
            burst: requests.saturating_mul(2),
        })
    }
}

/// Body size limits per route shape
#[derive(Debug, Clone, Copy)]
pub struct BodyLimits {
    /// Raw document bodies
    pub raw: usize,
    /// JSON bodies carrying the document as base64
    pub json: usize,
    pub multipart: usize,
}

impl BodyLimits {
    pub fn for_payload(max_payload_bytes: usize) -> Self {
        // base64 grows data by 4/3, plus room for the other JSON fields
        let base64 = max_payload_bytes
            .saturating_add(2)
            .saturating_div(3)
            .saturating_mul(4);
        Self {
            raw: max_payload_bytes,
            json: base64.saturating_add(MULTIPART_OVERHEAD),
            multipart: max_payload_bytes.saturating_add(MULTIPART_OVERHEAD),
        }
    }
}
