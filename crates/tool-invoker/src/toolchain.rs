//! Location and availability of the poppler utilities

use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use serde::Serialize;
use tokio::process::Command;
use tracing::{debug, warn};

const VERSION_TIMEOUT: Duration = Duration::from_secs(5);

/// A poppler command-line utility
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Tool {
    PdfToText,
    PdfToPpm,
    PdfInfo,
}

impl Tool {
    /// Executable name as installed by `poppler-utils`
    pub fn binary(&self) -> &'static str {
        match self {
            Tool::PdfToText => "pdftotext",
            Tool::PdfToPpm => "pdftoppm",
            Tool::PdfInfo => "pdfinfo",
        }
    }
}

/// Result of probing one tool
#[derive(Debug, Clone, Serialize)]
pub struct ToolStatus {
    pub tool: &'static str,
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// Where the tools are looked up
#[derive(Debug, Clone, Default)]
pub struct Toolchain {
    /// Directory holding the executables; `$PATH` lookup when unset
    pub bin_dir: Option<PathBuf>,
}

impl Toolchain {
    pub fn new(bin_dir: Option<PathBuf>) -> Self {
        Self { bin_dir }
    }

    /// Program to spawn for `tool`
    pub fn program(&self, tool: Tool) -> OsString {
        match &self.bin_dir {
            Some(dir) => dir.join(tool.binary()).into_os_string(),
            None => OsString::from(tool.binary()),
        }
    }

    /// Check that each tool can be spawned
    ///
    /// Runs `<tool> -v`; poppler prints its version to stderr and some
    /// releases exit non-zero for `-v`, so a successful spawn is what counts.
    pub async fn detect(&self, tools: &[Tool]) -> Vec<ToolStatus> {
        let mut statuses = Vec::with_capacity(tools.len());
        for &tool in tools {
            statuses.push(self.detect_one(tool).await);
        }
        statuses
    }

    async fn detect_one(&self, tool: Tool) -> ToolStatus {
        let program = self.program(tool);
        let output = Command::new(&program)
            .arg("-v")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        match tokio::time::timeout(VERSION_TIMEOUT, output).await {
            Ok(Ok(output)) => {
                let version = String::from_utf8_lossy(&output.stderr)
                    .lines()
                    .chain(String::from_utf8_lossy(&output.stdout).lines())
                    .find(|line| line.contains("version"))
                    .map(|line| line.trim().to_string());
                debug!("Detected {}: {:?}", tool.binary(), version);
                ToolStatus {
                    tool: tool.binary(),
                    available: true,
                    version,
                }
            }
            Ok(Err(e)) => {
                warn!("{} is not available: {}", tool.binary(), e);
                ToolStatus {
                    tool: tool.binary(),
                    available: false,
                    version: None,
                }
            }
            Err(_elapsed) => {
                warn!("{} did not answer a version query", tool.binary());
                ToolStatus {
                    tool: tool.binary(),
                    available: false,
                    version: None,
                }
            }
        }
    }
}
