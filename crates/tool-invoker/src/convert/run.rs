//! Child-process lifecycle
//!
//! One conversion owns one scratch directory for its whole lifetime. The
//! directory is a `tempfile::TempDir`, so it is removed when the conversion
//! returns on any path, including timeout and tool failure.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Instant;

use tempfile::TempDir;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::{debug, error, info, instrument, warn};

use super::errors::InvokeError;
use super::mode::{ConversionMode, ResolvedOptions};
use super::{Artifact, ConversionRequest, Invoker};
use crate::toolchain::Tool;

const PDF_MAGIC: &[u8] = b"%PDF-";
const INPUT_FILE: &str = "input.pdf";
const OUTPUT_BASE: &str = "output";
/// Bytes of tool stderr kept for logging
const STDERR_LIMIT: usize = 4096;

/// Where the tool leaves its result
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputTarget {
    Stdout,
    File(PathBuf),
}

/// A planned external process run
#[derive(Debug, Clone)]
pub struct Invocation {
    pub tool: Tool,
    pub args: Vec<OsString>,
    pub workdir: PathBuf,
    pub output: OutputTarget,
}

impl Invocation {
    /// Build the argument list for `mode`
    ///
    /// Arguments come only from the typed mode and validated numbers; no
    /// caller-supplied text is ever placed on the command line.
    pub fn plan(mode: ConversionMode, options: ResolvedOptions, workdir: &Path) -> Self {
        let input = workdir.join(INPUT_FILE);
        let mut args: Vec<OsString> = Vec::new();

        let output = match (mode, options) {
            (
                ConversionMode::Text | ConversionMode::Layout,
                ResolvedOptions::Text { first, last },
            ) => {
                if mode == ConversionMode::Layout {
                    args.push("-layout".into());
                }
                args.push("-enc".into());
                args.push("UTF-8".into());
                push_page_range(&mut args, first, last);
                let out = workdir.join(format!("{}.txt", OUTPUT_BASE));
                args.push(input.into_os_string());
                args.push(out.clone().into_os_string());
                OutputTarget::File(out)
            }
            (ConversionMode::Png | ConversionMode::Jpeg, ResolvedOptions::Image { page, dpi }) => {
                let (flag, ext) = if mode == ConversionMode::Png {
                    ("-png", "png")
                } else {
                    ("-jpeg", "jpg")
                };
                args.push(flag.into());
                args.push("-r".into());
                args.push(dpi.to_string().into());
                push_page_range(&mut args, Some(page), Some(page));
                args.push("-singlefile".into());
                args.push(input.into_os_string());
                // pdftoppm appends the extension itself
                args.push(workdir.join(OUTPUT_BASE).into_os_string());
                OutputTarget::File(workdir.join(format!("{}.{}", OUTPUT_BASE, ext)))
            }
            _ => {
                args.push(input.into_os_string());
                OutputTarget::Stdout
            }
        };

        Self {
            tool: mode.tool(),
            args,
            workdir: workdir.to_path_buf(),
            output,
        }
    }
}

fn push_page_range(args: &mut Vec<OsString>, first: Option<u32>, last: Option<u32>) {
    if let Some(f) = first {
        args.push("-f".into());
        args.push(f.to_string().into());
    }
    if let Some(l) = last {
        args.push("-l".into());
        args.push(l.to_string().into());
    }
}

impl Invoker {
    /// Convert one document
    ///
    /// Size, mode and options are validated before anything touches the
    /// filesystem or spawns a process. No retries are attempted.
    #[instrument(level = "debug", skip_all, fields(mode = %request.mode, size = request.document.len()))]
    pub async fn convert(&self, request: ConversionRequest) -> Result<Artifact, InvokeError> {
        // 1. Validate before spawning
        self.check_size(request.document.len())?;
        if !self.modes().contains(request.mode) {
            return Err(InvokeError::InvalidRequest(format!(
                "Mode '{}' is not enabled on this server",
                request.mode
            )));
        }
        let options = request.options.resolve(request.mode)?;
        validate_document(&request.document)?;

        // 2. Per-invocation scratch directory
        let scratch = self.scratch_dir()?;
        tokio::fs::write(scratch.path().join(INPUT_FILE), &request.document).await?;

        // 3. Run the tool
        let invocation = Invocation::plan(request.mode, options, scratch.path());
        let started = Instant::now();
        let stdout = self.run(&invocation).await?;

        // 4. Collect the result
        let data = match &invocation.output {
            OutputTarget::Stdout => stdout,
            OutputTarget::File(path) => read_output(path, invocation.tool).await?,
        };
        if data.is_empty() && request.mode.is_image() {
            return Err(InvokeError::ToolFailure {
                tool: invocation.tool.binary(),
                code: Some(0),
                stderr: "empty image output".to_string(),
            });
        }

        let page_count = if request.mode == ConversionMode::Info {
            parse_page_count(&data)
        } else {
            None
        };
        let elapsed = started.elapsed();

        if let Err(e) = scratch.close() {
            warn!("Failed to remove scratch directory: {}", e);
        }

        info!(
            "{} finished in {}ms, {} bytes",
            invocation.tool.binary(),
            elapsed.as_millis(),
            data.len()
        );

        Ok(Artifact {
            data,
            mode: request.mode,
            mime_type: request.mode.mime_type(),
            page_count,
            elapsed,
        })
    }

    fn scratch_dir(&self) -> Result<TempDir, InvokeError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("convert-");
        let dir = match &self.config().scratch_root {
            Some(root) => builder.tempdir_in(root),
            None => builder.tempdir(),
        }
        .map_err(|e| {
            error!("Cannot create scratch directory: {}", e);
            InvokeError::Internal("scratch directory unavailable".to_string())
        })?;
        debug!("Scratch directory {}", dir.path().display());
        Ok(dir)
    }

    /// Spawn the child, wait under the timeout and return its stdout
    async fn run(&self, invocation: &Invocation) -> Result<Vec<u8>, InvokeError> {
        let tool = invocation.tool.binary();
        let timeout = self.config().timeout;

        let mut child = Command::new(self.config().toolchain.program(invocation.tool))
            .args(&invocation.args)
            .current_dir(&invocation.workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                error!("Cannot start {}: {}", tool, e);
                InvokeError::Internal(format!("{} could not be started", tool))
            })?;
        debug!("Spawned {} (pid {:?})", tool, child.id());

        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| InvokeError::Internal("child stdout not captured".to_string()))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| InvokeError::Internal("child stderr not captured".to_string()))?;

        let mut out = Vec::new();
        let mut err = Vec::new();
        let wait = async {
            tokio::try_join!(
                child.wait(),
                stdout.read_to_end(&mut out),
                stderr.read_to_end(&mut err)
            )
        };
        let outcome = tokio::time::timeout(timeout, wait).await;

        let status = match outcome {
            Ok(Ok((status, _, _))) => status,
            Ok(Err(e)) => {
                error!("Waiting on {} failed: {}", tool, e);
                return Err(e.into());
            }
            Err(_elapsed) => {
                // kill() also reaps, so the process is gone once this returns
                if let Err(e) = child.kill().await {
                    error!("Failed to kill {}: {}", tool, e);
                }
                warn!("{} killed after {}ms", tool, timeout.as_millis());
                return Err(InvokeError::ToolTimeout {
                    tool,
                    timeout_ms: timeout.as_millis() as u64,
                });
            }
        };

        if !status.success() {
            let diagnostics = truncate_lossy(&err, STDERR_LIMIT);
            warn!("{} exited with {:?}: {}", tool, status.code(), diagnostics);
            return Err(InvokeError::ToolFailure {
                tool,
                code: status.code(),
                stderr: diagnostics,
            });
        }

        Ok(out)
    }
}

/// Cheap structural check before handing bytes to a tool
fn validate_document(document: &[u8]) -> Result<(), InvokeError> {
    if document.is_empty() {
        return Err(InvokeError::InvalidRequest("Document is empty".to_string()));
    }
    if !document.starts_with(PDF_MAGIC) {
        return Err(InvokeError::InvalidRequest("Document is not a PDF".to_string()));
    }
    Ok(())
}

async fn read_output(path: &Path, tool: Tool) -> Result<Vec<u8>, InvokeError> {
    match tokio::fs::read(path).await {
        Ok(data) => Ok(data),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!("{} exited cleanly but wrote no output", tool.binary());
            Err(InvokeError::ToolFailure {
                tool: tool.binary(),
                code: Some(0),
                stderr: "no output file produced".to_string(),
            })
        }
        Err(e) => Err(e.into()),
    }
}

/// Read the `Pages:` line of `pdfinfo` output
pub fn parse_page_count(info: &[u8]) -> Option<u32> {
    String::from_utf8_lossy(info)
        .lines()
        .find_map(|line| line.strip_prefix("Pages:"))
        .and_then(|rest| rest.trim().parse().ok())
}

fn truncate_lossy(bytes: &[u8], limit: usize) -> String {
    let end = bytes.len().min(limit);
    String::from_utf8_lossy(&bytes[..end]).trim().to_string()
}
