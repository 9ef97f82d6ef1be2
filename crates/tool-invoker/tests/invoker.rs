//! Invoker integration tests
//!
//! The poppler binaries are replaced by small shell scripts in a temporary
//! `bin_dir`, so these tests exercise the real spawn/wait/kill path without
//! needing poppler installed. Every script drops a `spawned` marker next to
//! itself when it runs.

#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use tempfile::TempDir;
use tool_invoker::{
    ConversionMode, ConversionOptions, ConversionRequest, ErrorKind, Invoker, InvokerConfig,
    ModeSet, Toolchain,
};

const MARK: &str = "touch \"$(dirname \"$0\")/spawned\"\n";

/// Copies its input (second to last argument) to its output (last argument)
const COPY_TEXT: &str = r#"for a in "$@"; do in=$out; out=$a; done
cp "$in" "$out"
"#;

const COPY_IMAGE: &str = r#"case "$1" in -png) ext=png ;; -jpeg) ext=jpg ;; esac
for a in "$@"; do in=$base; base=$a; done
cp "$in" "$base.$ext"
"#;

const INFO: &str = r#"printf 'Producer:       fake\nPages:          3\n'
"#;

const FAIL: &str = r#"echo "Syntax Error: cannot parse $*" >&2
exit 1
"#;

const HANG: &str = r#"echo $$ > "$(dirname "$0")/pid"
exec sleep 30
"#;

const SILENT: &str = "exit 0\n";

struct FakeTools {
    bin: TempDir,
    scratch: TempDir,
}

impl FakeTools {
    fn new() -> Self {
        Self {
            bin: TempDir::new().unwrap(),
            scratch: TempDir::new().unwrap(),
        }
    }

    /// Writes under a temporary name and renames into place, so the final
    /// path never refers to a file that is still open for writing (ETXTBSY)
    fn install(self, name: &str, body: &str) -> Self {
        let staging = self.bin.path().join(format!(".{}.tmp", name));
        fs::write(&staging, format!("#!/bin/sh\n{}{}", MARK, body)).unwrap();
        fs::set_permissions(&staging, fs::Permissions::from_mode(0o755)).unwrap();
        fs::rename(&staging, self.bin.path().join(name)).unwrap();
        self
    }

    fn invoker(&self) -> Invoker {
        self.invoker_with(|_| {})
    }

    fn invoker_with(&self, tweak: impl FnOnce(&mut InvokerConfig)) -> Invoker {
        let mut config = InvokerConfig {
            toolchain: Toolchain::new(Some(self.bin.path().to_path_buf())),
            timeout: Duration::from_secs(10),
            scratch_root: Some(self.scratch.path().to_path_buf()),
            ..InvokerConfig::default()
        };
        tweak(&mut config);
        Invoker::new(config)
    }

    fn spawned(&self) -> bool {
        self.bin.path().join("spawned").exists()
    }

    fn scratch_entries(&self) -> Vec<PathBuf> {
        entries(self.scratch.path())
    }
}

fn entries(dir: &Path) -> Vec<PathBuf> {
    fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect()
}

fn pdf(tag: &str) -> Vec<u8> {
    format!("%PDF-1.4\n% {}\n%%EOF\n", tag).into_bytes()
}

#[tokio::test]
async fn text_conversion_returns_output_and_cleans_scratch() {
    let tools = FakeTools::new().install("pdftotext", COPY_TEXT);
    assert!(tools.scratch_entries().is_empty());

    let artifact = tools
        .invoker()
        .convert(ConversionRequest::new(pdf("hello"), ConversionMode::Text))
        .await
        .unwrap();

    assert_eq!(artifact.data, pdf("hello"));
    assert_eq!(artifact.mime_type, "text/plain; charset=utf-8");
    assert_eq!(artifact.page_count, None);
    assert!(tools.spawned());
    assert_eq!(tools.scratch_entries(), Vec::<PathBuf>::new());
}

#[tokio::test]
async fn image_conversion_reads_extension_added_by_tool() {
    let tools = FakeTools::new().install("pdftoppm", COPY_IMAGE);
    let invoker = tools.invoker();

    let png = invoker
        .convert(
            ConversionRequest::new(pdf("page"), ConversionMode::Png).with_options(
                ConversionOptions {
                    page: Some(2),
                    dpi: Some(96),
                    ..Default::default()
                },
            ),
        )
        .await
        .unwrap();
    assert_eq!(png.mime_type, "image/png");
    assert_eq!(png.data, pdf("page"));

    let jpeg = invoker
        .convert(ConversionRequest::new(pdf("page"), ConversionMode::Jpeg))
        .await
        .unwrap();
    assert_eq!(jpeg.mime_type, "image/jpeg");
    assert!(tools.scratch_entries().is_empty());
}

#[tokio::test]
async fn info_reports_page_count_from_stdout() {
    let tools = FakeTools::new().install("pdfinfo", INFO);

    let artifact = tools
        .invoker()
        .convert(ConversionRequest::new(pdf("info"), ConversionMode::Info))
        .await
        .unwrap();

    assert_eq!(artifact.page_count, Some(3));
    assert!(String::from_utf8(artifact.data).unwrap().contains("Producer"));
}

#[tokio::test]
async fn tool_failure_is_reported_and_scratch_removed() {
    let tools = FakeTools::new().install("pdftotext", FAIL);

    let err = tools
        .invoker()
        .convert(ConversionRequest::new(pdf("broken"), ConversionMode::Text))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ToolFailure);
    assert!(!err.is_retryable());
    match err {
        tool_invoker::InvokeError::ToolFailure { tool, code, stderr } => {
            assert_eq!(tool, "pdftotext");
            assert_eq!(code, Some(1));
            assert!(stderr.contains("Syntax Error"));
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert!(tools.scratch_entries().is_empty());
}

#[tokio::test]
async fn missing_output_file_is_a_tool_failure() {
    let tools = FakeTools::new().install("pdftoppm", SILENT);

    let err = tools
        .invoker()
        .convert(ConversionRequest::new(pdf("x"), ConversionMode::Png))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ToolFailure);
    assert!(tools.scratch_entries().is_empty());
}

#[tokio::test]
async fn timeout_kills_child_and_cleans_scratch() {
    let tools = FakeTools::new().install("pdftotext", HANG);
    let invoker = tools.invoker_with(|c| c.timeout = Duration::from_millis(500));

    let started = std::time::Instant::now();
    let err = invoker
        .convert(ConversionRequest::new(pdf("slow"), ConversionMode::Text))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ToolTimeout);
    assert!(err.is_retryable());
    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(tools.scratch_entries().is_empty());

    let pid = fs::read_to_string(tools.bin.path().join("pid")).unwrap();
    let pid = pid.trim();
    assert!(!pid.is_empty());
    #[cfg(target_os = "linux")]
    assert!(
        !Path::new(&format!("/proc/{}", pid)).exists(),
        "child {} still running after timeout",
        pid
    );
}

#[tokio::test]
async fn oversized_payload_never_spawns() {
    let tools = FakeTools::new().install("pdftotext", COPY_TEXT);
    let invoker = tools.invoker_with(|c| c.max_payload_bytes = 16);

    let err = invoker
        .convert(ConversionRequest::new(pdf("this is too long"), ConversionMode::Text))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::PayloadTooLarge);
    assert!(!tools.spawned());
    assert!(tools.scratch_entries().is_empty());
}

#[tokio::test]
async fn disabled_mode_never_spawns() {
    let tools = FakeTools::new().install("pdftoppm", COPY_IMAGE);
    let invoker = tools.invoker_with(|c| c.modes = ModeSet::new([ConversionMode::Text]));

    let err = invoker
        .convert(ConversionRequest::new(pdf("x"), ConversionMode::Png))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::InvalidRequest);
    assert!(!tools.spawned());
}

#[tokio::test]
async fn non_pdf_payload_never_spawns() {
    let tools = FakeTools::new().install("pdftotext", COPY_TEXT);

    let err = tools
        .invoker()
        .convert(ConversionRequest::new(
            b"#!/bin/sh\nrm -rf /\n".to_vec(),
            ConversionMode::Text,
        ))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::InvalidRequest);
    assert!(!tools.spawned());
    assert!(tools.scratch_entries().is_empty());
}

#[tokio::test]
async fn missing_tool_is_internal_error() {
    let tools = FakeTools::new();

    let err = tools
        .invoker()
        .convert(ConversionRequest::new(pdf("x"), ConversionMode::Info))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::InternalError);
    assert!(tools.scratch_entries().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_conversions_stay_paired() {
    let tools = FakeTools::new().install("pdftotext", COPY_TEXT);
    let invoker = Arc::new(tools.invoker());

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let invoker = Arc::clone(&invoker);
            tokio::spawn(async move {
                let tag = format!("document-{}", i);
                let artifact = invoker
                    .convert(ConversionRequest::new(pdf(&tag), ConversionMode::Text))
                    .await
                    .unwrap();
                (tag, artifact.data)
            })
        })
        .collect();

    for handle in handles {
        let (tag, data) = handle.await.unwrap();
        assert_eq!(data, pdf(&tag));
    }
    assert!(tools.scratch_entries().is_empty());
}

#[tokio::test]
async fn detect_finds_installed_tools() {
    let tools = FakeTools::new().install("pdfinfo", "echo 'pdfinfo version 24.02.0' >&2\n");
    let chain = Toolchain::new(Some(tools.bin.path().to_path_buf()));

    let statuses = chain
        .detect(&[tool_invoker::Tool::PdfInfo, tool_invoker::Tool::PdfToText])
        .await;

    assert!(statuses[0].available);
    assert_eq!(statuses[0].version.as_deref(), Some("pdfinfo version 24.02.0"));
    assert!(!statuses[1].available);
}
