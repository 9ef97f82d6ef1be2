//! Conversion modes and their options

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::errors::InvokeError;
use crate::toolchain::Tool;

/// Highest page number accepted in a page selection
pub const MAX_PAGE: u32 = 10_000;
/// Resolution used for image modes when none is requested
pub const DEFAULT_DPI: u32 = 150;
pub const MIN_DPI: u32 = 72;
pub const MAX_DPI: u32 = 600;

/// A supported conversion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversionMode {
    /// Plain text in reading order
    Text,
    /// Text with the physical page layout preserved
    Layout,
    /// Document metadata as reported by `pdfinfo`
    Info,
    /// One page rendered to PNG
    Png,
    /// One page rendered to JPEG
    Jpeg,
}

impl ConversionMode {
    pub const ALL: [ConversionMode; 5] = [
        ConversionMode::Text,
        ConversionMode::Layout,
        ConversionMode::Info,
        ConversionMode::Png,
        ConversionMode::Jpeg,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ConversionMode::Text => "text",
            ConversionMode::Layout => "layout",
            ConversionMode::Info => "info",
            ConversionMode::Png => "png",
            ConversionMode::Jpeg => "jpeg",
        }
    }

    /// Get the MIME type of the produced artifact
    pub fn mime_type(&self) -> &'static str {
        match self {
            ConversionMode::Text | ConversionMode::Layout | ConversionMode::Info => {
                "text/plain; charset=utf-8"
            }
            ConversionMode::Png => "image/png",
            ConversionMode::Jpeg => "image/jpeg",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            ConversionMode::Text => "Extract text in reading order",
            ConversionMode::Layout => "Extract text preserving the physical layout",
            ConversionMode::Info => "Report document metadata and page count",
            ConversionMode::Png => "Render a single page to PNG",
            ConversionMode::Jpeg => "Render a single page to JPEG",
        }
    }

    /// The poppler utility that performs this conversion
    pub fn tool(&self) -> Tool {
        match self {
            ConversionMode::Text | ConversionMode::Layout => Tool::PdfToText,
            ConversionMode::Info => Tool::PdfInfo,
            ConversionMode::Png | ConversionMode::Jpeg => Tool::PdfToPpm,
        }
    }

    pub fn is_text(&self) -> bool {
        matches!(self, ConversionMode::Text | ConversionMode::Layout)
    }

    pub fn is_image(&self) -> bool {
        matches!(self, ConversionMode::Png | ConversionMode::Jpeg)
    }
}

impl fmt::Display for ConversionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ConversionMode {
    type Err = InvokeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let token = s.trim().to_ascii_lowercase();
        ConversionMode::ALL
            .into_iter()
            .find(|mode| mode.name() == token)
            .ok_or_else(|| {
                // Caller input is not echoed back
                InvokeError::InvalidRequest(format!(
                    "Unsupported mode. Must be one of: {}",
                    ModeSet::all()
                ))
            })
    }
}

/// The set of modes a deployment allows
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModeSet {
    modes: Vec<ConversionMode>,
}

impl ModeSet {
    pub fn all() -> Self {
        Self {
            modes: ConversionMode::ALL.to_vec(),
        }
    }

    pub fn new(modes: impl IntoIterator<Item = ConversionMode>) -> Self {
        let mut set = Vec::new();
        for mode in modes {
            if !set.contains(&mode) {
                set.push(mode);
            }
        }
        Self { modes: set }
    }

    pub fn contains(&self, mode: ConversionMode) -> bool {
        self.modes.contains(&mode)
    }

    pub fn iter(&self) -> impl Iterator<Item = ConversionMode> + '_ {
        self.modes.iter().copied()
    }

    /// Tools needed to serve every mode in the set, without duplicates
    pub fn required_tools(&self) -> Vec<Tool> {
        let mut tools = Vec::new();
        for mode in &self.modes {
            let tool = mode.tool();
            if !tools.contains(&tool) {
                tools.push(tool);
            }
        }
        tools
    }

    /// Resolve a caller-supplied mode string against the allow-list
    pub fn resolve(&self, raw: &str) -> Result<ConversionMode, InvokeError> {
        let mode: ConversionMode = raw.parse()?;
        if self.contains(mode) {
            Ok(mode)
        } else {
            Err(InvokeError::InvalidRequest(format!(
                "Mode '{}' is not enabled on this server",
                mode
            )))
        }
    }
}

impl Default for ModeSet {
    fn default() -> Self {
        Self::all()
    }
}

impl fmt::Display for ModeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.modes.iter().map(|m| m.name()).collect();
        f.write_str(&names.join(", "))
    }
}

/// Parses a comma separated list such as `text,png`
impl FromStr for ModeSet {
    type Err = InvokeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let modes = s
            .split(',')
            .filter(|part| !part.trim().is_empty())
            .map(ConversionMode::from_str)
            .collect::<Result<Vec<_>, _>>()?;

        if modes.is_empty() {
            return Err(InvokeError::InvalidRequest(
                "At least one mode must be enabled".to_string(),
            ));
        }

        Ok(ModeSet::new(modes))
    }
}

/// Caller-supplied options, not yet validated
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionOptions {
    /// Single page to convert (1-indexed)
    pub page: Option<u32>,
    /// Render resolution for image modes
    pub dpi: Option<u32>,
    /// First page of a text extraction range
    pub first_page: Option<u32>,
    /// Last page of a text extraction range
    pub last_page: Option<u32>,
}

/// Options after validation against a mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedOptions {
    /// `first..=last`, either end open
    Text {
        first: Option<u32>,
        last: Option<u32>,
    },
    Image {
        page: u32,
        dpi: u32,
    },
    Info,
}

impl ConversionOptions {
    /// Validate the options for `mode`
    ///
    /// Options that do not apply to the mode are rejected rather than
    /// silently ignored.
    pub fn resolve(&self, mode: ConversionMode) -> Result<ResolvedOptions, InvokeError> {
        for (name, value) in [
            ("page", self.page),
            ("first_page", self.first_page),
            ("last_page", self.last_page),
        ] {
            if let Some(n) = value {
                if n == 0 || n > MAX_PAGE {
                    return Err(InvokeError::InvalidRequest(format!(
                        "{} must be between 1 and {}",
                        name, MAX_PAGE
                    )));
                }
            }
        }
        if self.page.is_some() && (self.first_page.is_some() || self.last_page.is_some()) {
            return Err(InvokeError::InvalidRequest(
                "Use either page or first_page/last_page, not both".to_string(),
            ));
        }

        match mode {
            ConversionMode::Text | ConversionMode::Layout => {
                if self.dpi.is_some() {
                    return Err(InvokeError::InvalidRequest(
                        "dpi only applies to image modes".to_string(),
                    ));
                }
                let first = self.first_page.or(self.page);
                let last = self.last_page.or(self.page);
                if let (Some(f), Some(l)) = (first, last) {
                    if f > l {
                        return Err(InvokeError::InvalidRequest(format!(
                            "first_page ({}) is after last_page ({})",
                            f, l
                        )));
                    }
                }
                Ok(ResolvedOptions::Text { first, last })
            }
            ConversionMode::Png | ConversionMode::Jpeg => {
                if self.first_page.is_some() || self.last_page.is_some() {
                    return Err(InvokeError::InvalidRequest(
                        "Image modes render a single page; use 'page'".to_string(),
                    ));
                }
                let dpi = self.dpi.unwrap_or(DEFAULT_DPI);
                if !(MIN_DPI..=MAX_DPI).contains(&dpi) {
                    return Err(InvokeError::InvalidRequest(format!(
                        "dpi must be between {} and {}",
                        MIN_DPI, MAX_DPI
                    )));
                }
                Ok(ResolvedOptions::Image {
                    page: self.page.unwrap_or(1),
                    dpi,
                })
            }
            ConversionMode::Info => {
                if *self != ConversionOptions::default() {
                    return Err(InvokeError::InvalidRequest(
                        "info does not take page or dpi options".to_string(),
                    ));
                }
                Ok(ResolvedOptions::Info)
            }
        }
    }
}
