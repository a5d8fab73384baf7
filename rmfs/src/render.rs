//! Annotation renderer interface.
//!
//! Turning raw note data into an annotated PDF is done by an external engine;
//! the adapter only hands it the document payload plus the configured options.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::RenderError;
use crate::store::FileType;

/// Options forwarded to the renderer. Loaded from the `[render]` config section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Expand pages to fit annotations drawn outside the original page box.
    pub expand_pages: bool,
    /// Opacity of page templates (lined paper etc.), 0.0..=1.0.
    pub template_alpha: f64,
    /// Emit only pages that carry annotations.
    pub only_annotated: bool,
    pub black: String,
    pub white: String,
    pub gray: Option<String>,
    pub highlight: String,
    /// Zero-based pages to render; empty means all.
    pub pages: Vec<u32>,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            expand_pages: true,
            template_alpha: 0.3,
            only_annotated: false,
            black: "black".to_string(),
            white: "white".to_string(),
            gray: None,
            highlight: "#ffff00".to_string(),
            pages: Vec::new(),
        }
    }
}

/// Everything the renderer needs from a document.
pub struct RenderSource<'a> {
    pub name: &'a str,
    pub file_type: FileType,
    pub raw: &'a [u8],
    pub original: &'a [u8],
}

/// Progress callback, called with the completed fraction in `0.0..=1.0`.
pub type Progress<'a> = &'a (dyn Fn(f32) + Send + Sync);

pub trait Renderer: Send + Sync {
    fn render(
        &self,
        source: &RenderSource<'_>,
        config: &RenderConfig,
        progress: Progress<'_>,
    ) -> Result<Bytes, RenderError>;
}

/// Renderer that returns the original document unchanged.
///
/// Used when no annotation engine is wired in: PDFs and EPUBs come back as
/// uploaded, notebooks without an original file cannot be rendered.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughRenderer;

impl Renderer for PassthroughRenderer {
    fn render(
        &self,
        source: &RenderSource<'_>,
        _config: &RenderConfig,
        progress: Progress<'_>,
    ) -> Result<Bytes, RenderError> {
        if source.original.is_empty() {
            return Err(RenderError::Unsupported(format!(
                "{} ({}) has no original content",
                source.name, source.file_type
            )));
        }
        progress(1.0);
        Ok(Bytes::copy_from_slice(source.original))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn passthrough_returns_original_and_reports_progress() {
        let calls = AtomicU32::new(0);
        let progress = |_f: f32| {
            calls.fetch_add(1, Ordering::SeqCst);
        };
        let src = RenderSource {
            name: "doc",
            file_type: FileType::Pdf,
            raw: b"zipped",
            original: b"%PDF-1.4",
        };
        let out = PassthroughRenderer
            .render(&src, &RenderConfig::default(), &progress)
            .unwrap();
        assert_eq!(&out[..], b"%PDF-1.4");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn passthrough_rejects_bare_notebook() {
        let src = RenderSource {
            name: "notes",
            file_type: FileType::Notes,
            raw: b"lines",
            original: b"",
        };
        let err = PassthroughRenderer
            .render(&src, &RenderConfig::default(), &|_| {})
            .unwrap_err();
        assert!(matches!(err, RenderError::Unsupported(_)));
    }
}
