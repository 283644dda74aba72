//! Output types: the structured outline and the per-run report.

use crate::error::StageError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Heading used by the fallback outline.
pub const FALLBACK_HEADING: &str = "Processing Information";

/// Single point carried by the fallback outline.
pub const FALLBACK_POINT: &str = "PDF processing failed. Please check server logs.";

/// The final output of the pipeline: a title plus ordered headings.
///
/// Produced entirely by the assembler; the coordinator only caches it and
/// passes it through. Unknown top-level fields emitted by the assembler are
/// kept in `extra` so a cached outline serialises byte-for-byte the same as
/// the fresh one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredDocument {
    #[serde(rename = "document_title", alias = "title")]
    pub title: String,

    #[serde(default)]
    pub headings: Vec<Heading>,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// One heading and its ordered points.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Heading {
    pub heading: String,
    #[serde(default)]
    pub points: Vec<String>,
}

impl StructuredDocument {
    pub fn new(title: impl Into<String>, headings: Vec<Heading>) -> Self {
        Self {
            title: title.into(),
            headings,
            extra: serde_json::Map::new(),
        }
    }

    /// The outline returned when the pipeline fails for `file_name`.
    ///
    /// The title is the file name without its extension so the caller can
    /// still tell which upload the answer belongs to.
    pub fn fallback(file_name: &str) -> Self {
        Self::new(
            document_stem(file_name),
            vec![Heading {
                heading: FALLBACK_HEADING.to_string(),
                points: vec![FALLBACK_POINT.to_string()],
            }],
        )
    }

    /// Total number of points across every heading.
    pub fn point_count(&self) -> usize {
        self.headings.iter().map(|h| h.points.len()).sum()
    }
}

/// File name without directory and extension: `"dir/book.pdf"` → `"book"`.
pub fn document_stem(file_name: &str) -> String {
    Path::new(file_name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| file_name.to_string())
}

/// What happened during one fresh (uncached) pipeline run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineReport {
    /// Page images produced by Stage A.
    pub pages_rasterized: usize,
    /// Pages whose extraction succeeded in Stage C.
    pub pages_extracted: usize,
    /// Pages whose extraction failed in Stage C.
    pub pages_failed: usize,
    /// Fragments handed to the assembler in Stage D.
    pub fragments_assembled: usize,
    /// Whether Stage B completed without error.
    pub layout_ok: bool,
    /// Non-fatal failures, in the order they were observed.
    pub warnings: Vec<StageError>,
    pub rasterize_duration_ms: u64,
    pub layout_duration_ms: u64,
    pub extract_duration_ms: u64,
    pub assemble_duration_ms: u64,
    pub total_duration_ms: u64,
}

/// Result of [`crate::Coordinator::process`].
#[derive(Debug, Clone, Serialize)]
pub struct ProcessOutcome {
    pub document: StructuredDocument,
    /// `true` when the outline came from the cache and no tool ran.
    pub cached: bool,
    /// Present only for fresh runs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<PipelineReport>,
}
