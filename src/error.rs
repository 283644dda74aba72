//! Error types for the pdf-outline library.
//!
//! Three error types reflect three distinct failure modes:
//!
//! * [`PipelineError`] — **Fatal**: the request cannot produce an outline
//!   (rasterizer failed, no page could be extracted, the assembler returned
//!   nothing) or the working directories could not be prepared. Returned as
//!   `Err(PipelineError)` from [`crate::Coordinator::process`].
//!
//! * [`StageError`] — **Non-fatal**: layout detection failed, or a single
//!   page failed text extraction. Recorded in
//!   [`crate::output::PipelineReport`] while the pipeline carries on.
//!
//! * [`ToolError`] — what a [`crate::runner::ToolRunner`] reports when an
//!   external tool could not be spawned, exited non-zero, or timed out. The
//!   stage that issued the call decides whether it is fatal.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// All fatal errors returned by the pipeline coordinator.
#[derive(Debug, Error)]
pub enum PipelineError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The file exists and was read, but is not a PDF.
    #[error("File is not a valid PDF: '{path}'\nFirst bytes: {magic:?}")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'\nIncrease --download-timeout.")]
    DownloadTimeout { url: String, secs: u64 },

    /// The upload or document name cannot be used as a file name.
    #[error("Invalid document name '{name}'")]
    InvalidDocumentName { name: String },

    // ── Stage failures ────────────────────────────────────────────────────
    /// Stage A: the rasterizer exited with an error or timed out.
    #[error("Rasterisation of '{document}' failed: {source}")]
    RasterizeFailed {
        document: String,
        #[source]
        source: ToolError,
    },

    /// Stage A ran but left no `<stem>_page-<n>` images behind.
    #[error("Rasteriser produced no page images for '{document}'")]
    NoPageImages { document: String },

    /// Stage C: every per-page extraction failed.
    #[error("Text extraction failed for all {total} pages.\nFirst error: {first_error}")]
    AllExtractionsFailed { total: usize, first_error: String },

    /// Stage D: no per-page fragment matched the document prefix.
    #[error("No JSON fragments found for '{document}'")]
    NoFragments { document: String },

    /// Stage D: the assembler ran but returned an empty/falsy result.
    #[error("Structure assembly returned an empty result for '{document}'")]
    EmptyAssembly { document: String },

    /// Stage D: the assembler itself failed.
    #[error("Structure assembly failed for '{document}': {detail}")]
    AssemblyFailed { document: String, detail: String },

    // ── Infrastructure errors ─────────────────────────────────────────────
    /// A working directory could not be created, purged or written.
    #[error("Working directory error at '{path}': {source}")]
    Workspace {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    /// `true` for failures of the four stages themselves.
    ///
    /// The HTTP surface answers these with the fallback outline; every other
    /// variant is a server or input problem and surfaces as a JSON error.
    pub fn is_stage_failure(&self) -> bool {
        matches!(
            self,
            PipelineError::RasterizeFailed { .. }
                | PipelineError::NoPageImages { .. }
                | PipelineError::AllExtractionsFailed { .. }
                | PipelineError::NoFragments { .. }
                | PipelineError::EmptyAssembly { .. }
                | PipelineError::AssemblyFailed { .. }
        )
    }
}

/// A non-fatal stage failure, recorded in the run report.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum StageError {
    /// Stage B failed; extraction continues without precise regions.
    #[error("Layout detection failed: {detail}")]
    LayoutDetectionFailed { detail: String },

    /// Stage C failed for one page.
    #[error("Page {page}: text extraction failed: {detail}")]
    ExtractionFailed { page: usize, detail: String },
}

/// Failure of a single external tool invocation.
#[derive(Debug, Clone, Error)]
pub enum ToolError {
    /// The program could not be started at all (missing binary, bad cwd).
    #[error("could not start '{program}': {detail}")]
    Spawn { program: String, detail: String },

    /// The program ran and exited unsuccessfully.
    #[error("'{program}' exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: String,
        stderr: String,
    },

    /// The program did not finish within its deadline and was killed.
    #[error("'{program}' timed out after {limit:?}")]
    Timeout { program: String, limit: Duration },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_extractions_failed_display() {
        let e = PipelineError::AllExtractionsFailed {
            total: 3,
            first_error: "exit status 1".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("all 3 pages"), "got: {msg}");
        assert!(msg.contains("exit status 1"));
    }

    #[test]
    fn rasterize_failure_carries_tool_error() {
        let e = PipelineError::RasterizeFailed {
            document: "book".into(),
            source: ToolError::Timeout {
                program: "mutool".into(),
                limit: Duration::from_secs(30),
            },
        };
        assert!(e.to_string().contains("book"));
        assert!(e.to_string().contains("30s"));
        assert!(e.is_stage_failure());
    }

    #[test]
    fn workspace_errors_are_not_stage_failures() {
        let e = PipelineError::Workspace {
            path: PathBuf::from("sample_dataset/outputs"),
            source: std::io::Error::other("disk full"),
        };
        assert!(!e.is_stage_failure());
        assert!(!PipelineError::Internal("x".into()).is_stage_failure());
    }

    #[test]
    fn stage_error_display() {
        let e = StageError::ExtractionFailed {
            page: 4,
            detail: "no text".into(),
        };
        assert_eq!(e.to_string(), "Page 4: text extraction failed: no text");
    }

    #[test]
    fn tool_error_failed_display() {
        let e = ToolError::Failed {
            program: "python".into(),
            status: "exit status: 2".into(),
            stderr: "Traceback".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("python"));
        assert!(msg.contains("Traceback"));
    }
}
