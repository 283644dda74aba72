//! Pipeline stages for PDF-to-outline conversion.
//!
//! Each submodule drives exactly one external step. None of them knows about
//! caching or locking; [`crate::Coordinator`] sequences them.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ rasterize ──▶ layout ──▶ extract ──▶ assemble
//! (path/URL)  (A: mutool)   (B: YOLO)  (C: per page) (D: outline)
//! ```
//!
//! 1. [`input`]     — canonicalise a CLI path or URL to a local PDF
//! 2. [`rasterize`] — one rasterizer call, `<stem>_page-<n>.png` per page; fatal on failure
//! 3. [`layout`]    — one layout-detection call over the page-image area; never fatal
//! 4. [`extract`]   — one extraction call per page; fatal only if every page fails
//! 5. [`assemble`]  — all fragments to the [`assemble::Assembler`] in one call

pub mod assemble;
pub mod extract;
pub mod input;
pub mod layout;
pub mod rasterize;

use serde::{Deserialize, Serialize};
use std::fmt;

/// The four external stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Rasterize,
    LayoutDetection,
    Extract,
    Assemble,
}

impl Stage {
    pub const ALL: [Stage; 4] = [
        Stage::Rasterize,
        Stage::LayoutDetection,
        Stage::Extract,
        Stage::Assemble,
    ];

    /// Whether a failure of this stage aborts the request outright.
    ///
    /// Extraction is fatal only when *every* page fails, which the stage
    /// itself decides; a single page failure is not.
    pub fn is_fatal(self) -> bool {
        !matches!(self, Stage::LayoutDetection)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Rasterize => "Converting PDF to images",
            Stage::LayoutDetection => "Layout detection",
            Stage::Extract => "Text extraction",
            Stage::Assemble => "Creating structured output",
        };
        f.write_str(name)
    }
}
