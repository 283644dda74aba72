//! # pdf-outline
//!
//! Turn a PDF into a structured outline (a title plus headings with ordered
//! points) by driving an external toolchain, with a result cache and an
//! HTTP front end.
//!
//! ## Why a coordinator and not a library of parsers?
//!
//! Rasterising, detecting layout regions and reading text off page images
//! are each done well by existing tools (`mutool`, a YOLO layout model, an
//! OCR script). This crate owns what sits between them: working-directory
//! hygiene, stage ordering, per-stage timeouts, which failures are fatal,
//! caching, and the HTTP contract. Every tool call goes through
//! [`ToolRunner`], so the whole pipeline runs in tests without any of the
//! tools installed.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 0. Cache     md5(path + size + mtime) → fresh outline? return it
//!  ├─ 1. Stage     purge intermediate areas, copy PDF into raw-input area
//!  ├─ 2. Rasterise one image per page                      (fatal)
//!  ├─ 3. Layout    region detection over all page images   (non-fatal)
//!  ├─ 4. Extract   one JSON fragment per page              (fatal if none)
//!  ├─ 5. Assemble  fragments → StructuredDocument          (fatal if empty)
//!  └─ 6. Store     cache the outline, return it
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pdf_outline::{Coordinator, OutlineCache, PipelineConfig};
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PipelineConfig::builder().base_dir("/srv/outline").build()?;
//!     let cache = Arc::new(OutlineCache::new(config.cache_ttl()));
//!     let coordinator = Coordinator::with_command_tools(config, cache);
//!
//!     let outcome = coordinator.process(Path::new("book.pdf"), "book.pdf").await?;
//!     println!("{}", serde_json::to_string_pretty(&outcome.document)?);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pdf-outline` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when embedding the coordinator or router in another service:
//! ```toml
//! pdf-outline = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod cache;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod runner;
pub mod server;
pub mod workspace;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use cache::{CacheEntry, CacheKey, OutlineCache};
pub use config::{PipelineConfig, PipelineConfigBuilder, ToolsConfig, WorkspaceLayout};
pub use coordinator::Coordinator;
pub use error::{PipelineError, StageError, ToolError};
pub use output::{Heading, PipelineReport, ProcessOutcome, StructuredDocument};
pub use pipeline::assemble::{Assembler, CommandAssembler};
pub use pipeline::Stage;
pub use progress::{NoopProgressCallback, PipelineProgressCallback, ProgressCallback};
pub use runner::{CommandRunner, CommandTemplate, ToolInvocation, ToolOutput, ToolRunner};
pub use server::{build_router, serve, AppState};
pub use workspace::{PurgeReport, WorkingDirectorySet};
