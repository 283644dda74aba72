//! The pipeline coordinator: cache check, working-directory hygiene, and
//! stages A→B→C→D for one document.
//!
//! ## Why one lock for the whole run?
//!
//! The layout detector discovers its input by scanning the page-image area,
//! and every run purges that area first. Two overlapping runs would delete
//! each other's pages or feed one document's images into the other's
//! fragments. `run_lock` therefore serialises every run that touches the
//! [`WorkingDirectorySet`]; cache hits never take it.
//!
//! ## Outcome
//!
//! A fresh run returns a [`ProcessOutcome`] carrying the outline and a
//! [`PipelineReport`]; a cache hit returns the stored outline unchanged and
//! invokes no external tool.

use crate::cache::{CacheKey, OutlineCache};
use crate::config::{absolute_base_dir, PipelineConfig};
use crate::error::PipelineError;
use crate::output::{document_stem, PipelineReport, ProcessOutcome, StructuredDocument};
use crate::pipeline::assemble::{self, Assembler, CommandAssembler};
use crate::pipeline::{extract, layout, rasterize, Stage};
use crate::progress::PipelineProgressCallback;
use crate::runner::{CommandRunner, ToolRunner};
use crate::workspace::{sanitize_file_name, PurgeReport, WorkingDirectorySet};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tempfile::TempDir;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Turns PDFs into [`StructuredDocument`]s.
///
/// Cheap to share behind an `Arc`; every method takes `&self`.
pub struct Coordinator {
    config: PipelineConfig,
    runner: Arc<dyn ToolRunner>,
    assembler: Arc<dyn Assembler>,
    cache: Arc<OutlineCache>,
    workspace: WorkingDirectorySet,
    run_lock: Mutex<()>,
}

impl Coordinator {
    pub fn new(
        config: PipelineConfig,
        runner: Arc<dyn ToolRunner>,
        assembler: Arc<dyn Assembler>,
        cache: Arc<OutlineCache>,
    ) -> Self {
        let config = with_absolute_base(config);
        let workspace = WorkingDirectorySet::new(&config.base_dir, &config.workspace);
        Self {
            config,
            runner,
            assembler,
            cache,
            workspace,
            run_lock: Mutex::new(()),
        }
    }

    /// Coordinator running the configured command templates as subprocesses.
    pub fn with_command_tools(config: PipelineConfig, cache: Arc<OutlineCache>) -> Self {
        let config = with_absolute_base(config);
        let runner: Arc<dyn ToolRunner> = Arc::new(CommandRunner);
        let assembler = Arc::new(CommandAssembler::from_config(runner.clone(), &config));
        Self::new(config, runner, assembler, cache)
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<OutlineCache> {
        &self.cache
    }

    pub fn workspace(&self) -> &WorkingDirectorySet {
        &self.workspace
    }

    // ── Entry points ─────────────────────────────────────────────────────

    /// Produce the outline for the PDF at `path`, named `document_name`.
    ///
    /// # Errors
    /// Any fatal stage failure (see [`PipelineError::is_stage_failure`]) or
    /// a working-directory problem. Nothing is cached on error.
    pub async fn process(
        &self,
        path: &Path,
        document_name: &str,
    ) -> Result<ProcessOutcome, PipelineError> {
        let key = CacheKey::for_file(path).map_err(|source| match source.kind() {
            std::io::ErrorKind::NotFound => PipelineError::FileNotFound {
                path: path.to_path_buf(),
            },
            _ => PipelineError::Workspace {
                path: path.to_path_buf(),
                source,
            },
        })?;
        self.process_keyed(path, document_name, key).await
    }

    /// Produce the outline for uploaded bytes.
    ///
    /// The bytes are written to a private temp directory that is removed
    /// when the call returns, whatever the outcome.
    pub async fn process_upload(
        &self,
        bytes: &[u8],
        file_name: &str,
    ) -> Result<ProcessOutcome, PipelineError> {
        let name = sanitize_file_name(file_name)?;
        let key = CacheKey::for_upload(&name, bytes);
        if let Some(hit) = self.cached(&key) {
            return Ok(hit);
        }

        let temp_dir = TempDir::new().map_err(|source| PipelineError::Workspace {
            path: std::env::temp_dir(),
            source,
        })?;
        let upload_path = temp_dir.path().join(&name);
        tokio::fs::write(&upload_path, bytes)
            .await
            .map_err(|source| PipelineError::Workspace {
                path: upload_path.clone(),
                source,
            })?;
        debug!("Saved upload to: {}", upload_path.display());

        self.process_keyed(&upload_path, &name, key).await
    }

    /// [`process`](Self::process), answering stage failures with
    /// [`StructuredDocument::fallback`].
    pub async fn process_or_fallback(
        &self,
        path: &Path,
        document_name: &str,
    ) -> Result<ProcessOutcome, PipelineError> {
        or_fallback(self.process(path, document_name).await, document_name)
    }

    /// [`process_upload`](Self::process_upload), answering stage failures
    /// with [`StructuredDocument::fallback`].
    pub async fn process_upload_or_fallback(
        &self,
        bytes: &[u8],
        file_name: &str,
    ) -> Result<ProcessOutcome, PipelineError> {
        or_fallback(self.process_upload(bytes, file_name).await, file_name)
    }

    /// Recreate the working directories and empty the intermediate areas.
    ///
    /// Waits for any in-flight run to finish first.
    pub async fn cleanup(&self) -> Result<PurgeReport, PipelineError> {
        let _guard = self.run_lock.lock().await;
        self.workspace.ensure()?;
        let report = self.workspace.purge_intermediate();
        info!(
            "Cleanup removed {} files ({} failed)",
            report.removed, report.failed
        );
        Ok(report)
    }

    /// Availability of every program, required file and the working
    /// directories, keyed by what was checked.
    pub fn probe_components(&self) -> BTreeMap<String, bool> {
        let base_dir = &self.config.base_dir;
        let mut components = BTreeMap::new();
        for (_, template) in self.config.tools.named() {
            components
                .entry(template.program.clone())
                .or_insert_with(|| self.runner.is_available(&template.program, base_dir));
            for required in &template.requires {
                components
                    .entry(required.display().to_string())
                    .or_insert_with(|| base_dir.join(required).exists());
            }
        }
        components.insert("working directories".to_string(), self.workspace.exists());
        components
    }

    // ── Internals ────────────────────────────────────────────────────────

    fn cached(&self, key: &CacheKey) -> Option<ProcessOutcome> {
        let entry = self.cache.lookup(key)?;
        info!("Returning cached outline for {}", entry.payload.title);
        self.notify(|cb| cb.on_cache_hit());
        Some(ProcessOutcome {
            document: entry.payload,
            cached: true,
            report: None,
        })
    }

    async fn process_keyed(
        &self,
        path: &Path,
        document_name: &str,
        key: CacheKey,
    ) -> Result<ProcessOutcome, PipelineError> {
        if let Some(hit) = self.cached(&key) {
            return Ok(hit);
        }

        let _guard = self.run_lock.lock().await;
        // Another request may have filled the entry while we waited.
        if let Some(hit) = self.cached(&key) {
            return Ok(hit);
        }

        let (document, report) = self.run_stages(path, document_name).await?;
        self.cache.store(key, document.clone()).await;
        Ok(ProcessOutcome {
            document,
            cached: false,
            report: Some(report),
        })
    }

    async fn run_stages(
        &self,
        path: &Path,
        document_name: &str,
    ) -> Result<(StructuredDocument, PipelineReport), PipelineError> {
        let total_start = Instant::now();
        let file_name = sanitize_file_name(document_name)?;
        let stem = document_stem(&file_name);
        let runner = self.runner.as_ref();
        let mut report = PipelineReport::default();
        info!("Processing PDF: {}", file_name);

        // ── Working directories ──────────────────────────────────────────
        self.workspace.ensure()?;
        self.workspace.purge_intermediate();
        let staged = self.workspace.stage_input(path, &file_name)?;

        // ── Stage A: rasterise ───────────────────────────────────────────
        self.notify(|cb| cb.on_stage_start(Stage::Rasterize));
        let stage_start = Instant::now();
        let pages = rasterize::rasterize(runner, &self.config, &self.workspace, &staged, &stem)
            .await
            .inspect_err(|e| self.stage_failed(Stage::Rasterize, e))?;
        report.rasterize_duration_ms = elapsed_ms(stage_start);
        report.pages_rasterized = pages.len();
        self.notify(|cb| {
            cb.on_stage_complete(Stage::Rasterize, true);
            cb.on_pages_discovered(pages.len());
        });

        // ── Stage B: layout detection (non-fatal) ────────────────────────
        self.notify(|cb| cb.on_stage_start(Stage::LayoutDetection));
        let stage_start = Instant::now();
        let layout_result = layout::detect_layout(runner, &self.config, &self.workspace).await;
        report.layout_duration_ms = elapsed_ms(stage_start);
        report.layout_ok = layout_result.is_ok();
        if let Err(warning) = layout_result {
            report.warnings.push(warning);
        }
        let layout_ok = report.layout_ok;
        self.notify(|cb| cb.on_stage_complete(Stage::LayoutDetection, layout_ok));

        // ── Stage C: per-page extraction ─────────────────────────────────
        self.notify(|cb| cb.on_stage_start(Stage::Extract));
        let stage_start = Instant::now();
        let summary = extract::extract_pages(runner, &self.config, &self.workspace, &pages)
            .await
            .inspect_err(|e| self.stage_failed(Stage::Extract, e))?;
        report.extract_duration_ms = elapsed_ms(stage_start);
        report.pages_extracted = summary.succeeded.len();
        report.pages_failed = summary.failures.len();
        report.warnings.extend(summary.failures);
        self.notify(|cb| cb.on_stage_complete(Stage::Extract, true));

        // ── Stage D: assemble ────────────────────────────────────────────
        self.notify(|cb| cb.on_stage_start(Stage::Assemble));
        let stage_start = Instant::now();
        let (document, fragments) =
            assemble::assemble(self.assembler.as_ref(), &self.workspace, &stem)
                .await
                .inspect_err(|e| self.stage_failed(Stage::Assemble, e))?;
        report.assemble_duration_ms = elapsed_ms(stage_start);
        report.fragments_assembled = fragments;
        self.notify(|cb| cb.on_stage_complete(Stage::Assemble, true));

        report.total_duration_ms = elapsed_ms(total_start);
        info!(
            "Processed {}: {} pages, {} extracted, {} headings in {}ms",
            file_name,
            report.pages_rasterized,
            report.pages_extracted,
            document.headings.len(),
            report.total_duration_ms
        );
        Ok((document, report))
    }

    fn stage_failed(&self, stage: Stage, err: &PipelineError) {
        error!("{} failed: {}", stage, err);
        self.notify(|cb| cb.on_stage_complete(stage, false));
    }

    fn notify(&self, f: impl FnOnce(&dyn PipelineProgressCallback)) {
        if let Some(ref cb) = self.config.progress_callback {
            f(cb.as_ref());
        }
    }
}

/// Replace a stage failure with the fallback outline for `document_name`.
fn or_fallback(
    result: Result<ProcessOutcome, PipelineError>,
    document_name: &str,
) -> Result<ProcessOutcome, PipelineError> {
    match result {
        Err(e) if e.is_stage_failure() => {
            warn!("Returning fallback outline for {}: {}", document_name, e);
            Ok(ProcessOutcome {
                document: StructuredDocument::fallback(document_name),
                cached: false,
                report: None,
            })
        }
        other => other,
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

/// Configs built without the builder may still carry a relative base.
fn with_absolute_base(mut config: PipelineConfig) -> PipelineConfig {
    if let Ok(dir) = absolute_base_dir(&config.base_dir) {
        config.base_dir = dir;
    }
    config
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ToolError;
    use crate::output::FALLBACK_HEADING;

    #[test]
    fn stage_failures_become_fallback() {
        let err = PipelineError::NoPageImages {
            document: "book".into(),
        };
        let outcome = or_fallback(Err(err), "book.pdf").unwrap();
        assert_eq!(outcome.document.title, "book");
        assert_eq!(outcome.document.headings[0].heading, FALLBACK_HEADING);
        assert!(!outcome.cached);
    }

    #[test]
    fn infrastructure_errors_pass_through() {
        let err = PipelineError::Internal("disk on fire".into());
        assert!(matches!(
            or_fallback(Err(err), "book.pdf"),
            Err(PipelineError::Internal(_))
        ));

        let tool = ToolError::Timeout {
            program: "mutool".into(),
            limit: std::time::Duration::from_secs(1),
        };
        let err = PipelineError::RasterizeFailed {
            document: "book".into(),
            source: tool,
        };
        assert!(or_fallback(Err(err), "book.pdf").is_ok());
    }
}
