//! Stage C: text extraction, one invocation per page image.
//!
//! Pages are issued in ascending page order; with `extract_concurrency > 1`
//! up to that many run at once and complete in any order. Results are
//! re-sorted by page number afterwards, and nothing downstream depends on
//! completion order. One failed page is tolerated; every page failing is not.

use crate::config::PipelineConfig;
use crate::error::{PipelineError, StageError};
use crate::progress::ProgressCallback;
use crate::runner::{TemplateVars, ToolRunner};
use crate::workspace::{PageFile, WorkingDirectorySet};
use futures::future::{BoxFuture, FutureExt};
use futures::stream::{self, StreamExt};
use tracing::{info, warn};

type PageOutcome = (usize, Result<(), StageError>);

/// What Stage C produced.
#[derive(Debug, Clone, Default)]
pub struct ExtractionSummary {
    /// Pages whose extraction succeeded, in page order.
    pub succeeded: Vec<usize>,
    /// One entry per failed page, in page order.
    pub failures: Vec<StageError>,
}

impl ExtractionSummary {
    pub fn total(&self) -> usize {
        self.succeeded.len() + self.failures.len()
    }
}

/// Run extraction for every image in `images`.
///
/// # Errors
/// [`PipelineError::AllExtractionsFailed`] when no page succeeded.
pub async fn extract_pages(
    runner: &dyn ToolRunner,
    config: &PipelineConfig,
    workspace: &WorkingDirectorySet,
    images: &[PageFile],
) -> Result<ExtractionSummary, PipelineError> {
    let total = images.len();
    let progress = config.progress_callback.as_ref();

    // Boxed before buffering: a lazily mapped stream of borrowing futures
    // is not `Send` for every lifetime.
    let pending: Vec<BoxFuture<'_, PageOutcome>> = images
        .iter()
        .map(|image| extract_one(runner, config, workspace, image, total, progress).boxed())
        .collect();
    let mut outcomes: Vec<PageOutcome> = stream::iter(pending)
        .buffer_unordered(config.extract_concurrency.max(1))
        .collect()
        .await;
    outcomes.sort_by_key(|(page, _)| *page);

    let mut summary = ExtractionSummary::default();
    for (page, outcome) in outcomes {
        match outcome {
            Ok(()) => summary.succeeded.push(page),
            Err(e) => summary.failures.push(e),
        }
    }

    if summary.succeeded.is_empty() {
        let first_error = summary
            .failures
            .first()
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no page images to extract".to_string());
        return Err(PipelineError::AllExtractionsFailed { total, first_error });
    }

    info!(
        "Extracted {}/{} pages ({} failed)",
        summary.succeeded.len(),
        total,
        summary.failures.len()
    );
    Ok(summary)
}

async fn extract_one(
    runner: &dyn ToolRunner,
    config: &PipelineConfig,
    workspace: &WorkingDirectorySet,
    image: &PageFile,
    total: usize,
    progress: Option<&ProgressCallback>,
) -> PageOutcome {
    if let Some(cb) = progress {
        cb.on_page_start(image.page, total);
    }

    let json_path = workspace.fragment_path_for(image);
    let vars = TemplateVars::new()
        .set_path("image", &image.path)
        .set_path("json", &json_path);
    let invocation = config
        .tools
        .extract
        .render(format!("Extracting text from {}", image.stem()), &vars)
        .in_dir(&config.base_dir)
        .with_timeout(config.extract_timeout());

    let result = runner.run(&invocation).await.map(|_| ()).map_err(|e| {
        warn!("Page {}: extraction failed: {}", image.page, e);
        StageError::ExtractionFailed {
            page: image.page,
            detail: e.to_string(),
        }
    });

    if let Some(cb) = progress {
        match &result {
            Ok(()) => cb.on_page_complete(image.page, total),
            Err(e) => cb.on_page_error(image.page, total, &e.to_string()),
        }
    }

    (image.page, result)
}
