//! Stage A: rasterise the whole PDF into one image per page.
//!
//! The rasterizer is invoked once with an output pattern
//! (`<page_images>/<stem>_page-%d.png`); the pages it produced are then
//! discovered by listing the page-image area. Without page images nothing
//! downstream can run, so both a tool failure and an empty result are fatal.

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::runner::{TemplateVars, ToolRunner};
use crate::workspace::{PageFile, WorkingDirectorySet};
use std::path::Path;
use tracing::{info, warn};

/// Rasterise `pdf_path` and return its page images in page order.
pub async fn rasterize(
    runner: &dyn ToolRunner,
    config: &PipelineConfig,
    workspace: &WorkingDirectorySet,
    pdf_path: &Path,
    stem: &str,
) -> Result<Vec<PageFile>, PipelineError> {
    let ext = config.image_format.as_str();
    let vars = TemplateVars::new()
        .set_path("input", pdf_path)
        .set_path("output_pattern", &workspace.output_pattern(stem, ext))
        .set("dpi", config.dpi.to_string())
        .set("ext", ext);

    let invocation = config
        .tools
        .rasterizer
        .render(format!("Converting {stem}"), &vars)
        .in_dir(&config.base_dir)
        .with_timeout(config.rasterize_timeout());

    runner
        .run(&invocation)
        .await
        .map_err(|source| PipelineError::RasterizeFailed {
            document: stem.to_string(),
            source,
        })?;

    let pages = workspace.page_images_for(stem, ext)?;
    if pages.is_empty() {
        warn!("Rasteriser reported success but wrote no pages for {}", stem);
        return Err(PipelineError::NoPageImages {
            document: stem.to_string(),
        });
    }

    info!("Rasterised {} pages of {}", pages.len(), stem);
    Ok(pages)
}
