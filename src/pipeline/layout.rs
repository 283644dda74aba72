//! Stage B: layout detection over the page-image area.
//!
//! The detector finds its input by scanning the page-image holding area, so
//! it is not told which files Stage A wrote. Extraction can still work
//! without precise regions; a failure here is reported, never raised.

use crate::config::PipelineConfig;
use crate::error::StageError;
use crate::runner::{TemplateVars, ToolRunner};
use crate::workspace::WorkingDirectorySet;
use tracing::warn;

pub async fn detect_layout(
    runner: &dyn ToolRunner,
    config: &PipelineConfig,
    workspace: &WorkingDirectorySet,
) -> Result<(), StageError> {
    let vars = TemplateVars::new().set_path("page_images", workspace.page_images());
    let invocation = config
        .tools
        .layout
        .render("Running layout detection", &vars)
        .in_dir(&config.base_dir)
        .with_timeout(config.layout_timeout());

    runner.run(&invocation).await.map(|_| ()).map_err(|e| {
        warn!("Layout detection had issues, continuing: {}", e);
        StageError::LayoutDetectionFailed {
            detail: e.to_string(),
        }
    })
}
