//! Configuration types for the outline pipeline.
//!
//! All pipeline behaviour is controlled through [`PipelineConfig`], built via
//! its [`PipelineConfigBuilder`]. The external tools themselves are described
//! by [`ToolsConfig`], a set of [`CommandTemplate`]s that can be loaded from
//! a JSON file so deployments can swap scripts without recompiling.

use crate::error::PipelineError;
use crate::progress::ProgressCallback;
use crate::runner::CommandTemplate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration for the pipeline coordinator.
///
/// # Example
/// ```rust
/// use pdf_outline::PipelineConfig;
///
/// let config = PipelineConfig::builder()
///     .base_dir("/srv/outline")
///     .dpi(200)
///     .extract_concurrency(4)
///     .build()
///     .unwrap();
/// assert_eq!(config.dpi, 200);
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// Directory the external tools run in. Working directories and the
    /// relative script paths of [`ToolsConfig`] resolve against it. Default: `.`.
    pub base_dir: PathBuf,

    /// Holding-area layout, relative to `base_dir`.
    pub workspace: WorkspaceLayout,

    /// External tool command templates.
    pub tools: ToolsConfig,

    /// Rasterisation resolution passed to the rasterizer as `{dpi}`. Range: 72–400. Default: 150.
    ///
    /// 150 DPI keeps body text legible for OCR while page images stay small
    /// enough that the layout model processes a textbook in reasonable time.
    pub dpi: u32,

    /// Image extension the rasterizer writes (`{ext}`). Default: `png`.
    pub image_format: String,

    /// Maximum concurrent text-extraction invocations. Default: 1.
    ///
    /// Extraction scripts usually load a model per process; running several
    /// at once multiplies memory use. Raise it on machines with headroom.
    pub extract_concurrency: usize,

    /// Per-invocation deadline for Stage A, in seconds. Default: 300.
    pub rasterize_timeout_secs: u64,

    /// Per-invocation deadline for Stage B, in seconds. Default: 600.
    pub layout_timeout_secs: u64,

    /// Per-page deadline for Stage C, in seconds. Default: 300.
    pub extract_timeout_secs: u64,

    /// Deadline for Stage D, in seconds. Default: 300.
    pub assemble_timeout_secs: u64,

    /// Lifetime of a cached outline, in seconds. Default: 3600.
    pub cache_ttl_secs: u64,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Optional progress callback for real-time stage and page events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("."),
            workspace: WorkspaceLayout::default(),
            tools: ToolsConfig::default(),
            dpi: 150,
            image_format: "png".to_string(),
            extract_concurrency: 1,
            rasterize_timeout_secs: 300,
            layout_timeout_secs: 600,
            extract_timeout_secs: 300,
            assemble_timeout_secs: 300,
            cache_ttl_secs: 3600,
            download_timeout_secs: 120,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("base_dir", &self.base_dir)
            .field("workspace", &self.workspace)
            .field("tools", &self.tools)
            .field("dpi", &self.dpi)
            .field("image_format", &self.image_format)
            .field("extract_concurrency", &self.extract_concurrency)
            .field("rasterize_timeout_secs", &self.rasterize_timeout_secs)
            .field("layout_timeout_secs", &self.layout_timeout_secs)
            .field("extract_timeout_secs", &self.extract_timeout_secs)
            .field("assemble_timeout_secs", &self.assemble_timeout_secs)
            .field("cache_ttl_secs", &self.cache_ttl_secs)
            .field("download_timeout_secs", &self.download_timeout_secs)
            .field(
                "progress_callback",
                &self
                    .progress_callback
                    .as_ref()
                    .map(|_| "<dyn PipelineProgressCallback>"),
            )
            .finish()
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn rasterize_timeout(&self) -> Duration {
        Duration::from_secs(self.rasterize_timeout_secs)
    }

    pub fn layout_timeout(&self) -> Duration {
        Duration::from_secs(self.layout_timeout_secs)
    }

    pub fn extract_timeout(&self) -> Duration {
        Duration::from_secs(self.extract_timeout_secs)
    }

    pub fn assemble_timeout(&self) -> Duration {
        Duration::from_secs(self.assemble_timeout_secs)
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.base_dir = dir.into();
        self
    }

    pub fn workspace(mut self, layout: WorkspaceLayout) -> Self {
        self.config.workspace = layout;
        self
    }

    pub fn tools(mut self, tools: ToolsConfig) -> Self {
        self.config.tools = tools;
        self
    }

    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi.clamp(72, 400);
        self
    }

    pub fn image_format(mut self, ext: impl Into<String>) -> Self {
        self.config.image_format = ext.into();
        self
    }

    pub fn extract_concurrency(mut self, n: usize) -> Self {
        self.config.extract_concurrency = n.max(1);
        self
    }

    pub fn rasterize_timeout_secs(mut self, secs: u64) -> Self {
        self.config.rasterize_timeout_secs = secs;
        self
    }

    pub fn layout_timeout_secs(mut self, secs: u64) -> Self {
        self.config.layout_timeout_secs = secs;
        self
    }

    pub fn extract_timeout_secs(mut self, secs: u64) -> Self {
        self.config.extract_timeout_secs = secs;
        self
    }

    pub fn assemble_timeout_secs(mut self, secs: u64) -> Self {
        self.config.assemble_timeout_secs = secs;
        self
    }

    pub fn cache_ttl_secs(mut self, secs: u64) -> Self {
        self.config.cache_ttl_secs = secs;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, PipelineError> {
        let c = &self.config;
        if c.dpi < 72 || c.dpi > 400 {
            return Err(PipelineError::InvalidConfig(format!(
                "DPI must be 72–400, got {}",
                c.dpi
            )));
        }
        if c.extract_concurrency == 0 {
            return Err(PipelineError::InvalidConfig(
                "Extraction concurrency must be ≥ 1".into(),
            ));
        }
        if c.image_format.is_empty() || c.image_format.contains(&['/', '.'][..]) {
            return Err(PipelineError::InvalidConfig(format!(
                "Image format must be a bare extension, got '{}'",
                c.image_format
            )));
        }
        c.workspace.validate()?;
        c.tools.validate()?;

        // Tools run with `cwd = base_dir` and receive paths under it, so a
        // relative base would be applied twice.
        let mut config = self.config;
        config.base_dir = absolute_base_dir(&config.base_dir)?;
        Ok(config)
    }
}

/// Resolve `dir` against the current directory when it is relative.
pub(crate) fn absolute_base_dir(dir: &Path) -> Result<PathBuf, PipelineError> {
    if dir.is_absolute() {
        return Ok(dir.to_path_buf());
    }
    std::path::absolute(dir).map_err(|e| {
        PipelineError::InvalidConfig(format!(
            "Cannot resolve base directory '{}': {}",
            dir.display(),
            e
        ))
    })
}

// ── Working directories ──────────────────────────────────────────────────

/// Relative locations of the three holding areas.
///
/// The defaults are the paths the stock layout-detection and extraction
/// scripts expect; change them only together with those scripts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceLayout {
    /// Where uploaded PDFs are kept. Never purged.
    pub raw_input: PathBuf,
    /// Where the rasterizer writes `<stem>_page-<n>.<ext>`.
    pub page_images: PathBuf,
    /// Where extraction writes one JSON fragment per page.
    pub fragments: PathBuf,
}

impl Default for WorkspaceLayout {
    fn default() -> Self {
        Self {
            raw_input: PathBuf::from("sample_dataset/pdfs"),
            page_images: PathBuf::from("sample_dataset/pdfs/input_pages"),
            fragments: PathBuf::from("sample_dataset/outputs"),
        }
    }
}

impl WorkspaceLayout {
    fn validate(&self) -> Result<(), PipelineError> {
        for (name, dir) in [
            ("raw_input", &self.raw_input),
            ("page_images", &self.page_images),
            ("fragments", &self.fragments),
        ] {
            if dir.as_os_str().is_empty() {
                return Err(PipelineError::InvalidConfig(format!(
                    "workspace.{name} must not be empty"
                )));
            }
        }
        if self.page_images == self.fragments {
            return Err(PipelineError::InvalidConfig(
                "page_images and fragments must be different directories".into(),
            ));
        }
        Ok(())
    }
}

// ── External tools ───────────────────────────────────────────────────────

/// Command templates for the four external stages.
///
/// Placeholders: `{input}`, `{output_pattern}`, `{dpi}`, `{ext}` (rasterizer);
/// `{page_images}` (layout); `{image}`, `{json}` (extraction);
/// `{name}`, `{fragments}` (assembly). `{fragments}` written as a whole
/// argument expands to one argument per fragment path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub rasterizer: CommandTemplate,
    pub layout: CommandTemplate,
    pub extract: CommandTemplate,
    pub assemble: CommandTemplate,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            rasterizer: CommandTemplate::new(
                "mutool",
                [
                    "convert",
                    "-o",
                    "{output_pattern}",
                    "-F",
                    "{ext}",
                    "-O",
                    "resolution={dpi}",
                    "{input}",
                ],
            ),
            layout: CommandTemplate::new(
                "python",
                [
                    "scripts/layout_detection.py",
                    "--config",
                    "configs/layout_detection_yolo.yaml",
                ],
            )
            .requiring([
                "scripts/layout_detection.py",
                "configs/layout_detection_yolo.yaml",
            ]),
            extract: CommandTemplate::new(
                "python",
                [
                    "scripts/extract_text.py",
                    "--image",
                    "{image}",
                    "--json",
                    "{json}",
                ],
            )
            .requiring(["scripts/extract_text.py"]),
            assemble: CommandTemplate::new(
                "python",
                [
                    "scripts/convert_to_structure.py",
                    "--name",
                    "{name}",
                    "{fragments}",
                ],
            )
            .requiring(["scripts/convert_to_structure.py"]),
        }
    }
}

impl ToolsConfig {
    /// Load tool templates from a JSON file. Missing stages keep their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, PipelineError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::InvalidConfig(format!("cannot read tools file {}: {e}", path.display()))
        })?;
        let tools: ToolsConfig = serde_json::from_str(&text).map_err(|e| {
            PipelineError::InvalidConfig(format!("invalid tools file {}: {e}", path.display()))
        })?;
        tools.validate()?;
        Ok(tools)
    }

    /// The templates paired with a stable display name.
    pub fn named(&self) -> [(&'static str, &CommandTemplate); 4] {
        [
            ("rasterizer", &self.rasterizer),
            ("layout", &self.layout),
            ("extract", &self.extract),
            ("assemble", &self.assemble),
        ]
    }

    fn validate(&self) -> Result<(), PipelineError> {
        for (name, template) in self.named() {
            if template.program.trim().is_empty() {
                return Err(PipelineError::InvalidConfig(format!(
                    "tools.{name}.program must not be empty"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_stock_deployment() {
        let c = PipelineConfig::default();
        assert_eq!(c.dpi, 150);
        assert_eq!(c.cache_ttl_secs, 3600);
        assert_eq!(c.extract_concurrency, 1);
        assert_eq!(c.tools.rasterizer.program, "mutool");
        assert_eq!(
            c.workspace.page_images,
            PathBuf::from("sample_dataset/pdfs/input_pages")
        );
    }

    #[test]
    fn builder_clamps_dpi_and_concurrency() {
        let c = PipelineConfig::builder()
            .dpi(10)
            .extract_concurrency(0)
            .build()
            .unwrap();
        assert_eq!(c.dpi, 72);
        assert_eq!(c.extract_concurrency, 1);
    }

    #[test]
    fn relative_base_dir_is_made_absolute() {
        let c = PipelineConfig::builder().base_dir("deploy").build().unwrap();
        assert!(c.base_dir.is_absolute());
        assert!(c.base_dir.ends_with("deploy"));

        let abs = std::env::temp_dir().join("outline-base");
        let c = PipelineConfig::builder().base_dir(&abs).build().unwrap();
        assert_eq!(c.base_dir, abs);
    }

    #[test]
    fn builder_rejects_dotted_image_format() {
        let err = PipelineConfig::builder()
            .image_format(".png")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("bare extension"));
    }

    #[test]
    fn builder_rejects_shared_holding_areas() {
        let layout = WorkspaceLayout {
            raw_input: "in".into(),
            page_images: "tmp".into(),
            fragments: "tmp".into(),
        };
        assert!(PipelineConfig::builder().workspace(layout).build().is_err());
    }

    #[test]
    fn tools_file_overrides_one_stage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tools.json");
        std::fs::write(
            &path,
            r#"{ "rasterizer": { "program": "pdftoppm", "args": ["-png", "{input}"] } }"#,
        )
        .unwrap();

        let tools = ToolsConfig::from_json_file(&path).unwrap();
        assert_eq!(tools.rasterizer.program, "pdftoppm");
        assert_eq!(tools.extract, ToolsConfig::default().extract);
    }

    #[test]
    fn tools_file_with_empty_program_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tools.json");
        std::fs::write(&path, r#"{ "layout": { "program": " " } }"#).unwrap();
        let err = ToolsConfig::from_json_file(&path).unwrap_err();
        assert!(err.to_string().contains("tools.layout.program"));
    }
}
