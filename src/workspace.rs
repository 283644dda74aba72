//! The fixed set of holding areas shared by the external tools.
//!
//! The layout-detection script discovers its input by scanning the
//! page-image area, so the areas are fixed directories rather than per-run
//! temp dirs. Consequently their contents must be purged before every run,
//! and runs must be serialised (see [`crate::Coordinator`]).

use crate::config::WorkspaceLayout;
use crate::error::PipelineError;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Suffix every per-page artefact carries after the document stem.
static PAGE_SUFFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^_page-(\d+)$").expect("page suffix regex is valid"));

/// One per-page artefact: a page image or a JSON fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageFile {
    /// 1-indexed page number parsed from the file name.
    pub page: usize,
    pub path: PathBuf,
}

impl PageFile {
    /// File name without extension, e.g. `book_page-3`.
    pub fn stem(&self) -> String {
        self.path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Outcome of a purge pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeReport {
    pub removed: usize,
    pub failed: usize,
}

/// Absolute paths of the three holding areas.
#[derive(Debug, Clone)]
pub struct WorkingDirectorySet {
    raw_input: PathBuf,
    page_images: PathBuf,
    fragments: PathBuf,
}

impl WorkingDirectorySet {
    pub fn new(base_dir: &Path, layout: &WorkspaceLayout) -> Self {
        Self {
            raw_input: base_dir.join(&layout.raw_input),
            page_images: base_dir.join(&layout.page_images),
            fragments: base_dir.join(&layout.fragments),
        }
    }

    pub fn raw_input(&self) -> &Path {
        &self.raw_input
    }

    pub fn page_images(&self) -> &Path {
        &self.page_images
    }

    pub fn fragments(&self) -> &Path {
        &self.fragments
    }

    /// Create every holding area that does not exist yet.
    pub fn ensure(&self) -> Result<(), PipelineError> {
        for dir in [&self.raw_input, &self.page_images, &self.fragments] {
            std::fs::create_dir_all(dir).map_err(|source| PipelineError::Workspace {
                path: dir.clone(),
                source,
            })?;
        }
        Ok(())
    }

    /// Whether all three holding areas exist.
    pub fn exists(&self) -> bool {
        [&self.raw_input, &self.page_images, &self.fragments]
            .iter()
            .all(|d| d.is_dir())
    }

    /// Empty the page-image and fragment areas. The raw-input area is kept.
    ///
    /// Each entry is removed independently; a failure is logged and counted
    /// but never stops the pass.
    pub fn purge_intermediate(&self) -> PurgeReport {
        let mut report = PurgeReport::default();
        for dir in [&self.page_images, &self.fragments] {
            purge_dir(dir, &mut report);
        }
        debug!(
            "Purged {} intermediate files ({} failed)",
            report.removed, report.failed
        );
        report
    }

    /// Copy `source` into the raw-input area as `file_name`.
    pub fn stage_input(&self, source: &Path, file_name: &str) -> Result<PathBuf, PipelineError> {
        let target = self.raw_input.join(file_name);
        let same_file = match (source.canonicalize(), target.canonicalize()) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        };
        if !same_file {
            std::fs::copy(source, &target).map_err(|source| PipelineError::Workspace {
                path: target.clone(),
                source,
            })?;
        }
        debug!("Saved PDF to: {}", target.display());
        Ok(target)
    }

    /// Output pattern handed to the rasterizer: `<page_images>/<stem>_page-%d.<ext>`.
    pub fn output_pattern(&self, stem: &str, ext: &str) -> PathBuf {
        self.page_images.join(format!("{stem}_page-%d.{ext}"))
    }

    /// Page images of `stem`, in ascending page order.
    pub fn page_images_for(&self, stem: &str, ext: &str) -> Result<Vec<PageFile>, PipelineError> {
        list_pages(&self.page_images, stem, ext)
    }

    /// JSON fragments of `stem`, in ascending page order.
    pub fn fragments_for(&self, stem: &str) -> Result<Vec<PageFile>, PipelineError> {
        list_pages(&self.fragments, stem, "json")
    }

    /// Where extraction writes the fragment for `image`.
    pub fn fragment_path_for(&self, image: &PageFile) -> PathBuf {
        self.fragments.join(format!("{}.json", image.stem()))
    }
}

/// Reduce a client-supplied name to a bare file name.
///
/// Directory components are dropped so an upload named `../../x.pdf` lands
/// inside the raw-input area as `x.pdf`.
pub fn sanitize_file_name(name: &str) -> Result<String, PipelineError> {
    let normalised = name.replace('\\', "/");
    let bare = Path::new(&normalised)
        .file_name()
        .map(|n| n.to_string_lossy().trim().to_string())
        .unwrap_or_default();
    if bare.is_empty() || bare == "." || bare == ".." {
        return Err(PipelineError::InvalidDocumentName {
            name: name.to_string(),
        });
    }
    Ok(bare)
}

/// Page number encoded in `file_name` if it is `<stem>_page-<n>.<ext>`.
pub fn page_number(file_name: &str, stem: &str, ext: &str) -> Option<usize> {
    let without_ext = file_name.strip_suffix(ext)?.strip_suffix('.')?;
    let suffix = without_ext.strip_prefix(stem)?;
    let caps = PAGE_SUFFIX.captures(suffix)?;
    caps[1].parse().ok()
}

fn list_pages(dir: &Path, stem: &str, ext: &str) -> Result<Vec<PageFile>, PipelineError> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(PipelineError::Workspace {
                path: dir.to_path_buf(),
                source,
            })
        }
    };

    let mut pages: Vec<PageFile> = entries
        .filter_map(Result::ok)
        .filter(|e| e.path().is_file())
        .filter_map(|e| {
            let name = e.file_name();
            let page = page_number(&name.to_string_lossy(), stem, ext)?;
            Some(PageFile {
                page,
                path: e.path(),
            })
        })
        .collect();
    // Numeric order: page-2 before page-10.
    pages.sort_by_key(|p| p.page);
    Ok(pages)
}

fn purge_dir(dir: &Path, report: &mut PurgeReport) {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return,
        Err(e) => {
            warn!("Could not list {}: {}", dir.display(), e);
            report.failed += 1;
            return;
        }
    };

    for entry in entries.filter_map(Result::ok) {
        let path = entry.path();
        let result = if path.is_dir() {
            std::fs::remove_dir_all(&path)
        } else {
            std::fs::remove_file(&path)
        };
        match result {
            Ok(()) => report.removed += 1,
            Err(e) => {
                warn!("Could not delete {}: {}", path.display(), e);
                report.failed += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set_in(dir: &Path) -> WorkingDirectorySet {
        let set = WorkingDirectorySet::new(dir, &WorkspaceLayout::default());
        set.ensure().unwrap();
        set
    }

    #[test]
    fn page_number_parsing() {
        assert_eq!(page_number("book_page-3.png", "book", "png"), Some(3));
        assert_eq!(page_number("book_page-12.json", "book", "json"), Some(12));
        assert_eq!(page_number("book_page-3.jpg", "book", "png"), None);
        assert_eq!(page_number("notebook_page-3.png", "book", "png"), None);
        assert_eq!(page_number("book_page-x.png", "book", "png"), None);
        assert_eq!(page_number("book_page-3.png.bak", "book", "png"), None);
    }

    #[test]
    fn ensure_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let set = set_in(dir.path());
        set.ensure().unwrap();
        assert!(set.exists());
        assert!(dir.path().join("sample_dataset/pdfs/input_pages").is_dir());
    }

    #[test]
    fn purge_keeps_raw_input_and_directories() {
        let dir = tempfile::tempdir().unwrap();
        let set = set_in(dir.path());
        std::fs::write(set.raw_input().join("book.pdf"), b"%PDF").unwrap();
        std::fs::write(set.page_images().join("old_page-1.png"), b"").unwrap();
        std::fs::create_dir(set.page_images().join("nested")).unwrap();
        std::fs::write(set.fragments().join("old_page-1.json"), b"{}").unwrap();

        let report = set.purge_intermediate();
        assert_eq!(report, PurgeReport { removed: 3, failed: 0 });
        assert!(set.raw_input().join("book.pdf").exists());
        assert!(set.page_images().is_dir());
        assert_eq!(std::fs::read_dir(set.fragments()).unwrap().count(), 0);
    }

    #[test]
    fn purge_of_missing_directories_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let set = WorkingDirectorySet::new(dir.path(), &WorkspaceLayout::default());
        assert_eq!(set.purge_intermediate(), PurgeReport::default());
    }

    #[test]
    fn pages_listed_in_numeric_order() {
        let dir = tempfile::tempdir().unwrap();
        let set = set_in(dir.path());
        for n in [10, 2, 1] {
            std::fs::write(set.page_images().join(format!("book_page-{n}.png")), b"").unwrap();
        }
        std::fs::write(set.page_images().join("other_page-1.png"), b"").unwrap();

        let pages: Vec<usize> = set
            .page_images_for("book", "png")
            .unwrap()
            .iter()
            .map(|p| p.page)
            .collect();
        assert_eq!(pages, vec![1, 2, 10]);
    }

    #[test]
    fn fragment_path_mirrors_image_stem() {
        let dir = tempfile::tempdir().unwrap();
        let set = set_in(dir.path());
        let image = PageFile {
            page: 4,
            path: set.page_images().join("book_page-4.png"),
        };
        assert_eq!(
            set.fragment_path_for(&image),
            set.fragments().join("book_page-4.json")
        );
    }

    #[test]
    fn stage_input_copies_under_original_name() {
        let dir = tempfile::tempdir().unwrap();
        let set = set_in(dir.path());
        let src = dir.path().join("upload.tmp");
        std::fs::write(&src, b"%PDF-1.4").unwrap();

        let staged = set.stage_input(&src, "book.pdf").unwrap();
        assert_eq!(staged, set.raw_input().join("book.pdf"));
        assert_eq!(std::fs::read(&staged).unwrap(), b"%PDF-1.4");

        // Staging a file onto itself leaves it intact.
        let again = set.stage_input(&staged, "book.pdf").unwrap();
        assert_eq!(std::fs::read(again).unwrap(), b"%PDF-1.4");
    }

    #[test]
    fn sanitize_strips_directories() {
        assert_eq!(sanitize_file_name("book.pdf").unwrap(), "book.pdf");
        assert_eq!(sanitize_file_name("../../etc/x.pdf").unwrap(), "x.pdf");
        assert_eq!(sanitize_file_name("C:\\docs\\y.pdf").unwrap(), "y.pdf");
        assert!(sanitize_file_name("").is_err());
        assert!(sanitize_file_name("..").is_err());
    }
}
