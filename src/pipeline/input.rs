//! Input resolution: turn a CLI argument (path or URL) into a local PDF.
//!
//! ## Why check the magic bytes here?
//!
//! The rasterizer is an external process; handed a non-PDF it fails with an
//! opaque stderr dump several seconds later. Checking `%PDF` up front gives
//! the caller [`PipelineError::NotAPdf`] instead. Downloads land in a
//! `TempDir` owned by [`ResolvedInput`], removed when it is dropped.

use crate::error::PipelineError;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use tracing::{debug, info};

const PDF_MAGIC: &[u8; 4] = b"%PDF";
const DEFAULT_DOWNLOAD_NAME: &str = "downloaded.pdf";

/// A local PDF ready to be handed to the coordinator.
#[derive(Debug)]
pub enum ResolvedInput {
    /// Input was already a local file.
    Local(PathBuf),
    /// Input was a URL; the `TempDir` lives as long as this value.
    Downloaded { path: PathBuf, _temp_dir: TempDir },
}

impl ResolvedInput {
    pub fn path(&self) -> &Path {
        match self {
            ResolvedInput::Local(p) => p,
            ResolvedInput::Downloaded { path, .. } => path,
        }
    }

    /// Document name used for the outline title and the staged copy.
    pub fn file_name(&self) -> String {
        self.path()
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| DEFAULT_DOWNLOAD_NAME.to_string())
    }
}

pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Resolve `input` to a local PDF, downloading it first if it is a URL.
pub async fn resolve_input(input: &str, timeout: Duration) -> Result<ResolvedInput, PipelineError> {
    if is_url(input) {
        download_url(input, timeout).await
    } else {
        resolve_local(Path::new(input))
    }
}

fn resolve_local(path: &Path) -> Result<ResolvedInput, PipelineError> {
    let mut file = std::fs::File::open(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::PermissionDenied => PipelineError::PermissionDenied {
            path: path.to_path_buf(),
        },
        _ => PipelineError::FileNotFound {
            path: path.to_path_buf(),
        },
    })?;
    if !path.is_file() {
        return Err(PipelineError::FileNotFound {
            path: path.to_path_buf(),
        });
    }

    let mut magic = [0u8; 4];
    let read = read_prefix(&mut file, &mut magic);
    check_magic(path, &magic[..read])?;

    debug!("Resolved local PDF: {}", path.display());
    Ok(ResolvedInput::Local(path.to_path_buf()))
}

fn read_prefix(file: &mut std::fs::File, buf: &mut [u8; 4]) -> usize {
    let mut filled = 0;
    while filled < buf.len() {
        match file.read(&mut buf[filled..]) {
            Ok(0) | Err(_) => break,
            Ok(n) => filled += n,
        }
    }
    filled
}

/// Reject anything whose first bytes are not `%PDF`, including short files.
pub fn check_magic(path: &Path, prefix: &[u8]) -> Result<(), PipelineError> {
    if prefix.len() >= 4 && &prefix[..4] == PDF_MAGIC {
        return Ok(());
    }
    let mut magic = [0u8; 4];
    let n = prefix.len().min(4);
    magic[..n].copy_from_slice(&prefix[..n]);
    Err(PipelineError::NotAPdf {
        path: path.to_path_buf(),
        magic,
    })
}

async fn download_url(url: &str, timeout: Duration) -> Result<ResolvedInput, PipelineError> {
    info!("Downloading PDF from: {}", url);

    let failed = |reason: String| PipelineError::DownloadFailed {
        url: url.to_string(),
        reason,
    };

    let client = reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| failed(e.to_string()))?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            PipelineError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout.as_secs(),
            }
        } else {
            failed(e.to_string())
        }
    })?;

    if !response.status().is_success() {
        return Err(failed(format!("HTTP {}", response.status())));
    }

    let file_name = filename_from_url(url);
    let bytes = response.bytes().await.map_err(|e| failed(e.to_string()))?;

    let temp_dir = TempDir::new().map_err(|e| PipelineError::Internal(e.to_string()))?;
    let file_path = temp_dir.path().join(&file_name);
    check_magic(&file_path, &bytes)?;

    tokio::fs::write(&file_path, &bytes)
        .await
        .map_err(|source| PipelineError::Workspace {
            path: file_path.clone(),
            source,
        })?;

    info!("Downloaded {} bytes to: {}", bytes.len(), file_path.display());
    Ok(ResolvedInput::Downloaded {
        path: file_path,
        _temp_dir: temp_dir,
    })
}

/// Last path segment of `url` if it looks like a file name.
pub fn filename_from_url(url: &str) -> String {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|parsed| {
            parsed
                .path_segments()
                .and_then(|mut segments| segments.next_back().map(str::to_string))
        })
        .filter(|last| !last.is_empty() && last.contains('.'))
        .unwrap_or_else(|| DEFAULT_DOWNLOAD_NAME.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_urls() {
        assert!(is_url("https://example.com/doc.pdf"));
        assert!(is_url("http://example.com/doc.pdf"));
        assert!(!is_url("/tmp/doc.pdf"));
        assert!(!is_url(""));
    }

    #[test]
    fn filename_comes_from_last_segment() {
        assert_eq!(filename_from_url("https://x.org/papers/report.pdf"), "report.pdf");
        assert_eq!(filename_from_url("https://x.org/papers/"), "downloaded.pdf");
        assert_eq!(filename_from_url("https://x.org/download?id=3"), "downloaded.pdf");
    }

    #[test]
    fn magic_check_rejects_short_and_foreign_files() {
        let p = Path::new("x.pdf");
        assert!(check_magic(p, b"%PDF-1.7").is_ok());
        assert!(matches!(
            check_magic(p, b"PK\x03\x04"),
            Err(PipelineError::NotAPdf { magic, .. }) if &magic == b"PK\x03\x04"
        ));
        assert!(check_magic(p, b"%P").is_err());
    }

    #[tokio::test]
    async fn resolves_local_pdf() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("book.pdf");
        std::fs::write(&path, b"%PDF-1.4\n%%EOF").unwrap();

        let resolved = resolve_input(path.to_str().unwrap(), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(resolved.path(), path);
        assert_eq!(resolved.file_name(), "book.pdf");
    }

    #[tokio::test]
    async fn missing_file_is_not_found() {
        let err = resolve_input("/definitely/not/here.pdf", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::FileNotFound { .. }));
    }
}
