//! Fake tools shared by the integration tests.
//!
//! `FakeTools` stands in for every external program: the "rasteriser" writes
//! `N` page images into the output pattern, "extraction" writes a fragment
//! per image, and layout detection does nothing. Every invocation is
//! recorded so tests can assert which stages ran.

#![allow(dead_code)]

use async_trait::async_trait;
use pdf_outline::pipeline::assemble::AssemblyError;
use pdf_outline::{
    Assembler, Heading, StructuredDocument, ToolError, ToolInvocation, ToolOutput, ToolRunner,
};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Rasterize,
    Layout,
    Extract,
    Other,
}

pub fn kind(invocation: &ToolInvocation) -> Kind {
    let has = |s: &str| invocation.args.iter().any(|a| a == s);
    if invocation.program == "mutool" {
        Kind::Rasterize
    } else if has("scripts/layout_detection.py") {
        Kind::Layout
    } else if has("scripts/extract_text.py") {
        Kind::Extract
    } else {
        Kind::Other
    }
}

#[derive(Default)]
pub struct FakeTools {
    pub pages: usize,
    pub fail_rasterize: bool,
    pub fail_layout: bool,
    pub fail_pages: HashSet<usize>,
    pub calls: Mutex<Vec<ToolInvocation>>,
}

impl FakeTools {
    pub fn with_pages(pages: usize) -> Self {
        Self {
            pages,
            ..Default::default()
        }
    }

    pub fn count(&self, k: Kind) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| kind(c) == k)
            .count()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn extracted_images(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| kind(c) == Kind::Extract)
            .filter_map(|c| c.arg_after("--image").map(file_name))
            .collect()
    }
}

pub fn file_name(path: &str) -> String {
    Path::new(path)
        .file_name()
        .unwrap()
        .to_string_lossy()
        .into_owned()
}

fn failed(program: &str) -> ToolError {
    ToolError::Failed {
        program: program.to_string(),
        status: "exit status: 1".to_string(),
        stderr: "boom".to_string(),
    }
}

fn ok() -> ToolOutput {
    ToolOutput {
        stdout: String::new(),
        stderr: String::new(),
    }
}

#[async_trait]
impl ToolRunner for FakeTools {
    async fn run(&self, invocation: &ToolInvocation) -> Result<ToolOutput, ToolError> {
        self.calls.lock().unwrap().push(invocation.clone());
        match kind(invocation) {
            Kind::Rasterize => {
                if self.fail_rasterize {
                    return Err(failed("mutool"));
                }
                let pattern = invocation.arg_after("-o").unwrap();
                for n in 1..=self.pages {
                    std::fs::write(pattern.replace("%d", &n.to_string()), b"png").unwrap();
                }
                Ok(ok())
            }
            Kind::Layout if self.fail_layout => Err(ToolError::Timeout {
                program: "python".into(),
                limit: std::time::Duration::from_secs(600),
            }),
            Kind::Layout => Ok(ok()),
            Kind::Extract => {
                let image = invocation.arg_after("--image").unwrap();
                let page: usize = image
                    .rsplit("_page-")
                    .next()
                    .and_then(|s| s.strip_suffix(".png"))
                    .and_then(|s| s.parse().ok())
                    .unwrap();
                if self.fail_pages.contains(&page) {
                    return Err(failed("python"));
                }
                std::fs::write(invocation.arg_after("--json").unwrap(), b"{}").unwrap();
                Ok(ok())
            }
            Kind::Other => Ok(ok()),
        }
    }

    fn is_available(&self, program: &str, _base_dir: &Path) -> bool {
        program == "mutool"
    }
}

/// Assembler producing one heading per fragment, or the empty sentinel.
#[derive(Default)]
pub struct FakeAssembler {
    pub empty: bool,
    pub calls: Mutex<Vec<Vec<PathBuf>>>,
}

impl FakeAssembler {
    pub fn empty() -> Self {
        Self {
            empty: true,
            ..Default::default()
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn last_fragments(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .last()
            .unwrap()
            .iter()
            .map(|p| file_name(&p.to_string_lossy()))
            .collect()
    }
}

#[async_trait]
impl Assembler for FakeAssembler {
    async fn assemble(
        &self,
        document_name: &str,
        fragments: &[PathBuf],
    ) -> Result<Option<StructuredDocument>, AssemblyError> {
        self.calls.lock().unwrap().push(fragments.to_vec());
        if self.empty {
            return Ok(None);
        }
        let headings = fragments
            .iter()
            .enumerate()
            .map(|(i, _)| Heading {
                heading: format!("Section {}", i + 1),
                points: vec!["point".to_string()],
            })
            .collect();
        Ok(Some(StructuredDocument::new(document_name, headings)))
    }
}
