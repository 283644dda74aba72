//! Stage D: merge per-page fragments into a [`StructuredDocument`].
//!
//! How headings and points are inferred from the fragments is the business
//! of the [`Assembler`]; this crate treats it as an opaque collaborator.
//! [`CommandAssembler`] runs an external script that prints the outline as
//! JSON on stdout. An empty or falsy answer (`null`, `false`, `{}`, `[]`,
//! `""`, `0`, or no output at all) means "nothing could be assembled".

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::output::StructuredDocument;
use crate::runner::{CommandTemplate, TemplateVars, ToolRunner};
use crate::workspace::WorkingDirectorySet;
use async_trait::async_trait;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Error type returned by assemblers.
pub type AssemblyError = Box<dyn std::error::Error + Send + Sync>;

/// Turns a document's fragments into an outline.
#[async_trait]
pub trait Assembler: Send + Sync {
    /// Assemble `fragments` (in page order) of the document `document_name`.
    ///
    /// `Ok(None)` is the empty/falsy sentinel.
    async fn assemble(
        &self,
        document_name: &str,
        fragments: &[PathBuf],
    ) -> Result<Option<StructuredDocument>, AssemblyError>;
}

/// [`Assembler`] that shells out through a [`ToolRunner`].
pub struct CommandAssembler {
    runner: Arc<dyn ToolRunner>,
    template: CommandTemplate,
    base_dir: PathBuf,
    timeout: Duration,
}

impl CommandAssembler {
    pub fn new(
        runner: Arc<dyn ToolRunner>,
        template: CommandTemplate,
        base_dir: impl Into<PathBuf>,
        timeout: Duration,
    ) -> Self {
        Self {
            runner,
            template,
            base_dir: base_dir.into(),
            timeout,
        }
    }

    /// Assembler using `config.tools.assemble`.
    pub fn from_config(runner: Arc<dyn ToolRunner>, config: &PipelineConfig) -> Self {
        Self::new(
            runner,
            config.tools.assemble.clone(),
            config.base_dir.clone(),
            config.assemble_timeout(),
        )
    }
}

#[async_trait]
impl Assembler for CommandAssembler {
    async fn assemble(
        &self,
        document_name: &str,
        fragments: &[PathBuf],
    ) -> Result<Option<StructuredDocument>, AssemblyError> {
        let vars = TemplateVars::new()
            .set("name", document_name)
            .set_many(
                "fragments",
                fragments.iter().map(|p| p.to_string_lossy().into_owned()),
            );
        let invocation = self
            .template
            .render(format!("Assembling outline for {document_name}"), &vars)
            .in_dir(&self.base_dir)
            .with_timeout(self.timeout);

        let output = self.runner.run(&invocation).await?;
        parse_outline(&output.stdout)
    }
}

/// Parse assembler stdout.
///
/// Scripts often print progress before the result, so when the whole output
/// is not JSON the last non-empty line is tried instead.
pub fn parse_outline(stdout: &str) -> Result<Option<StructuredDocument>, AssemblyError> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }

    let value: Value = match serde_json::from_str(trimmed) {
        Ok(v) => v,
        Err(whole_err) => {
            let last = trimmed.lines().rev().find(|l| !l.trim().is_empty());
            match last.map(|l| serde_json::from_str::<Value>(l.trim())) {
                Some(Ok(v)) => v,
                _ => return Err(format!("assembler output is not JSON: {whole_err}").into()),
            }
        }
    };

    if is_falsy(&value) {
        return Ok(None);
    }
    let doc: StructuredDocument = serde_json::from_value(value)
        .map_err(|e| format!("assembler output is not an outline: {e}"))?;
    Ok(Some(doc))
}

fn is_falsy(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
    }
}

/// Run Stage D for `stem`. Returns the outline and the number of fragments used.
pub async fn assemble(
    assembler: &dyn Assembler,
    workspace: &WorkingDirectorySet,
    stem: &str,
) -> Result<(StructuredDocument, usize), PipelineError> {
    let fragments: Vec<PathBuf> = workspace
        .fragments_for(stem)?
        .into_iter()
        .map(|f| f.path)
        .collect();
    if fragments.is_empty() {
        return Err(PipelineError::NoFragments {
            document: stem.to_string(),
        });
    }
    debug!(
        "Assembling {} fragments: {:?}",
        fragments.len(),
        fragments.iter().map(|p| file_name(p)).collect::<Vec<_>>()
    );

    let outline = assembler
        .assemble(stem, &fragments)
        .await
        .map_err(|e| PipelineError::AssemblyFailed {
            document: stem.to_string(),
            detail: e.to_string(),
        })?
        .ok_or_else(|| PipelineError::EmptyAssembly {
            document: stem.to_string(),
        })?;

    info!("Generated {} headings", outline.headings.len());
    Ok((outline, fragments.len()))
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ToolError;
    use crate::runner::{ToolInvocation, ToolOutput};
    use std::sync::Mutex;

    #[test]
    fn falsy_outputs_are_empty() {
        for out in ["", "  \n", "null", "false", "{}", "[]", "\"\"", "0"] {
            assert!(parse_outline(out).unwrap().is_none(), "input {out:?}");
        }
    }

    #[test]
    fn parses_outline_after_log_lines() {
        let out = "loading fragments...\n{\"title\":\"book\",\"headings\":[]}\n";
        let doc = parse_outline(out).unwrap().unwrap();
        assert_eq!(doc.title, "book");
    }

    #[test]
    fn garbage_output_is_an_error() {
        assert!(parse_outline("Traceback (most recent call last)").is_err());
        assert!(parse_outline("{\"headings\": 3}").is_err());
    }

    struct Capture {
        seen: Mutex<Vec<ToolInvocation>>,
        stdout: String,
    }

    #[async_trait]
    impl ToolRunner for Capture {
        async fn run(&self, invocation: &ToolInvocation) -> Result<ToolOutput, ToolError> {
            self.seen.lock().unwrap().push(invocation.clone());
            Ok(ToolOutput {
                stdout: self.stdout.clone(),
                stderr: String::new(),
            })
        }
    }

    #[tokio::test]
    async fn command_assembler_passes_every_fragment() {
        let runner = Arc::new(Capture {
            seen: Mutex::new(Vec::new()),
            stdout: r#"{"title":"book","headings":[{"heading":"H","points":["p"]}]}"#.into(),
        });
        let assembler = CommandAssembler::from_config(runner.clone(), &PipelineConfig::default());
        let fragments = vec![PathBuf::from("o/book_page-1.json"), PathBuf::from("o/book_page-2.json")];

        let doc = assembler.assemble("book", &fragments).await.unwrap().unwrap();
        assert_eq!(doc.point_count(), 1);

        let seen = runner.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].arg_after("--name"), Some("book"));
        assert!(seen[0].args.ends_with(&[
            "o/book_page-1.json".to_string(),
            "o/book_page-2.json".to_string()
        ]));
        assert_eq!(seen[0].timeout, Some(Duration::from_secs(300)));
    }
}
