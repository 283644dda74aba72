//! External tool invocation.
//!
//! Every stage reaches its external tool through the narrow [`ToolRunner`]
//! capability: "run this program with these arguments, tell me whether it
//! worked". [`CommandRunner`] is the real implementation on top of
//! `tokio::process`; tests substitute fakes that write the files a real
//! tool would, so the coordinator's control flow is checked without any
//! binary installed.
//!
//! Command lines are described by [`CommandTemplate`]s with `{placeholder}`
//! arguments, rendered per call against a [`TemplateVars`] set.

use crate::error::ToolError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Longest stderr excerpt kept in a [`ToolError::Failed`].
const STDERR_EXCERPT_CHARS: usize = 2000;

// ── Templates ────────────────────────────────────────────────────────────

/// A program plus argument list containing `{placeholder}`s.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandTemplate {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Files (relative to the base directory) that must exist for the tool
    /// to work. Only consulted by the availability probe.
    #[serde(default)]
    pub requires: Vec<PathBuf>,
}

impl CommandTemplate {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            requires: Vec::new(),
        }
    }

    pub fn requiring<I, P>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.requires = paths.into_iter().map(Into::into).collect();
        self
    }

    /// Substitute `vars` into the program and arguments.
    ///
    /// An argument that is exactly `{name}` expands to one argument per value
    /// of `name`; anywhere else a multi-valued variable is joined with spaces.
    /// Unknown placeholders are left untouched.
    pub fn render(&self, label: impl Into<String>, vars: &TemplateVars) -> ToolInvocation {
        let mut args = Vec::with_capacity(self.args.len());
        for arg in &self.args {
            match vars.whole(arg) {
                Some(values) => args.extend(values.iter().cloned()),
                None => args.push(vars.substitute(arg)),
            }
        }
        ToolInvocation {
            label: label.into(),
            program: vars.substitute(&self.program),
            args,
            cwd: None,
            timeout: None,
        }
    }
}

/// Named values for [`CommandTemplate::render`].
#[derive(Debug, Clone, Default)]
pub struct TemplateVars {
    values: BTreeMap<&'static str, Vec<String>>,
}

impl TemplateVars {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.values.insert(name, vec![value.into()]);
        self
    }

    pub fn set_path(self, name: &'static str, path: &Path) -> Self {
        self.set(name, path.to_string_lossy())
    }

    pub fn set_many<I, S>(mut self, name: &'static str, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.values
            .insert(name, values.into_iter().map(Into::into).collect());
        self
    }

    fn whole(&self, arg: &str) -> Option<&Vec<String>> {
        let name = arg.strip_prefix('{')?.strip_suffix('}')?;
        self.values.get(name)
    }

    fn substitute(&self, text: &str) -> String {
        let mut out = text.to_string();
        for (name, values) in &self.values {
            let placeholder = format!("{{{name}}}");
            if out.contains(&placeholder) {
                out = out.replace(&placeholder, &values.join(" "));
            }
        }
        out
    }
}

// ── Invocation ───────────────────────────────────────────────────────────

/// One fully rendered external command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolInvocation {
    /// Human-readable description for logs, e.g. "Extracting text from book_page-3".
    pub label: String,
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub timeout: Option<Duration>,
}

impl ToolInvocation {
    pub fn in_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Value following `flag` in the argument list, if any.
    pub fn arg_after(&self, flag: &str) -> Option<&str> {
        self.args
            .iter()
            .position(|a| a == flag)
            .and_then(|i| self.args.get(i + 1))
            .map(String::as_str)
    }
}

impl fmt::Display for ToolInvocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            if arg.contains(' ') {
                write!(f, " \"{arg}\"")?;
            } else {
                write!(f, " {arg}")?;
            }
        }
        Ok(())
    }
}

/// Captured output of a successful invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
}

// ── Runner capability ────────────────────────────────────────────────────

/// Runs external tools on behalf of the pipeline stages.
///
/// Implementations must be `Send + Sync`: Stage C may issue several
/// invocations concurrently.
#[async_trait]
pub trait ToolRunner: Send + Sync {
    /// Run one invocation to completion.
    ///
    /// Returns `Ok` only when the tool exited successfully within its
    /// deadline.
    async fn run(&self, invocation: &ToolInvocation) -> Result<ToolOutput, ToolError>;

    /// Whether `program` could be started from `base_dir`.
    fn is_available(&self, program: &str, base_dir: &Path) -> bool {
        program_available(program, base_dir)
    }
}

/// [`ToolRunner`] backed by real child processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandRunner;

#[async_trait]
impl ToolRunner for CommandRunner {
    async fn run(&self, invocation: &ToolInvocation) -> Result<ToolOutput, ToolError> {
        info!("{}…", invocation.label);
        debug!("exec: {}", invocation);
        let start = Instant::now();

        let mut cmd = tokio::process::Command::new(&invocation.program);
        cmd.args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // Dropping the future on timeout kills the child.
            .kill_on_drop(true);
        if let Some(ref dir) = invocation.cwd {
            cmd.current_dir(dir);
        }

        let child = cmd.spawn().map_err(|e| ToolError::Spawn {
            program: invocation.program.clone(),
            detail: e.to_string(),
        })?;

        let wait = child.wait_with_output();
        let output = match invocation.timeout {
            Some(limit) => match tokio::time::timeout(limit, wait).await {
                Ok(result) => result,
                Err(_) => {
                    warn!("{} timed out after {:?}", invocation.label, limit);
                    return Err(ToolError::Timeout {
                        program: invocation.program.clone(),
                        limit,
                    });
                }
            },
            None => wait.await,
        }
        .map_err(|e| ToolError::Spawn {
            program: invocation.program.clone(),
            detail: e.to_string(),
        })?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if output.status.success() {
            info!(
                "{} completed in {}ms",
                invocation.label,
                start.elapsed().as_millis()
            );
            Ok(ToolOutput { stdout, stderr })
        } else {
            warn!("{} failed: {}", invocation.label, stderr.trim());
            Err(ToolError::Failed {
                program: invocation.program.clone(),
                status: output.status.to_string(),
                stderr: excerpt(&stderr),
            })
        }
    }
}

fn excerpt(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.chars().count() <= STDERR_EXCERPT_CHARS {
        return trimmed.to_string();
    }
    // Keep the tail; tracebacks put the actual error last.
    let skip = trimmed.chars().count() - STDERR_EXCERPT_CHARS;
    let tail: String = trimmed.chars().skip(skip).collect();
    format!("…{tail}")
}

/// Resolve `program` the way a shell would: paths relative to `base_dir`,
/// bare names through `PATH`.
pub fn program_available(program: &str, base_dir: &Path) -> bool {
    let as_path = Path::new(program);
    if as_path.components().count() > 1 || as_path.is_absolute() {
        return base_dir.join(as_path).is_file();
    }
    std::env::var_os("PATH")
        .map(|paths| std::env::split_paths(&paths).any(|dir| dir.join(program).is_file()))
        .unwrap_or(false)
}
