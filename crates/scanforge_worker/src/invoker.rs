//! Analyzer Invoker: composes argv for a scan, runs it through the sandbox,
//! and normalizes the analyzer's JSON output into findings.

use crate::sandbox::{EnvMode, InvocationRequest, SandboxError, SandboxRuntime};
use scanforge_protocol::Finding;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

const SOURCE_CONTEXT_LINES: usize = 1;

#[derive(Debug, Error)]
pub enum InvokerError {
    #[error(transparent)]
    Sandbox(#[from] SandboxError),
    #[error("analyzer output was not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("analyzer reported an error: {0}")]
    AnalyzerError(String),
}

#[derive(Debug, Deserialize)]
struct RawDiagnostic {
    message: String,
    #[serde(default)]
    position: String,
}

#[derive(Debug, Deserialize, Default)]
struct PackageAnalyzerEntry {
    #[serde(default)]
    diagnostics: Vec<RawDiagnostic>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum AnalyzerOutput {
    /// `{"Error": "<message>"}` — the whole run failed before producing any
    /// per-package results.
    Error {
        #[serde(rename = "Error")]
        error: String,
    },
    /// `package -> analyzer -> {diagnostics|error}`.
    Tree(HashMap<String, HashMap<String, PackageAnalyzerEntry>>),
}

/// Build the argv for an analyzer invocation. In source-scan mode this is
/// `["-json", <space-split extra args>, "./..."]`; in binary-scan mode the
/// pre-built artifact is invoked directly with no `-json`/`./...` framing.
pub fn build_argv(extra_args: &str, binary_artifact: Option<&Path>) -> Vec<String> {
    if let Some(artifact) = binary_artifact {
        return vec![artifact.display().to_string()];
    }
    let mut argv = vec!["-json".to_string()];
    argv.extend(extra_args.split_whitespace().map(str::to_string));
    argv.push("./...".to_string());
    argv
}

pub struct Invocation<'a> {
    pub runtime: &'a dyn SandboxRuntime,
    pub binary: PathBuf,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    pub env: HashMap<String, String>,
    pub env_mode: EnvMode,
    pub stdin_command: Option<String>,
}

/// Run the analyzer and normalize its output into findings. Diagnostics
/// with a non-empty position get source context attached (§ source
/// attachment): the position is rewritten to a stable viewer URL and the
/// original location is used only to read surrounding source lines.
pub async fn invoke(invocation: Invocation<'_>) -> Result<Vec<Finding>, InvokerError> {
    let request = InvocationRequest {
        binary: invocation.binary,
        args: invocation.args,
        env: invocation.env,
        env_mode: invocation.env_mode,
        working_dir: invocation.working_dir.clone(),
        stdin_command: invocation.stdin_command,
    };

    let output = invocation.runtime.invoke(request).await?;
    let parsed: AnalyzerOutput = serde_json::from_slice(&output.stdout)?;

    let tree = match parsed {
        AnalyzerOutput::Error { error } => return Err(InvokerError::AnalyzerError(error)),
        AnalyzerOutput::Tree(tree) => tree,
    };

    let mut findings = Vec::new();
    for (package, analyzers) in tree {
        for (analyzer, entry) in analyzers {
            if let Some(error) = entry.error {
                findings.push(Finding {
                    package: package.clone(),
                    analyzer: analyzer.clone(),
                    message: error,
                    position: None,
                    source_snippet: None,
                });
                continue;
            }
            for diag in entry.diagnostics {
                let (position, source_snippet) = if diag.position.is_empty() {
                    (None, None)
                } else {
                    let (url, snippet) = attach_source_context(&invocation.working_dir, &diag.position);
                    (Some(url), snippet)
                };
                findings.push(Finding {
                    package: package.clone(),
                    analyzer: analyzer.clone(),
                    message: diag.message,
                    position,
                    source_snippet,
                });
            }
        }
    }

    Ok(findings)
}

/// Rewrite a raw `path:line[:col]` position into a stable viewer URL of
/// the form `/<relPath>#L<line>`, and read the surrounding source lines as
/// a best-effort snippet. Failure to read the file doesn't fail the scan,
/// it just means no snippet.
fn attach_source_context(workspace_root: &Path, raw_position: &str) -> (String, Option<String>) {
    let mut parts = raw_position.splitn(3, ':');
    let path_part = parts.next().unwrap_or_default();
    let line: usize = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);

    let rel_path = Path::new(path_part)
        .strip_prefix(workspace_root)
        .unwrap_or_else(|_| Path::new(path_part));

    let url = format!("/{}#L{}", rel_path.display(), line);
    let context = read_source_context(Path::new(path_part), line);
    let snippet = (!context.is_empty()).then(|| context.join("\n"));
    (url, snippet)
}

/// Read up to `2*N+1` lines of source centered on `line` (1-indexed),
/// where `N` is [`SOURCE_CONTEXT_LINES`]. Returns an empty vec if the file
/// can't be read.
pub fn read_source_context(file: &Path, line: usize) -> Vec<String> {
    let Ok(contents) = std::fs::read_to_string(file) else {
        return Vec::new();
    };
    let lines: Vec<&str> = contents.lines().collect();
    if line == 0 || line > lines.len() {
        return Vec::new();
    }
    let start = line.saturating_sub(1).saturating_sub(SOURCE_CONTEXT_LINES);
    let end = (line - 1 + SOURCE_CONTEXT_LINES + 1).min(lines.len());
    lines[start..end].iter().map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_argv_source_mode() {
        let argv = build_argv("-flag1 -flag2", None);
        assert_eq!(argv, vec!["-json", "-flag1", "-flag2", "./..."]);
    }

    #[test]
    fn build_argv_binary_mode_ignores_extra_args() {
        let argv = build_argv("-flag1", Some(Path::new("/tmp/analyzer-bin")));
        assert_eq!(argv, vec!["/tmp/analyzer-bin"]);
    }

    #[test]
    fn attach_source_context_rewrites_to_viewer_url() {
        let root = Path::new("/work/mod");
        let (url, snippet) = attach_source_context(root, "/work/mod/pkg/file.go:42:3");
        assert_eq!(url, "/pkg/file.go#L42");
        assert_eq!(snippet, None);
    }

    #[test]
    fn attach_source_context_reads_snippet_when_file_exists() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("file.go");
        std::fs::write(&file, "l1\nl2\nl3\n").unwrap();
        let raw_position = format!("{}:2:1", file.display());
        let (_, snippet) = attach_source_context(dir.path(), &raw_position);
        assert_eq!(snippet, Some("l1\nl2\nl3".to_string()));
    }

    #[test]
    fn read_source_context_returns_window_around_line() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.go");
        std::fs::write(&file, "l1\nl2\nl3\nl4\nl5\n").unwrap();
        let ctx = read_source_context(&file, 3);
        assert_eq!(ctx, vec!["l2".to_string(), "l3".to_string(), "l4".to_string()]);
    }
}
