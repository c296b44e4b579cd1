//! Helpful error types for CLI commands
//!
//! Every error includes:
//! - What went wrong
//! - Context about the situation
//! - Suggestions for how to fix it

use std::fmt;

/// An error with helpful context and suggestions
#[derive(Debug)]
pub struct HelpfulError {
    /// The main error message
    pub message: String,
    /// Additional context about what was happening
    pub context: Option<String>,
    /// Suggestions for how to fix the error
    pub suggestions: Vec<String>,
}

impl HelpfulError {
    /// Create a new helpful error
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            context: None,
            suggestions: Vec::new(),
        }
    }

    /// Add context to the error
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Add a suggestion for fixing the error
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }

    /// Add multiple suggestions
    pub fn with_suggestions(mut self, suggestions: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.suggestions.extend(suggestions.into_iter().map(|s| s.into()));
        self
    }

    // === Common error constructors ===

    /// The module path the user passed failed validation.
    pub fn invalid_module(module: &str, reason: &str) -> Self {
        Self::new(format!("Invalid module path: {:?}", module))
            .with_context(reason.to_string())
            .with_suggestions([
                "TRY: module paths must not contain '@' (use --version instead)".to_string(),
            ])
    }

    /// The job id the user passed does not exist.
    pub fn job_not_found(id: &str) -> Self {
        Self::new(format!("Job not found: {}", id))
            .with_context("No job with this id is recorded in the database")
            .with_suggestions([
                "TRY: scanforge job list".to_string(),
                "TRY: check for typos in the job id".to_string(),
            ])
    }

    /// A corpus listing line failed to parse.
    pub fn corpus_parse_error(details: &str) -> Self {
        Self::new(format!("Corpus parse error: {}", details))
            .with_context("Expected one '<module> [<version>] <count>' line per entry")
            .with_suggestions([
                "TRY: omit the version field to default to the latest module version".to_string(),
            ])
    }

    /// The fetched analyzer binary didn't match its requested hash.
    pub fn binary_hash_mismatch(requested: &str, fetched: &str) -> Self {
        Self::new("Analyzer binary hash mismatch".to_string())
            .with_context(format!("requested {requested}, fetched {fetched}"))
            .with_suggestions([
                "TRY: the binary proxy may be serving a different artifact than expected".to_string(),
                "TRY: clear the local binary cache and retry".to_string(),
            ])
    }

    /// The configured task queue endpoint could not be reached.
    pub fn queue_unreachable(endpoint: &str, reason: &str) -> Self {
        Self::new(format!("Could not reach task queue: {}", endpoint))
            .with_context(reason.to_string())
            .with_suggestions([
                "TRY: check network connectivity to the queue endpoint".to_string(),
                "TRY: use --in-memory-queue for local testing without a remote queue".to_string(),
            ])
    }
}

impl fmt::Display for HelpfulError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "ERROR: {}", self.message)?;

        if let Some(ctx) = &self.context {
            writeln!(f, "CONTEXT: {}", ctx)?;
        }

        if !self.suggestions.is_empty() {
            writeln!(f)?;
            for suggestion in &self.suggestions {
                writeln!(f, "  {}", suggestion)?;
            }
        }

        Ok(())
    }
}

impl std::error::Error for HelpfulError {}

/// Print an error to stderr as a single JSON object, used when `--json` is
/// set so scripted callers don't have to scrape human-readable text.
pub fn print_json_error(err: &anyhow::Error) {
    let payload = serde_json::json!({
        "error": err.to_string(),
        "causes": err.chain().skip(1).map(|c| c.to_string()).collect::<Vec<_>>(),
    });
    match serde_json::to_string(&payload) {
        Ok(line) => eprintln!("{line}"),
        Err(_) => eprintln!("{{\"error\": {:?}}}", err.to_string()),
    }
}
