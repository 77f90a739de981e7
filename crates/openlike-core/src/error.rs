use thiserror::Error;

/// Upstream body that failed to parse as JSON.
///
/// The message names the provider; `doc`, `line`, `column` and `pos` carry
/// the original parser diagnostics.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("Your {provider} API returned an invalid response. Please check the API status and try again.")]
pub struct DecodeError {
    pub provider: String,
    pub doc: String,
    pub line: usize,
    pub column: usize,
    pub pos: usize,
}

impl DecodeError {
    /// Wrap a serde_json failure for `doc`, keeping its position.
    pub fn from_json(provider: impl Into<String>, doc: &str, err: &serde_json::Error) -> Self {
        Self {
            provider: provider.into(),
            doc: doc.to_string(),
            line: err.line(),
            column: err.column(),
            pos: byte_offset(doc, err.line(), err.column()),
        }
    }
}

/// Convert a 1-based line/column pair into a byte offset within `doc`.
fn byte_offset(doc: &str, line: usize, column: usize) -> usize {
    if line == 0 {
        return 0;
    }
    let line_start: usize = doc
        .split_inclusive('\n')
        .take(line - 1)
        .map(str::len)
        .sum();
    (line_start + column.saturating_sub(1)).min(doc.len())
}

#[derive(Debug, Error)]
pub enum OpenlikeError {
    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("LLM provider not supported: {0}")]
    UnsupportedProvider(String),

    // Upstream errors
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("LLM request failed: {0}")]
    LlmRequest(String),

    #[error("LLM streaming error: {0}")]
    LlmStream(String),

    // Structured output
    #[error("Structured output parse error: {0}")]
    StructuredParse(String),
}

impl OpenlikeError {
    pub fn is_decode(&self) -> bool {
        matches!(self, Self::Decode(_))
    }
}

pub type Result<T> = std::result::Result<T, OpenlikeError>;
