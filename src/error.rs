use thiserror::Error;

/// Failures raised while turning an uploaded document into text.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("cannot read an empty file: '{0}'")]
    EmptyFile(String),
    #[error("unsupported file format '{content_type}' for file '{filename}'")]
    UnsupportedFormat {
        filename: String,
        content_type: String,
    },
    #[error("failed to extract text from '{filename}': {reason}")]
    ExtractionFailed { filename: String, reason: String },
}

/// Failures raised by a single generative-model call.
///
/// The retry layer only re-attempts errors for which `is_retryable` holds;
/// a safety block or a missing key ends the evaluation immediately.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("model rate limit exceeded: {0}")]
    RateLimited(String),
    #[error("content was blocked by safety filters: {0}")]
    ContentBlocked(String),
    #[error("model returned an empty response")]
    EmptyResponse,
    #[error("malformed model response: {0}")]
    Malformed(String),
    #[error("model API error (status {status}): {message}")]
    Api { status: u16, message: String },
    #[error("transport error calling model API: {0}")]
    Transport(String),
    #[error("no API key configured and none supplied with the request")]
    MissingKey,
}

impl LlmError {
    pub fn is_retryable(&self) -> bool {
        match self {
            LlmError::RateLimited(_)
            | LlmError::EmptyResponse
            | LlmError::Malformed(_)
            | LlmError::Transport(_) => true,
            LlmError::Api { status, .. } => matches!(status, 500 | 502 | 503 | 504),
            LlmError::ContentBlocked(_) | LlmError::MissingKey => false,
        }
    }
}

/// Terminal outcome of an essay evaluation, after retries are spent.
#[derive(Debug, Error)]
pub enum EvalError {
    #[error("evaluation failed: the essay or prompt was blocked by safety filters ({0})")]
    ContentBlocked(String),
    #[error("failed to evaluate essay after {attempts} attempts: {last_error}")]
    Exhausted { attempts: usize, last_error: String },
}

/// Failures raised by the flat-file rubric store.
#[derive(Debug, Error)]
pub enum RubricStoreError {
    #[error("rubric with ID {0} not found")]
    NotFound(String),
    #[error("invalid rubric ID format")]
    InvalidIdentifier,
    #[error("rubric storage error: {0}")]
    Io(#[from] std::io::Error),
}
