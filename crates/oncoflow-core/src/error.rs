use oncoflow_memory::StoreError;
use oncoflow_provider::InferenceError;
use thiserror::Error;

use crate::extract::ExtractError;
use crate::sanitize::SanitizeError;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Extraction(#[from] ExtractError),
    #[error(transparent)]
    Inference(#[from] InferenceError),
    #[error("malformed model response: {0}")]
    MalformedResponse(#[from] SanitizeError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("another import is already in progress")]
    ImportInProgress,
}

/// Coarse classification used by callers to pick a remedy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    EngineLoad,
    UnreadableDocument,
    PageExtraction,
    Transport,
    Service,
    MalformedResponse,
    Store,
    NotFound,
    Busy,
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::Extraction(e) => match e {
                ExtractError::EngineLoad(_) => ErrorKind::EngineLoad,
                ExtractError::UnsupportedFormat
                | ExtractError::UnreadableDocument(_)
                | ExtractError::NoText { .. } => ErrorKind::UnreadableDocument,
                ExtractError::PageExtraction { .. } => ErrorKind::PageExtraction,
            },
            PipelineError::Inference(e) => match e {
                InferenceError::Configuration(_) => ErrorKind::Configuration,
                InferenceError::Transport(_) => ErrorKind::Transport,
                InferenceError::Service { .. } => ErrorKind::Service,
            },
            PipelineError::MalformedResponse(_) => ErrorKind::MalformedResponse,
            PipelineError::Store(StoreError::NotFound(_)) => ErrorKind::NotFound,
            PipelineError::Store(_) => ErrorKind::Store,
            PipelineError::ImportInProgress => ErrorKind::Busy,
        }
    }

    /// What the user can do about it.
    pub fn remedy(&self) -> &'static str {
        match self.kind() {
            ErrorKind::Configuration => "check credentials: set provider.api_key in config.yaml",
            ErrorKind::EngineLoad => "retry later; the PDF engine could not start",
            ErrorKind::UnreadableDocument => "use a different file; this one is not a readable PDF",
            ErrorKind::PageExtraction => "re-export the PDF and try again",
            ErrorKind::Transport => "check connectivity and retry the request",
            ErrorKind::Service => "retry the request",
            ErrorKind::MalformedResponse => "retry the import",
            ErrorKind::Store => "check disk space and permissions of the data directory",
            ErrorKind::NotFound => "check the patient id with `oncoflow list`",
            ErrorKind::Busy => "wait for the current import to finish",
        }
    }
}
