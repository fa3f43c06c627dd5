pub mod config;
pub mod consult;
pub mod error;
pub mod extract;
pub mod merger;
pub mod pipeline;
pub mod prompt;
pub mod retry;
pub mod sanitize;

pub use config::{load_config, validate_config, OncoflowConfig};
pub use consult::Consultant;
pub use error::{ErrorKind, PipelineError};
pub use extract::{
    looks_like_pdf, DocumentTextExtractor, ExtractError, ExtractedDocument, LopdfEngine,
    PageAnnotation, PdfDocument, PdfEngine,
};
pub use merger::{IdGenerator, RecordMerger, Strictness};
pub use pipeline::{ImportOptions, ImportPipeline};
pub use prompt::{build_consultation_prompt, build_extraction_prompt, ConsultationMode, Prompt};
pub use retry::RetryPolicy;
pub use sanitize::{sanitize, SanitizeError};
