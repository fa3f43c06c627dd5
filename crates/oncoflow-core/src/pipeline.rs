//! PDF bytes in, committed patient out.

use std::sync::Arc;

use oncoflow_provider::{CompletionOptions, CompletionService};
use oncoflow_schema::Patient;
use tokio::sync::Mutex;
use tracing::Instrument;
use uuid::Uuid;

use crate::error::PipelineError;
use crate::extract::{DocumentTextExtractor, PageAnnotation};
use crate::merger::{RecordMerger, Strictness};
use crate::prompt::build_extraction_prompt;
use crate::retry::RetryPolicy;
use crate::sanitize::sanitize;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportOptions {
    pub strictness: Strictness,
    pub page_annotation: PageAnnotation,
    pub retry: RetryPolicy,
}

pub struct ImportPipeline {
    extractor: Arc<DocumentTextExtractor>,
    client: Arc<dyn CompletionService>,
    merger: Arc<RecordMerger>,
    options: ImportOptions,
    in_flight: Mutex<()>,
}

impl ImportPipeline {
    pub fn new(
        extractor: Arc<DocumentTextExtractor>,
        client: Arc<dyn CompletionService>,
        merger: Arc<RecordMerger>,
        options: ImportOptions,
    ) -> Self {
        Self {
            extractor,
            client,
            merger,
            options,
            in_flight: Mutex::new(()),
        }
    }

    pub fn options(&self) -> &ImportOptions {
        &self.options
    }

    /// Extract, structure, validate and commit one document.
    ///
    /// One import runs at a time; a call made while another is running
    /// fails with [`PipelineError::ImportInProgress`]. On any error the
    /// store is left exactly as it was.
    pub async fn import(&self, bytes: Vec<u8>) -> Result<Patient, PipelineError> {
        let Ok(_guard) = self.in_flight.try_lock() else {
            tracing::warn!("import rejected, another import is running");
            return Err(PipelineError::ImportInProgress);
        };

        let trace_id = Uuid::new_v4();
        let span = tracing::info_span!("import", %trace_id, bytes = bytes.len());
        self.run(bytes).instrument(span).await
    }

    async fn run(&self, bytes: Vec<u8>) -> Result<Patient, PipelineError> {
        self.client
            .ensure_configured()
            .inspect_err(|e| tracing::warn!(error = %e, "completion service not configured"))?;

        let document = self
            .extractor
            .extract(bytes, self.options.page_annotation)
            .await
            .inspect_err(|e| tracing::warn!(error = %e, "extraction failed"))?;

        let prompt = build_extraction_prompt(&document.text);
        let raw = self
            .options
            .retry
            .run(|| {
                self.client
                    .complete(prompt.to_request(CompletionOptions::structured()))
            })
            .await
            .inspect_err(|e| tracing::warn!(error = %e, "completion failed"))?;
        tracing::debug!(response_chars = raw.len(), "completion received");

        let record = sanitize(&raw).inspect_err(|e| tracing::warn!(error = %e, "response rejected"))?;

        self.merger
            .commit_import(record, self.options.strictness)
            .await
    }
}
