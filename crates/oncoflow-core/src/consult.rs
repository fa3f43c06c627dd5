use std::sync::Arc;

use oncoflow_provider::{CompletionOptions, CompletionService, InferenceError};
use oncoflow_schema::Patient;

use crate::prompt::{build_consultation_prompt, ConsultationMode};
use crate::retry::RetryPolicy;

/// Free-text audit and summary over a stored patient. Never touches the store.
pub struct Consultant {
    client: Arc<dyn CompletionService>,
    retry: RetryPolicy,
}

impl Consultant {
    pub fn new(client: Arc<dyn CompletionService>, retry: RetryPolicy) -> Self {
        Self { client, retry }
    }

    pub async fn try_consult(
        &self,
        patient: &Patient,
        mode: ConsultationMode,
    ) -> Result<String, InferenceError> {
        self.client.ensure_configured()?;
        let prompt = build_consultation_prompt(patient, mode);
        let text = self
            .retry
            .run(|| {
                self.client
                    .complete(prompt.to_request(CompletionOptions::plain_text()))
            })
            .await?;
        tracing::info!(patient_id = patient.id, %mode, chars = text.len(), "consultation complete");
        Ok(text)
    }

    /// Consultation text, or a displayable `Error: ...` line when the call fails.
    pub async fn consult(&self, patient: &Patient, mode: ConsultationMode) -> String {
        match self.try_consult(patient, mode).await {
            Ok(text) => text,
            Err(err) => {
                tracing::warn!(patient_id = patient.id, %mode, error = %err, "consultation failed");
                format!("Error: {err}")
            }
        }
    }
}
