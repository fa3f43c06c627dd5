use std::fmt;
use std::str::FromStr;

use oncoflow_provider::{CompletionOptions, CompletionRequest};
use oncoflow_schema::Patient;

pub const NCCN_GUIDELINES: &str = "REFERENCIA: GUÍAS NCCN 2025.
- Colon: FOLFOX / CAPOX
- Recto: TNT
- Pulmón: Inmunoterapia si PD-L1 ≥1%
- Mama: Endocrino ± CDK4/6";

const EXTRACTION_SYSTEM: &str = "Eres un experto en oncología. Solo respondes JSON válido.";

const EXTRACTION_SCHEMA: &str = r#"{
  "name": "Nombre Paciente",
  "diagnosis": "Diagnóstico Principal",
  "stage": "Estadio (si consta)",
  "clinicalNotes": "Resumen del caso",
  "timeline": [
    { "date": "YYYY-MM-DD", "type": "Consulta/Quimioterapia/Imágenes/Cirugía/Otro", "note": "Descripción breve" }
  ]
}"#;

const AUDIT_SYSTEM: &str = "Actúa como auditor médico oncológico. Usa estas guías si aplica:";

const SUMMARY_SYSTEM: &str = "Eres un médico residente redactando una historia clínica oficial. \
Usa lenguaje técnico preciso.";

/// A prompt ready to send: user text plus system instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub text: String,
    pub system: String,
}

impl Prompt {
    pub fn to_request(&self, options: CompletionOptions) -> CompletionRequest {
        CompletionRequest::new(self.text.clone(), Some(self.system.clone()), options)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsultationMode {
    /// Guideline compliance critique of diagnosis and notes.
    Audit,
    /// Formal chronological narrative of the timeline.
    Summary,
}

impl fmt::Display for ConsultationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsultationMode::Audit => f.write_str("audit"),
            ConsultationMode::Summary => f.write_str("summary"),
        }
    }
}

impl FromStr for ConsultationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "audit" | "auditoria" => Ok(ConsultationMode::Audit),
            "summary" | "resumen" => Ok(ConsultationMode::Summary),
            other => Err(format!("unknown consultation mode: {other}")),
        }
    }
}

/// Extraction prompt over the full corpus text.
pub fn build_extraction_prompt(corpus: &str) -> Prompt {
    let text = format!(
        "Analiza este texto médico y extrae los datos.
Responde SOLO con un JSON válido con este formato:
{EXTRACTION_SCHEMA}

Instrucciones:
- No resumas ni omitas entradas de la cronología: cada consulta, tratamiento, estudio de imagen o procedimiento con fecha debe aparecer en \"timeline\".
- Si el diagnóstico no está explícito, infiérelo a partir del contenido clínico.
- Ordena los eventos del más reciente al más antiguo.
- Usa fechas en formato YYYY-MM-DD.

Texto del PDF:
{corpus}
"
    );

    Prompt {
        text,
        system: EXTRACTION_SYSTEM.to_string(),
    }
}

pub fn build_consultation_prompt(patient: &Patient, mode: ConsultationMode) -> Prompt {
    match mode {
        ConsultationMode::Audit => Prompt {
            text: format!(
                "Audita este caso clínico y critica su adherencia a las guías:\n{}\nDiagnóstico: {}",
                patient.clinical_notes, patient.diagnosis
            ),
            system: format!("{AUDIT_SYSTEM}\n{NCCN_GUIDELINES}"),
        },
        ConsultationMode::Summary => {
            let events = serde_json::to_string(&patient.timeline).unwrap_or_else(|_| "[]".into());
            Prompt {
                text: format!(
                    "Redacta una evolución médica formal cronológica basada en estos eventos:\n{events}"
                ),
                system: SUMMARY_SYSTEM.to_string(),
            }
        }
    }
}
