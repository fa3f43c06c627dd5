pub mod record;

pub use record::*;

use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

pub type PatientId = u64;

pub const UNNAMED_PATIENT: &str = "Paciente Sin Nombre";
pub const PENDING_DIAGNOSIS: &str = "Diagnóstico Pendiente";

/// A stored patient record.
///
/// `timeline` is kept sorted most-recent-first and `last_visit` mirrors its
/// first entry; both are maintained by the record merger, never by callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Patient {
    pub id: PatientId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub diagnosis: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    #[serde(default)]
    pub clinical_notes: String,
    #[serde(default)]
    pub timeline: Vec<TimelineEvent>,
    pub last_visit: NaiveDate,
}

impl Patient {
    pub fn display_name(&self) -> &str {
        if self.name.trim().is_empty() {
            UNNAMED_PATIENT
        } else {
            &self.name
        }
    }

    pub fn display_diagnosis(&self) -> &str {
        if self.diagnosis.trim().is_empty() {
            PENDING_DIAGNOSIS
        } else {
            &self.diagnosis
        }
    }

    /// Case-insensitive name match used by list filtering.
    pub fn matches_name(&self, query: &str) -> bool {
        let query = query.trim().to_lowercase();
        query.is_empty() || self.name.to_lowercase().contains(&query)
    }
}

/// One dated clinical occurrence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineEvent {
    pub date: NaiveDate,
    #[serde(rename = "type")]
    pub kind: EventKind,
    #[serde(default)]
    pub note: String,
}

impl TimelineEvent {
    pub fn new(date: NaiveDate, kind: EventKind, note: impl Into<String>) -> Self {
        Self {
            date,
            kind,
            note: note.into(),
        }
    }
}

/// Open enumeration of timeline event types. Unknown labels are kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventKind {
    Consulta,
    Quimioterapia,
    Imagenes,
    Cirugia,
    Other(CustomKind),
}

/// A label that matches no known kind. Only [`EventKind::parse_label`]
/// builds one, so it never holds an alias of a known kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CustomKind(String);

impl CustomKind {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl EventKind {
    pub const DEFAULT_OTHER: &'static str = "Otro";

    /// Map a free-form label onto a known kind.
    ///
    /// Matching ignores case and Spanish accents; labels that match nothing
    /// are preserved as [`EventKind::Other`].
    pub fn parse_label(label: &str) -> Self {
        let trimmed = label.trim();
        if trimmed.is_empty() {
            return EventKind::default();
        }
        let folded = fold_label(trimmed);
        match folded.as_str() {
            "consulta" | "control" | "visita" | "consulta medica" => EventKind::Consulta,
            "quimio" | "quimioterapia" | "qt" => EventKind::Quimioterapia,
            "imagen" | "imagenes" | "tac" | "rm" | "resonancia" | "pet" | "pet-ct" => {
                EventKind::Imagenes
            }
            "cirugia" | "quirurgico" | "intervencion quirurgica" => EventKind::Cirugia,
            _ => EventKind::Other(CustomKind(trimmed.to_string())),
        }
    }

    pub fn label(&self) -> &str {
        match self {
            EventKind::Consulta => "Consulta",
            EventKind::Quimioterapia => "Quimioterapia",
            EventKind::Imagenes => "Imágenes",
            EventKind::Cirugia => "Cirugía",
            EventKind::Other(custom) => custom.as_str(),
        }
    }
}

impl Default for EventKind {
    fn default() -> Self {
        EventKind::Other(CustomKind(Self::DEFAULT_OTHER.to_string()))
    }
}

impl From<String> for EventKind {
    fn from(value: String) -> Self {
        EventKind::parse_label(&value)
    }
}

impl From<EventKind> for String {
    fn from(value: EventKind) -> Self {
        value.label().to_string()
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.label())
    }
}

fn fold_label(label: &str) -> String {
    label
        .to_lowercase()
        .chars()
        .map(|c| match c {
            'á' | 'à' | 'ä' => 'a',
            'é' | 'è' | 'ë' => 'e',
            'í' | 'ì' | 'ï' => 'i',
            'ó' | 'ò' | 'ö' => 'o',
            'ú' | 'ù' | 'ü' => 'u',
            other => other,
        })
        .collect()
}
