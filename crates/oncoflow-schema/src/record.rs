use serde::{Deserialize, Serialize};

/// Decoded completion payload, before identity assignment and normalization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructuredRecord {
    pub name: String,
    pub diagnosis: String,
    pub stage: Option<String>,
    pub clinical_notes: String,
    pub timeline: Vec<RawTimelineEntry>,
}

/// A timeline entry exactly as the model produced it.
///
/// Every field is optional; entries that were not JSON objects at all decode
/// to an entry with no fields set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawTimelineEntry {
    pub date: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub note: Option<String>,
}

impl RawTimelineEntry {
    pub fn is_blank(&self) -> bool {
        self.date.is_none() && self.kind.is_none() && self.note.is_none()
    }
}
