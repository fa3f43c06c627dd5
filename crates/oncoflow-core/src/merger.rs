use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Local, NaiveDate, Utc};
use oncoflow_memory::PatientStore;
use oncoflow_schema::{
    EventKind, Patient, PatientId, RawTimelineEntry, StructuredRecord, TimelineEvent,
};
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::sanitize::SanitizeError;

/// What to do with timeline entries that cannot be normalized.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strictness {
    /// Drop undatable entries, default the rest.
    #[default]
    Lenient,
    /// Fail the whole import on the first bad entry.
    Strict,
}

/// Clock-based ids with a monotonic tie-breaker.
///
/// Each id is `max(now_ms, previous + 1)`, so ids stay unique and increasing
/// even when several are issued within the same millisecond.
#[derive(Debug, Default)]
pub struct IdGenerator {
    last: AtomicU64,
}

impl IdGenerator {
    /// Start above `floor`, typically the largest id already stored.
    pub fn seeded(floor: PatientId) -> Self {
        Self {
            last: AtomicU64::new(floor),
        }
    }

    pub fn next_id(&self) -> PatientId {
        let now = Utc::now().timestamp_millis().max(0) as u64;
        self.next_at(now)
    }

    /// Never issue an id at or below `floor` from now on.
    pub fn observe(&self, floor: PatientId) {
        self.last.fetch_max(floor, Ordering::SeqCst);
    }

    pub fn next_at(&self, now_ms: u64) -> PatientId {
        let step = |prev: u64| now_ms.max(prev.saturating_add(1));
        match self
            .last
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |prev| Some(step(prev)))
        {
            Ok(prev) | Err(prev) => step(prev),
        }
    }
}

pub struct RecordMerger {
    store: Arc<PatientStore>,
    ids: IdGenerator,
}

impl RecordMerger {
    pub fn new(store: Arc<PatientStore>) -> Self {
        let ids = IdGenerator::seeded(store.max_id().unwrap_or(0));
        Self { store, ids }
    }

    pub fn store(&self) -> &Arc<PatientStore> {
        &self.store
    }

    /// Build a patient from a decoded record and publish it at the front of the store.
    ///
    /// The record is fully normalized before the store is touched; any
    /// failure leaves the collection unchanged.
    pub async fn commit_import(
        &self,
        record: StructuredRecord,
        strictness: Strictness,
    ) -> Result<Patient, PipelineError> {
        let received = record.timeline.len();
        let timeline = normalize_timeline(record.timeline, strictness)?;
        if timeline.len() < received {
            tracing::warn!(
                received,
                kept = timeline.len(),
                "dropped timeline entries without a usable date"
            );
        }

        let mut patient = Patient {
            id: 0,
            name: record.name.trim().to_string(),
            diagnosis: record.diagnosis.trim().to_string(),
            stage: record
                .stage
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
            clinical_notes: record.clinical_notes.trim().to_string(),
            timeline,
            last_visit: today(),
        };
        sort_and_derive(&mut patient, today());

        // The id is drawn under the store's write lock, above every id
        // stored so far, including ones written by other processes.
        let ids = &self.ids;
        let patient = self
            .store
            .commit(move |patients| {
                ids.observe(patients.iter().map(|p| p.id).max().unwrap_or(0));
                patient.id = ids.next_id();
                patients.insert(0, patient.clone());
                Ok(patient)
            })
            .await?;
        tracing::info!(
            patient_id = patient.id,
            events = patient.timeline.len(),
            "import committed"
        );
        Ok(patient)
    }

    /// Add one clinician-entered event and re-sort the whole timeline.
    pub async fn append_event(
        &self,
        id: PatientId,
        event: TimelineEvent,
    ) -> Result<Patient, PipelineError> {
        let today = today();
        let patient = self
            .store
            .update(id, move |patient| {
                patient.timeline.push(event);
                sort_and_derive(patient, today);
            })
            .await?;
        tracing::info!(patient_id = id, events = patient.timeline.len(), "event appended");
        Ok(patient)
    }
}

fn today() -> NaiveDate {
    Local::now().date_naive()
}

/// Sort the timeline most-recent-first and recompute `last_visit`.
///
/// The sort is stable: entries sharing a date keep their relative order.
pub fn sort_and_derive(patient: &mut Patient, today: NaiveDate) {
    patient.timeline.sort_by(|a, b| b.date.cmp(&a.date));
    patient.last_visit = patient.timeline.first().map_or(today, |e| e.date);
}

pub fn normalize_timeline(
    entries: Vec<RawTimelineEntry>,
    strictness: Strictness,
) -> Result<Vec<TimelineEvent>, SanitizeError> {
    let mut events = Vec::with_capacity(entries.len());
    for (index, entry) in entries.into_iter().enumerate() {
        match normalize_entry(entry) {
            Ok(event) => events.push(event),
            Err(reason) => match strictness {
                Strictness::Strict => return Err(SanitizeError::InvalidEntry { index, reason }),
                Strictness::Lenient => {
                    tracing::debug!(index, "skipping timeline entry: {reason}");
                }
            },
        }
    }
    Ok(events)
}

pub fn normalize_entry(entry: RawTimelineEntry) -> Result<TimelineEvent, String> {
    if entry.is_blank() {
        return Err("entry is not an object".into());
    }
    let raw_date = entry.date.ok_or_else(|| "missing date".to_string())?;
    let date = parse_event_date(&raw_date)
        .ok_or_else(|| format!("unrecognized date {raw_date:?}"))?;
    let kind = entry
        .kind
        .as_deref()
        .map(EventKind::parse_label)
        .unwrap_or_default();

    Ok(TimelineEvent {
        date,
        kind,
        note: entry.note.unwrap_or_default().trim().to_string(),
    })
}

/// Calendar date from the formats clinical documents and models produce.
pub fn parse_event_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    const FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%d/%m/%Y", "%d-%m-%Y", "%d.%m.%Y"];

    FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
        .or_else(|| DateTime::parse_from_rfc3339(raw).ok().map(|dt| dt.date_naive()))
        .or_else(|| NaiveDate::parse_from_str(&format!("{raw}-01"), "%Y-%m-%d").ok())
}
