use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::schema::{DiaryEntry, MAX_ITEM_CHARS, SLOT_COUNT, is_valid_date, truncate_chars};

/// Why a raw persisted record was dropped during load or migration.
///
/// Rejections are collection-level non-events: the offending record is
/// skipped and logged, the rest of the load continues.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RejectReason {
    #[error("record is not a JSON object")]
    NotAnObject,
    #[error("record has no usable date field")]
    MissingDate,
    #[error("record date {0:?} is not a YYYY-MM-DD calendar day")]
    InvalidDate(String),
}

/// How item slots are sanitized.
///
/// | Policy          | Behaviour                                              |
/// |-----------------|--------------------------------------------------------|
/// | `PreserveSlots` | Pad/truncate to exactly 3 positions; empties stay put. |
/// | `DropEmpty`     | Filter out empties; variable-length (≤ 3) sequence.    |
///
/// `PreserveSlots` is canonical: the edit form addresses moments by slot
/// index, so position must survive a round trip. `DropEmpty` is the legacy
/// behaviour, kept representable for compatibility with old snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SlotPolicy {
    #[default]
    PreserveSlots,
    DropEmpty,
}

/// Validates and migrates raw persisted records into canonical [`DiaryEntry`]
/// form. Handles the legacy `entry1`/`entry2`/`entry3` field layout.
#[derive(Debug, Clone, Copy, Default)]
pub struct Normalizer {
    policy: SlotPolicy,
}

impl Normalizer {
    pub fn new(policy: SlotPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> SlotPolicy {
        self.policy
    }

    /// Normalize one raw record, or reject it.
    ///
    /// Gates run in order: object shape, item derivation and sanitization,
    /// date presence and validity, feedback defaulting. Idempotent over its
    /// own output.
    pub fn normalize(&self, raw: &Value) -> Result<DiaryEntry, RejectReason> {
        let obj = raw.as_object().ok_or(RejectReason::NotAnObject)?;

        let raw_items: Vec<Value> = match obj.get("items") {
            Some(Value::Array(items)) => items.clone(),
            _ if ["entry1", "entry2", "entry3"].iter().any(|k| obj.contains_key(*k)) => {
                ["entry1", "entry2", "entry3"]
                    .iter()
                    .map(|k| obj.get(*k).cloned().unwrap_or(Value::String(String::new())))
                    .collect()
            }
            _ => Vec::new(),
        };
        let items = self.sanitize(&raw_items);

        let date = match obj.get("date").and_then(Value::as_str) {
            Some(date) if !date.trim().is_empty() => date.trim().to_string(),
            _ => return Err(RejectReason::MissingDate),
        };
        if !is_valid_date(&date) {
            return Err(RejectReason::InvalidDate(date));
        }

        let ai_feedback = obj
            .get("aiFeedback")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let id = obj.get("id").and_then(Value::as_str).map(str::to_string);

        Ok(DiaryEntry {
            id,
            date,
            items,
            ai_feedback,
            created_at: parse_stamp(obj.get("createdAt")),
            updated_at: parse_stamp(obj.get("updatedAt")),
        })
    }

    /// Normalize a whole collection, silently dropping rejects.
    ///
    /// A malformed record must never abort a load, so each reject is logged
    /// and skipped.
    pub fn normalize_all(&self, raws: &[Value]) -> Vec<DiaryEntry> {
        raws.iter()
            .enumerate()
            .filter_map(|(idx, raw)| match self.normalize(raw) {
                Ok(entry) => Some(entry),
                Err(reason) => {
                    tracing::warn!(index = idx, %reason, "dropping malformed diary record");
                    None
                }
            })
            .collect()
    }

    fn sanitize(&self, raw_items: &[Value]) -> Vec<String> {
        let cleaned = raw_items
            .iter()
            .map(|v| match v.as_str() {
                Some(s) => truncate_chars(s.trim(), MAX_ITEM_CHARS).to_string(),
                None => String::new(),
            });

        match self.policy {
            SlotPolicy::PreserveSlots => {
                let mut items: Vec<String> = cleaned.take(SLOT_COUNT).collect();
                items.resize(SLOT_COUNT, String::new());
                items
            }
            SlotPolicy::DropEmpty => cleaned
                .filter(|s| !s.is_empty())
                .take(SLOT_COUNT)
                .collect(),
        }
    }
}

fn parse_stamp(value: Option<&Value>) -> Option<DateTime<Utc>> {
    value
        .and_then(Value::as_str)
        .and_then(|s| s.parse::<DateTime<Utc>>().ok())
}

// ── Tests ────────────────────────────────────────────────────────────────────
