use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Number of moment slots per day. The edit form always shows exactly this
/// many inputs, so canonical entries keep exactly this many positions.
pub const SLOT_COUNT: usize = 3;

/// Maximum length of a single moment, in Unicode scalar values.
pub const MAX_ITEM_CHARS: usize = 30;

/// One diary day: up to three short happy moments plus the AI feedback that
/// was generated for them.
///
/// `date` is the logical key — at most one entry exists per date per user.
/// `id` is only set by the remote backend, where it is the actual
/// update/delete key and `date` is just a lookup field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiaryEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub date: String,
    #[serde(default)]
    pub items: Vec<String>,
    #[serde(default)]
    pub ai_feedback: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl DiaryEntry {
    pub fn new(date: impl Into<String>, items: Vec<String>, ai_feedback: impl Into<String>) -> Self {
        Self {
            id: None,
            date: date.into(),
            items,
            ai_feedback: ai_feedback.into(),
            created_at: None,
            updated_at: None,
        }
    }

    /// True when every slot is empty after trimming.
    pub fn is_blank(&self) -> bool {
        self.items.iter().all(|item| item.trim().is_empty())
    }

    /// The moments that actually hold text, in slot order.
    pub fn non_empty_items(&self) -> impl Iterator<Item = &str> {
        self.items
            .iter()
            .map(|item| item.trim())
            .filter(|item| !item.is_empty())
    }
}

/// The single per-user happiness analysis. Overwritten on every re-analysis,
/// never appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HappinessAnalysis {
    pub analysis: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl HappinessAnalysis {
    pub fn new(analysis: impl Into<String>) -> Self {
        Self {
            analysis: analysis.into(),
            updated_at: Some(Utc::now()),
        }
    }
}

/// Whether `s` is a real calendar day in `YYYY-MM-DD` form.
pub fn is_valid_date(s: &str) -> bool {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok()
}

/// Truncate `s` to at most `max_chars` Unicode scalar values, returning a
/// sub-slice. Never splits a code point.
pub fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((i, _)) => &s[..i],
        None => s,
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_detection_ignores_whitespace() {
        let entry = DiaryEntry::new("2024-01-01", vec!["  ".into(), "".into(), "\t".into()], "");
        assert!(entry.is_blank());
        let entry = DiaryEntry::new("2024-01-01", vec!["  x ".into(), "".into(), "".into()], "");
        assert!(!entry.is_blank());
    }

    #[test]
    fn non_empty_items_preserve_slot_order() {
        let entry = DiaryEntry::new(
            "2024-01-01",
            vec!["".into(), "coffee".into(), " walk ".into()],
            "",
        );
        let items = entry.non_empty_items().collect::<Vec<_>>();
        assert_eq!(items, vec!["coffee", "walk"]);
    }

    #[test]
    fn wire_format_uses_camel_case() {
        let mut entry = DiaryEntry::new("2024-01-05", vec!["x".into()], "nice");
        entry.updated_at = Some(Utc::now());
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["aiFeedback"], "nice");
        assert!(json.get("updatedAt").is_some());
        // Absent optionals stay off the wire entirely.
        assert!(json.get("id").is_none());
        assert!(json.get("createdAt").is_none());
    }

    #[test]
    fn date_validation() {
        assert!(is_valid_date("2024-01-05"));
        assert!(is_valid_date("1999-12-31"));
        assert!(!is_valid_date("2024-13-01"));
        assert!(!is_valid_date("2024-02-30"));
        assert!(!is_valid_date("not a date"));
        assert!(!is_valid_date(""));
        assert!(!is_valid_date("2024/01/05"));
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("hello", 3), "hel");
        assert_eq!(truncate_chars("hi", 30), "hi");
        // Multi-byte scalars count as one char each.
        assert_eq!(truncate_chars("행복한 하루", 3), "행복한");
    }
}
