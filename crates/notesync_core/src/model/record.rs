//! Record domain model.
//!
//! # Responsibility
//! - Define the canonical note record shared by local and remote stores.
//! - Provide creation/patch helpers that keep timestamps and tags consistent.
//!
//! # Invariants
//! - `id` is stable and never reused for another record.
//! - `updated_at >= created_at`, and every mutation strictly increases
//!   `updated_at`.
//! - `tags` never contains duplicates or blank names.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Stable identifier for every record.
pub type RecordId = Uuid;

/// One user-authored note.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    pub id: RecordId,
    /// Required text body.
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Ordered, duplicate-free tag names.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Derived commentary (e.g. generated feedback).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotation: Option<String>,
    /// Favorite marker.
    #[serde(default)]
    pub flag: bool,
    /// Unix epoch milliseconds.
    pub created_at: i64,
    /// Unix epoch milliseconds.
    pub updated_at: i64,
}

/// Caller-supplied fields for a new record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordDraft {
    pub content: String,
    pub title: Option<String>,
    pub tags: Vec<String>,
    pub annotation: Option<String>,
    pub flag: bool,
}

impl RecordDraft {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn annotation(mut self, annotation: impl Into<String>) -> Self {
        self.annotation = Some(annotation.into());
        self
    }

    pub fn flag(mut self, flag: bool) -> Self {
        self.flag = flag;
        self
    }
}

/// Partial update for an existing record.
///
/// `None` leaves a field untouched. For optional fields, `Some(None)` clears
/// the value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordPatch {
    pub content: Option<String>,
    pub title: Option<Option<String>>,
    pub tags: Option<Vec<String>>,
    pub annotation: Option<Option<String>>,
    pub flag: Option<bool>,
}

impl RecordPatch {
    pub fn content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn title(mut self, title: Option<String>) -> Self {
        self.title = Some(title);
        self
    }

    pub fn tags(mut self, tags: Vec<String>) -> Self {
        self.tags = Some(tags);
        self
    }

    pub fn annotation(mut self, annotation: Option<String>) -> Self {
        self.annotation = Some(annotation);
        self
    }

    pub fn flag(mut self, flag: bool) -> Self {
        self.flag = Some(flag);
        self
    }

    /// Returns true when no field is set.
    pub fn is_empty(&self) -> bool {
        self.content.is_none()
            && self.title.is_none()
            && self.tags.is_none()
            && self.annotation.is_none()
            && self.flag.is_none()
    }

    /// Returns camelCase names of the fields carried by this patch.
    pub fn field_names(&self) -> Vec<&'static str> {
        let mut names = Vec::new();
        if self.content.is_some() {
            names.push("content");
        }
        if self.title.is_some() {
            names.push("title");
        }
        if self.tags.is_some() {
            names.push("tags");
        }
        if self.annotation.is_some() {
            names.push("annotation");
        }
        if self.flag.is_some() {
            names.push("flag");
        }
        names
    }

    /// Copies tag normalization onto the carried tag list.
    pub(crate) fn normalized(mut self) -> Self {
        if let Some(tags) = self.tags.take() {
            self.tags = Some(normalize_record_tags(&tags));
        }
        self
    }
}

/// Validation failure for record writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordValidationError {
    EmptyContent,
    UpdatedBeforeCreated { created_at: i64, updated_at: i64 },
    DuplicateTag(String),
    BlankTag,
}

impl Display for RecordValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyContent => write!(f, "record content must not be empty"),
            Self::UpdatedBeforeCreated {
                created_at,
                updated_at,
            } => write!(
                f,
                "record updated_at ({updated_at}) must not be earlier than created_at ({created_at})"
            ),
            Self::DuplicateTag(tag) => write!(f, "record tag `{tag}` appears more than once"),
            Self::BlankTag => write!(f, "record tags must not be blank"),
        }
    }
}

impl Error for RecordValidationError {}

impl Record {
    /// Creates a record from a draft with a fresh id and current timestamps.
    pub fn from_draft(draft: RecordDraft) -> Self {
        let now = now_epoch_ms();
        Self {
            id: Uuid::new_v4(),
            content: draft.content,
            title: blank_to_none(draft.title),
            tags: normalize_record_tags(&draft.tags),
            annotation: blank_to_none(draft.annotation),
            flag: draft.flag,
            created_at: now,
            updated_at: now,
        }
    }

    /// Checks record invariants before any store write.
    pub fn validate(&self) -> Result<(), RecordValidationError> {
        if self.content.trim().is_empty() {
            return Err(RecordValidationError::EmptyContent);
        }
        if self.updated_at < self.created_at {
            return Err(RecordValidationError::UpdatedBeforeCreated {
                created_at: self.created_at,
                updated_at: self.updated_at,
            });
        }
        let mut seen = HashSet::new();
        for tag in &self.tags {
            if tag.trim().is_empty() {
                return Err(RecordValidationError::BlankTag);
            }
            if !seen.insert(tag.as_str()) {
                return Err(RecordValidationError::DuplicateTag(tag.clone()));
            }
        }
        Ok(())
    }

    /// Merges patch fields onto this record and refreshes `updated_at`.
    pub fn apply_patch(&mut self, patch: &RecordPatch) {
        if let Some(content) = patch.content.as_ref() {
            self.content = content.clone();
        }
        if let Some(title) = patch.title.as_ref() {
            self.title = blank_to_none(title.clone());
        }
        if let Some(tags) = patch.tags.as_ref() {
            self.tags = normalize_record_tags(tags);
        }
        if let Some(annotation) = patch.annotation.as_ref() {
            self.annotation = blank_to_none(annotation.clone());
        }
        if let Some(flag) = patch.flag {
            self.flag = flag;
        }
        self.touch();
    }

    /// Refreshes `updated_at`, keeping it strictly increasing.
    pub fn touch(&mut self) {
        self.updated_at = next_timestamp(self.updated_at);
    }

    /// Returns whether this record carries `tag`.
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|value| value == tag)
    }
}

/// Current Unix epoch in milliseconds.
pub fn now_epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as i64)
        .unwrap_or_default()
}

/// Returns a timestamp strictly greater than `previous`.
pub fn next_timestamp(previous: i64) -> i64 {
    now_epoch_ms().max(previous + 1)
}

/// Trims tag names, drops blanks and keeps the first occurrence of each name.
pub fn normalize_record_tags(tags: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut normalized = Vec::with_capacity(tags.len());
    for tag in tags {
        let trimmed = tag.trim();
        if trimmed.is_empty() || !seen.insert(trimmed.to_string()) {
            continue;
        }
        normalized.push(trimmed.to_string());
    }
    normalized
}

/// Sorts records newest first; ties keep their incoming order.
pub fn sort_newest_first(records: &mut [Record]) {
    records.sort_by(|left, right| right.created_at.cmp(&left.created_at));
}

fn blank_to_none(value: Option<String>) -> Option<String> {
    value.filter(|text| !text.trim().is_empty())
}
