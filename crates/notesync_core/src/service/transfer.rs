//! Export/import envelope.
//!
//! # Responsibility
//! - Build the `{ records, tags, settings, exportedAt }` backup envelope.
//! - Validate an incoming envelope completely before anything is applied.
//!
//! # Invariants
//! - `records` must be present and be an array of valid records with unique
//!   ids; any other shape rejects the whole payload.
//! - Exported settings never carry the persistent identity credential.

use crate::model::record::{now_epoch_ms, sort_newest_first, Record};
use crate::model::settings::Settings;
use crate::model::tag_registry::TagRegistry;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;

/// Serialized backup of the working set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportEnvelope {
    pub records: Vec<Record>,
    pub tags: Vec<String>,
    pub settings: Settings,
    /// Unix epoch milliseconds.
    pub exported_at: i64,
}

impl ExportEnvelope {
    pub fn build(records: &[Record], tags: &TagRegistry, settings: &Settings) -> Self {
        let mut settings = settings.clone();
        if let Some(remote) = settings.remote.as_mut() {
            remote.refresh_token = None;
        }
        Self {
            records: records.to_vec(),
            tags: tags.names().to_vec(),
            settings,
            exported_at: now_epoch_ms(),
        }
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Validated import content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportPayload {
    /// Newest first.
    pub records: Vec<Record>,
    pub tags: Option<TagRegistry>,
    pub settings: Option<Settings>,
}

/// Counts reported after a successful import.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportSummary {
    pub records: usize,
    pub tags: usize,
}

/// Parses import text; every failure is described in the returned message.
pub fn parse_import_text(text: &str) -> Result<ImportPayload, String> {
    let value: Value =
        serde_json::from_str(text).map_err(|err| format!("payload is not valid JSON: {err}"))?;
    parse_import_value(&value)
}

/// Validates an already parsed import envelope.
pub fn parse_import_value(value: &Value) -> Result<ImportPayload, String> {
    let envelope = value
        .as_object()
        .ok_or_else(|| "payload must be a JSON object".to_string())?;

    let raw_records = match envelope.get("records") {
        None | Some(Value::Null) => return Err("`records` is missing".to_string()),
        Some(Value::Array(items)) => items,
        Some(_) => return Err("`records` must be an array".to_string()),
    };

    let mut records = Vec::with_capacity(raw_records.len());
    let mut seen = HashSet::new();
    for (index, raw) in raw_records.iter().enumerate() {
        let record: Record = serde_json::from_value(raw.clone())
            .map_err(|err| format!("record #{index} is malformed: {err}"))?;
        record
            .validate()
            .map_err(|err| format!("record #{index} is invalid: {err}"))?;
        if !seen.insert(record.id) {
            return Err(format!("record id {} appears more than once", record.id));
        }
        records.push(record);
    }
    sort_newest_first(&mut records);

    let tags = match envelope.get("tags") {
        None | Some(Value::Null) => None,
        Some(Value::Array(items)) => {
            let mut names = Vec::with_capacity(items.len());
            for item in items {
                let name = item
                    .as_str()
                    .ok_or_else(|| "`tags` must contain only strings".to_string())?;
                names.push(name);
            }
            Some(TagRegistry::from_names(names))
        }
        Some(_) => return Err("`tags` must be an array".to_string()),
    };

    let settings = match envelope.get("settings") {
        None | Some(Value::Null) => None,
        Some(raw @ Value::Object(_)) => Some(
            serde_json::from_value(raw.clone())
                .map_err(|err| format!("`settings` is malformed: {err}"))?,
        ),
        Some(_) => return Err("`settings` must be an object".to_string()),
    };

    Ok(ImportPayload {
        records,
        tags,
        settings,
    })
}
