//! Models for the remote listing API responses.
//!
//! Records tolerate absent or null optional fields; only `id` is required.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::de::{DeserializeOwned, Error as _};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::warn;

/// One item as returned by the remote listing.
///
/// Optional fields holding a value of the wrong type read as `None`, so an
/// entry with a usable id is never dropped over its descriptive fields.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RemoteItem {
    #[serde(deserialize_with = "id_string")]
    pub id: String,
    #[serde(default, deserialize_with = "lenient")]
    pub title: Option<String>,
    #[serde(
        default,
        alias = "display_name",
        alias = "creatorLabel",
        deserialize_with = "lenient"
    )]
    pub creator_label: Option<String>,
    #[serde(default, alias = "type", deserialize_with = "lenient")]
    pub category: Option<String>,
    #[serde(default, alias = "gpt_description_prompt", deserialize_with = "lenient")]
    pub prompt: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub lyrics: Option<String>,
    #[serde(
        default,
        alias = "model_name",
        alias = "modelTag",
        deserialize_with = "lenient"
    )]
    pub model_tag: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub seed: Option<i64>,
    #[serde(default, alias = "playCount", deserialize_with = "lenient")]
    pub play_count: Option<u64>,
    #[serde(
        default,
        alias = "upvote_count",
        alias = "favoriteCount",
        deserialize_with = "lenient"
    )]
    pub favorite_count: Option<u64>,
    #[serde(default, alias = "createdAt", deserialize_with = "lenient")]
    pub created_at: Option<DateTime<Utc>>,
}

/// Read any JSON value and keep it only if it has the expected type.
fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}

/// Ids arrive as strings, occasionally as bare integers.
fn id_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(id) => Ok(id),
        Value::Number(n) if n.is_u64() || n.is_i64() => Ok(n.to_string()),
        other => Err(D::Error::custom(format!(
            "id must be a string, got {}",
            type_name(&other)
        ))),
    }
}

impl RemoteItem {
    /// Create a record with only an id and title.
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: Some(title.into()),
            creator_label: None,
            category: None,
            prompt: None,
            lyrics: None,
            model_tag: None,
            seed: None,
            play_count: None,
            favorite_count: None,
            created_at: None,
        }
    }
}

/// One parsed listing page.
#[derive(Debug, Clone, Default)]
pub struct ListingPage {
    /// Entries the remote returned, including any that were skipped
    pub raw_count: usize,
    pub items: Vec<RemoteItem>,
}

/// Parse one listing page.
///
/// Accepts either a bare JSON array or an `{ "items": [...] }` envelope.
/// Entries without a usable id are skipped but still counted in
/// `raw_count`, which is what pagination has to follow.
pub fn parse_page(body: Value) -> Result<ListingPage, String> {
    let entries = match body {
        Value::Array(entries) => entries,
        Value::Object(mut map) => match map.remove("items") {
            Some(Value::Array(entries)) => entries,
            Some(Value::Null) | None => Vec::new(),
            Some(other) => {
                return Err(format!("unexpected items field: {}", type_name(&other)));
            }
        },
        other => return Err(format!("unexpected listing body: {}", type_name(&other))),
    };

    let raw_count = entries.len();
    let mut items = Vec::with_capacity(raw_count);
    for entry in entries {
        match serde_json::from_value::<RemoteItem>(entry) {
            Ok(item) if !item.id.is_empty() => items.push(item),
            Ok(_) => warn!("Skipping listing entry with an empty id"),
            Err(e) => warn!("Skipping malformed listing entry: {}", e),
        }
    }
    Ok(ListingPage { raw_count, items })
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Build the id → creator label lookup from a fetched listing.
pub fn labels_from_listing(items: &[RemoteItem]) -> HashMap<String, String> {
    items
        .iter()
        .filter_map(|item| {
            item.creator_label
                .as_ref()
                .filter(|label| !label.trim().is_empty())
                .map(|label| (item.id.clone(), label.trim().to_string()))
        })
        .collect()
}
