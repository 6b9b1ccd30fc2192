pub mod client;
pub mod pagination;
pub mod repository;
pub mod session;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use crate::errors::{AppError, Result};

/// One audio record as returned by the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub id: i64,
    pub owner_id: i64,
    #[serde(default = "unknown_artist")]
    pub artist: String,
    #[serde(default = "unknown_title")]
    pub title: String,
    /// Whole seconds; 0 when the provider does not know.
    #[serde(default)]
    pub duration: u64,
    /// Signed, time-limited stream URL. Blocked tracks come back without one.
    #[serde(default, deserialize_with = "empty_as_none")]
    pub url: Option<String>,
}

impl Track {
    /// Provider identity, `(owner_id, id)`.
    pub fn key(&self) -> (i64, i64) {
        (self.owner_id, self.id)
    }

    pub fn display_name(&self) -> String {
        format!("{} - {}", self.artist, self.title)
    }
}

fn unknown_artist() -> String {
    "Unknown Artist".to_string()
}

fn unknown_title() -> String {
    "Unknown Title".to_string()
}

fn empty_as_none<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.trim().is_empty()))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Playlist {
    pub id: i64,
    pub owner_id: i64,
    #[serde(default)]
    pub title: String,
    /// Number of tracks the playlist declares.
    #[serde(default)]
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountInfo {
    pub id: i64,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
}

impl AccountInfo {
    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name).trim().to_string()
    }
}

/// A page or an aggregate of pages for one logical query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Collection<T> {
    pub items: Vec<T>,
    /// Count the provider declared (capped, for aggregates).
    pub total_count: usize,
    /// Offset of the first item.
    pub offset: usize,
}

impl<T> Collection<T> {
    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            total_count: 0,
            offset: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl<T: for<'de> Deserialize<'de>> Collection<T> {
    /// Decodes the `{items, count}` payload of a list method.
    pub fn from_response(response: Value, offset: usize) -> Result<Self> {
        let total_count = response
            .get("count")
            .and_then(Value::as_u64)
            .ok_or_else(|| AppError::Transport("Response is missing 'count'".to_string()))?
            as usize;

        let items = match response.get("items") {
            Some(items) => serde_json::from_value(items.clone())?,
            None => Vec::new(),
        };

        Ok(Self {
            items,
            total_count,
            offset,
        })
    }
}
