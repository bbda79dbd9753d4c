//! Stalker response envelope and loosely-typed field helpers
//!
//! Portals answer `{"js": ...}` and are inconsistent about whether ids and
//! counters are strings or numbers, so the raw types here accept both.

use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::models::{Category, ContentItem, ContentKind, ItemType};

/// `{"js": ...}` wrapper common to every response
#[derive(Debug, Deserialize)]
pub struct Envelope {
    #[serde(default)]
    pub js: Value,
}

/// Handshake payload
#[derive(Debug, Default, Deserialize)]
pub struct HandshakeJs {
    #[serde(default, deserialize_with = "optional_string")]
    pub token: Option<String>,
    #[serde(default, deserialize_with = "optional_string")]
    pub random: Option<String>,
}

/// One page of `get_ordered_list`
#[derive(Debug, Default, Deserialize)]
pub struct ListJs {
    #[serde(default, deserialize_with = "loose_u64")]
    pub total_items: u64,
    #[serde(default)]
    pub data: Vec<RawItem>,
}

/// `create_link` payload
#[derive(Debug, Default, Deserialize)]
pub struct LinkJs {
    #[serde(default, deserialize_with = "optional_string")]
    pub cmd: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RawCategory {
    #[serde(default, deserialize_with = "optional_string")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "optional_string")]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "optional_string")]
    pub name: Option<String>,
}

impl RawCategory {
    pub fn into_category(self, kind: ContentKind) -> Option<Category> {
        let id = self.id.filter(|id| !id.is_empty())?;
        let name = self.title.or(self.name).unwrap_or_default();
        Some(Category { id, name, kind })
    }
}

#[derive(Debug, Deserialize)]
pub struct RawItem {
    #[serde(default, deserialize_with = "optional_string")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "optional_string")]
    pub cmd: Option<String>,
    #[serde(default, deserialize_with = "optional_string")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "optional_string")]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "loose_flag")]
    pub is_season: bool,
    #[serde(default, deserialize_with = "loose_flag")]
    pub is_episode: bool,
}

/// Where a listing came from; decides how items are classified
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListScope {
    Category { kind: ContentKind, category_id: String },
    Series { series_id: String, season_id: Option<String> },
}

impl RawItem {
    pub fn into_item(self, scope: &ListScope) -> Option<ContentItem> {
        let stream_id = self.id.filter(|id| !id.is_empty())?;
        let name = self.name.or(self.title).unwrap_or_default();
        let cmd = self.cmd.unwrap_or_default();

        let (item_type, parent_series_id, parent_season_id) = match scope {
            ListScope::Category {
                kind: ContentKind::Live,
                ..
            } => (ItemType::Channel, None, None),
            ListScope::Category { .. } => (ItemType::Movie, None, None),
            ListScope::Series {
                series_id,
                season_id,
            } => {
                // Flags win; otherwise playable rows inside a series are episodes
                let item_type = if self.is_season {
                    ItemType::Season
                } else if self.is_episode || !cmd.trim().is_empty() {
                    ItemType::Episode
                } else {
                    ItemType::Season
                };
                let parent_season = match item_type {
                    ItemType::Episode => season_id.clone(),
                    _ => None,
                };
                (item_type, Some(series_id.clone()), parent_season)
            }
        };

        Some(ContentItem {
            stream_id,
            name,
            cmd,
            item_type,
            parent_series_id,
            parent_season_id,
        })
    }
}

/// Render a scalar JSON value as a string; objects and arrays yield None
pub fn value_as_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn optional_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Value = Deserialize::deserialize(deserializer)?;
    Ok(value_as_string(&value))
}

fn loose_u64<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Value = Deserialize::deserialize(deserializer)?;
    Ok(match value {
        Value::Number(n) => n.as_u64().unwrap_or(0),
        Value::String(s) => s.trim().parse().unwrap_or(0),
        _ => 0,
    })
}

fn loose_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Value = Deserialize::deserialize(deserializer)?;
    Ok(match value {
        Value::Bool(b) => b,
        Value::Number(n) => n.as_i64().unwrap_or(0) != 0,
        Value::String(s) => matches!(s.trim(), "1" | "true"),
        _ => false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_accepts_string_totals() {
        let list: ListJs = serde_json::from_str(
            r#"{"total_items":"250","data":[{"id":7,"name":"One","cmd":"ffmpeg http://x/7"}]}"#,
        )
        .unwrap();
        assert_eq!(list.total_items, 250);
        assert_eq!(list.data[0].id.as_deref(), Some("7"));
    }

    #[test]
    fn test_series_scope_classification() {
        let scope = ListScope::Series {
            series_id: "10".into(),
            season_id: Some("3".into()),
        };
        let season: RawItem =
            serde_json::from_str(r#"{"id":"3","name":"Season 1","is_season":"1"}"#).unwrap();
        let episode: RawItem =
            serde_json::from_str(r#"{"id":"99","name":"Pilot","cmd":"/media/file_99.mpg"}"#)
                .unwrap();

        let season = season.into_item(&scope).unwrap();
        assert_eq!(season.item_type, ItemType::Season);
        assert_eq!(season.parent_series_id.as_deref(), Some("10"));
        assert_eq!(season.parent_season_id, None);

        let episode = episode.into_item(&scope).unwrap();
        assert_eq!(episode.item_type, ItemType::Episode);
        assert_eq!(episode.parent_season_id.as_deref(), Some("3"));
    }

    #[test]
    fn test_items_without_id_are_dropped() {
        let scope = ListScope::Category {
            kind: ContentKind::Live,
            category_id: "1".into(),
        };
        let raw: RawItem = serde_json::from_str(r#"{"name":"ghost"}"#).unwrap();
        assert!(raw.into_item(&scope).is_none());
    }
}
