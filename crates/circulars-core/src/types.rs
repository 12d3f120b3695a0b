use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{CircularsError, Result};

// =============================================================================
// Circulars
// =============================================================================

/// A regulatory circular as held by the client for the active view.
///
/// Serialises with the canonical `circular_id`/`url` field names. Decoding
/// goes through [`RawCircular`] so records stored under `_id`/`path` are
/// accepted as well.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawCircular")]
pub struct Circular {
    pub circular_id: String,
    pub title: String,
    pub tags: Vec<String>,
    /// Publication date exactly as the backend reports it.
    pub date: String,
    /// Location of the PDF.
    pub url: String,
    pub bookmark: bool,
    /// Identifiers of other circulars this one refers to. Not guaranteed to exist.
    pub references: Vec<String>,
    pub conversation_id: Option<String>,
}

impl Circular {
    /// Whether the circular carries the given tag.
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}

/// Wire shape of a circular. Both naming generations are optional here and
/// reconciled in `TryFrom`.
#[derive(Deserialize)]
struct RawCircular {
    circular_id: Option<String>,
    #[serde(rename = "_id")]
    legacy_id: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    tags: Option<Vec<String>>,
    #[serde(default)]
    date: Option<String>,
    url: Option<String>,
    path: Option<String>,
    #[serde(default)]
    bookmark: Option<bool>,
    #[serde(default)]
    references: Option<Vec<String>>,
    #[serde(default)]
    conversation_id: Option<String>,
}

impl TryFrom<RawCircular> for Circular {
    type Error = String;

    fn try_from(raw: RawCircular) -> std::result::Result<Self, Self::Error> {
        let circular_id = raw
            .circular_id
            .or(raw.legacy_id)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| "circular record has neither circular_id nor _id".to_string())?;

        let mut tags: Vec<String> = Vec::new();
        for tag in raw.tags.unwrap_or_default() {
            if !tags.contains(&tag) {
                tags.push(tag);
            }
        }

        Ok(Circular {
            circular_id,
            title: raw.title.unwrap_or_default(),
            tags,
            date: raw.date.unwrap_or_default(),
            url: raw.url.or(raw.path).unwrap_or_default(),
            bookmark: raw.bookmark.unwrap_or(false),
            references: raw.references.unwrap_or_default(),
            // An empty id has always meant "not linked yet".
            conversation_id: raw.conversation_id.filter(|id| !id.trim().is_empty()),
        })
    }
}

/// A circular together with the records of the circulars it references.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircularRecord {
    pub circular: Circular,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub references: Vec<Circular>,
}

/// Partial update of a circular: only the fields that are `Some` change.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CircularPatch {
    pub circular_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bookmark: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
}

impl CircularPatch {
    /// Set the bookmark flag.
    pub fn bookmark(circular_id: impl Into<String>, bookmark: bool) -> Self {
        Self {
            circular_id: circular_id.into(),
            bookmark: Some(bookmark),
            conversation_id: None,
        }
    }

    /// Bind a conversation to the circular.
    pub fn link(circular_id: impl Into<String>, conversation_id: impl Into<String>) -> Self {
        Self {
            circular_id: circular_id.into(),
            bookmark: None,
            conversation_id: Some(conversation_id.into()),
        }
    }
}

/// Which slice of the catalog to list.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CircularQuery {
    All,
    Bookmarked,
    Published { year: i32, month: u32 },
}

impl CircularQuery {
    /// Check the query locally before it is sent anywhere.
    pub fn validate(&self) -> Result<()> {
        if let CircularQuery::Published { month, .. } = self {
            if !(1..=12).contains(month) {
                return Err(CircularsError::Validation(format!(
                    "month must be between 1 and 12, got {}",
                    month
                )));
            }
        }
        Ok(())
    }
}

// =============================================================================
// Conversations
// =============================================================================

/// A chat thread bound to exactly one circular.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub conversation_id: String,
    #[serde(default = "Utc::now", deserialize_with = "lenient_timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now", deserialize_with = "lenient_timestamp")]
    pub last_updated: DateTime<Utc>,
    /// Append-only; insertion order is chronological order.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub history: Vec<Message>,
}

/// One resolved question/answer exchange.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub question: String,
    pub answer: String,
    #[serde(default, deserialize_with = "source_names")]
    pub sources: Vec<String>,
    #[serde(default = "Utc::now", deserialize_with = "lenient_timestamp")]
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// Build the message for a question once its answer has arrived.
    pub fn resolved(question: impl Into<String>, answer: Answer, timestamp: DateTime<Utc>) -> Self {
        Self {
            question: question.into(),
            answer: answer.answer,
            sources: answer.sources,
            timestamp,
        }
    }
}

/// Reply of the question-answering service.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Answer {
    pub answer: String,
    #[serde(default, deserialize_with = "source_names")]
    pub sources: Vec<String>,
}

/// Body returned when a conversation is created.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct NewConversation {
    pub conversation_id: String,
}

// =============================================================================
// Wire helpers
// =============================================================================

/// A cited source: either a bare label or the detailed form the answer
/// service emits (`{source, content, relevance_score}`).
#[derive(Deserialize)]
#[serde(untagged)]
enum SourceEntry {
    Name(String),
    Detailed {
        #[serde(alias = "id")]
        source: String,
    },
}

fn source_names<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let entries: Option<Vec<SourceEntry>> = Option::deserialize(deserializer)?;
    Ok(entries
        .unwrap_or_default()
        .into_iter()
        .map(|entry| match entry {
            SourceEntry::Name(name) => name,
            SourceEntry::Detailed { source } => source,
        })
        .collect())
}

fn null_as_empty<'de, D, T>(deserializer: D) -> std::result::Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    let items: Option<Vec<T>> = Option::deserialize(deserializer)?;
    Ok(items.unwrap_or_default())
}

fn lenient_timestamp<'de, D>(deserializer: D) -> std::result::Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw).ok_or_else(|| serde::de::Error::custom(format!("bad timestamp: {raw}")))
}

/// Parse an RFC 3339 timestamp, or a naive ISO-8601 one taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}
