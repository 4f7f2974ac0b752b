// Data model shared by the REST clients, the live channel and the timeline

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Public profile of an authenticated user, as issued by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default)]
    pub avatar_color: String,
    #[serde(default)]
    pub is_online: bool,
}

impl Identity {
    /// First letter of the username, upper-cased, used as the avatar glyph
    pub fn initial(&self) -> char {
        self.username
            .chars()
            .next()
            .map(|c| c.to_ascii_uppercase())
            .unwrap_or('?')
    }
}

/// Another identity visible in the current user's directory
pub type Contact = Identity;

/// Bearer token proving an authenticated session.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Credential(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Value for the `Authorization` header
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.0)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

/// A chat message exchanged between two identities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub content: String,
    #[serde(with = "timestamp")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub is_read: bool,
}

impl Message {
    /// Whether this message belongs to the conversation between `me` and `contact_id`
    pub fn is_between(&self, me: &str, contact_id: &str) -> bool {
        (self.sender_id == contact_id && self.receiver_id == me)
            || (self.sender_id == me && self.receiver_id == contact_id)
    }

    /// The other party of the conversation from `me`'s point of view
    pub fn counterpart(&self, me: &str) -> &str {
        if self.sender_id == me {
            &self.receiver_id
        } else {
            &self.sender_id
        }
    }
}

/// A message as pushed over the live channel. The backend only sends a
/// subset of the persisted fields, so `id` and `is_read` may be missing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub sender_id: String,
    pub receiver_id: String,
    pub content: String,
    #[serde(with = "timestamp")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub is_read: bool,
}

impl LiveMessage {
    /// Converts the push into a timeline message, assigning a synthetic id
    /// when the backend did not provide one.
    pub fn into_message(self) -> Message {
        let id = self
            .id
            .unwrap_or_else(|| format!("live-{}", uuid::Uuid::new_v4()));
        Message {
            id,
            sender_id: self.sender_id,
            receiver_id: self.receiver_id,
            content: self.content,
            timestamp: self.timestamp,
            is_read: self.is_read,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

/// Response of both `/login` and `/register`
#[derive(Debug, Clone, Deserialize)]
pub struct AuthResponse {
    pub access_token: Credential,
    #[serde(default)]
    pub token_type: Option<String>,
    pub user: Identity,
}

#[derive(Debug, Clone, Serialize)]
pub struct SendMessageRequest {
    pub receiver_id: String,
    pub content: String,
}

/// Error body returned by the backend
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorDetail {
    pub detail: String,
}

/// Serde helpers for backend timestamps.
///
/// The backend emits naive ISO-8601 strings (`2025-01-01T12:00:00.123456`)
/// which are UTC; RFC 3339 strings with an offset are accepted as well.
pub mod timestamp {
    use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn parse(raw: &str) -> Option<DateTime<Utc>> {
        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            return Some(dt.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
            .ok()
            .map(|naive| naive.and_utc())
    }

    pub fn serialize<S>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&value.to_rfc3339_opts(SecondsFormat::Micros, true))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).ok_or_else(|| de::Error::custom(format!("invalid timestamp '{}'", raw)))
    }
}
