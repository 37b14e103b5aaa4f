//! HTTP request/response bodies for the chat view's one-shot lookups.
//!
//! Every field the backend may omit is optional here; callers apply the
//! display defaults.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Response of `GET /chat/{targetUserId}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatHistory {
    /// Messages in server order (oldest first).
    #[serde(default)]
    pub messages: Vec<HistoryEntry>,
}

/// One stored message with its populated sender.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    /// Populated sender document; `null` when the sender was deleted.
    #[serde(default)]
    pub sender_id: Option<HistorySender>,
    /// Message body.
    #[serde(default)]
    pub text: String,
    /// Server-recorded creation time.
    #[serde(
        default,
        with = "crate::time::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub created_at: Option<DateTime<Utc>>,
}

/// Sender fields populated into a [`HistoryEntry`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistorySender {
    /// Sender id.
    #[serde(rename = "_id", default)]
    pub id: Option<String>,
    /// Sender first name.
    #[serde(default)]
    pub first_name: Option<String>,
    /// Sender last name.
    #[serde(default)]
    pub last_name: Option<String>,
    /// Sender avatar URL.
    #[serde(rename = "photoURL", default)]
    pub photo_url: Option<String>,
}

/// Response of `GET /user/{targetUserId}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    /// First name.
    #[serde(default)]
    pub first_name: Option<String>,
    /// Last name.
    #[serde(default)]
    pub last_name: Option<String>,
    /// Avatar URL.
    #[serde(rename = "photoURL", default)]
    pub photo_url: Option<String>,
}
