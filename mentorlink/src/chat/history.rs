//! History loader: prior messages of a conversation, fetched once.

use chrono::{DateTime, Utc};

use mentorlink_proto::api::{ChatHistory, HistoryEntry};

use super::{ChatMessage, Origin, Participant, ParticipantId};
use crate::api::ChatBackend;

/// Fetch the conversation with `target` and map it to history messages.
///
/// Never fails: any error is logged and yields an empty list.
pub async fn load_history<B: ChatBackend>(
    backend: &B,
    target: &ParticipantId,
    now: DateTime<Utc>,
) -> Vec<ChatMessage> {
    match backend.chat_history(target).await {
        Ok(history) => {
            let messages = map_history(history, now);
            tracing::debug!(%target, count = messages.len(), "history loaded");
            messages
        }
        Err(e) => {
            tracing::warn!(%target, err = %e, "failed to load chat history");
            Vec::new()
        }
    }
}

/// Convert server entries, oldest first, substituting display defaults.
///
/// Entries without text are skipped; a missing `createdAt` becomes `now`.
#[must_use]
pub fn map_history(history: ChatHistory, now: DateTime<Utc>) -> Vec<ChatMessage> {
    history
        .messages
        .into_iter()
        .filter_map(|entry| map_entry(entry, now))
        .collect()
}

fn map_entry(entry: HistoryEntry, now: DateTime<Utc>) -> Option<ChatMessage> {
    if entry.text.trim().is_empty() {
        tracing::debug!("skipping history entry without text");
        return None;
    }
    let sender = entry.sender_id.unwrap_or_default();
    let profile = Participant::from_parts(sender.first_name, sender.last_name, sender.photo_url);
    Some(ChatMessage {
        sender_id: ParticipantId::new(sender.id.unwrap_or_default()),
        sender_first_name: profile.first_name,
        sender_last_name: profile.last_name,
        sender_avatar_url: profile.photo_url,
        text: entry.text,
        timestamp: entry.created_at.unwrap_or(now),
        origin: Origin::History,
    })
}
