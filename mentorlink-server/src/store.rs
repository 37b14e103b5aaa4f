//! In-memory chat history, one bounded log per room.
//!
//! The [`ChatStore`] keeps the messages posted to each two-party room in
//! arrival order. When a room's log exceeds the configured maximum the
//! oldest message is evicted.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use mentorlink_proto::room::RoomKey;
use tokio::sync::RwLock;

/// Default maximum number of messages kept per room.
const DEFAULT_MAX_HISTORY: usize = 1000;

/// A message posted to a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    /// Author id.
    pub sender_id: String,
    /// Body.
    pub text: String,
    /// Server receive time.
    pub created_at: DateTime<Utc>,
}

/// Per-room message logs with FIFO eviction.
pub struct ChatStore {
    rooms: RwLock<HashMap<RoomKey, VecDeque<StoredMessage>>>,
    max_history: usize,
}

impl Default for ChatStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatStore {
    /// Creates an empty store with the default per-room limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_history(DEFAULT_MAX_HISTORY)
    }

    /// Creates an empty store keeping at most `max_history` messages per room.
    #[must_use]
    pub fn with_max_history(max_history: usize) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            max_history,
        }
    }

    /// Appends a message to `room`, returning the room's new length.
    pub async fn append(&self, room: &RoomKey, message: StoredMessage) -> usize {
        let mut rooms = self.rooms.write().await;
        let log = rooms.entry(room.clone()).or_default();
        log.push_back(message);
        if log.len() > self.max_history {
            log.pop_front();
        }
        let len = log.len();
        drop(rooms);
        len
    }

    /// All messages of `room`, oldest first.
    pub async fn history(&self, room: &RoomKey) -> Vec<StoredMessage> {
        let rooms = self.rooms.read().await;
        rooms
            .get(room)
            .map(|log| log.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of messages kept for `room`.
    pub async fn len(&self, room: &RoomKey) -> usize {
        let rooms = self.rooms.read().await;
        rooms.get(room).map_or(0, VecDeque::len)
    }
}
