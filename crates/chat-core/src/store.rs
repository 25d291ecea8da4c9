//! Conversation state: everything said, everything still undelivered.
//!
//! Three tables: locally-authored messages, delivered remote messages, and
//! the pending table driving retransmission. Ids are assigned locally as
//! `max(existing local ids) + 1` starting at 0; the remote table's key set
//! doubles as the received-id set used to suppress duplicate delivery.

use std::collections::BTreeMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

/// What a message carries: text, images, or both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagePayload {
    pub text: Option<String>,
    pub image_list: Option<Vec<String>>,
}

impl MessagePayload {
    pub fn is_empty(&self) -> bool {
        self.text.is_none() && self.image_list.is_none()
    }
}

/// Who authored a stored message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageDirection {
    Local,
    Remote,
}

/// One message as the conversation view sees it.
///
/// Ids are only unique per direction — both peers start counting at 0.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: i64,
    pub direction: MessageDirection,
    /// Capture time in milliseconds since the epoch.
    pub timestamp_ms: i64,
    pub text: Option<String>,
    pub image_list: Option<Vec<String>>,
}

#[derive(Default)]
struct Inner {
    local: BTreeMap<i64, StoredMessage>,
    remote: BTreeMap<i64, StoredMessage>,
    pending: BTreeMap<i64, MessagePayload>,
}

/// The message tables behind one lock.
#[derive(Default)]
pub struct ConversationStore {
    inner: RwLock<Inner>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a locally-authored message and marks it pending. Returns the
    /// assigned id.
    pub async fn enqueue_local(&self, payload: MessagePayload) -> i64 {
        let mut inner = self.inner.write().await;
        let id = match inner.local.last_key_value() {
            Some((max, _)) => max + 1,
            None => 0,
        };
        inner.local.insert(
            id,
            StoredMessage {
                id,
                direction: MessageDirection::Local,
                timestamp_ms: Utc::now().timestamp_millis(),
                text: payload.text.clone(),
                image_list: payload.image_list.clone(),
            },
        );
        inner.pending.insert(id, payload);
        id
    }

    /// Removes an acknowledged id from the pending table. A no-op when the
    /// id is absent — already acked, or never ours.
    pub async fn ack_local(&self, id: i64) -> bool {
        self.inner.write().await.pending.remove(&id).is_some()
    }

    /// Pending messages in ascending id order.
    pub async fn pending_snapshot(&self) -> Vec<(i64, MessagePayload)> {
        self.inner
            .read()
            .await
            .pending
            .iter()
            .map(|(id, payload)| (*id, payload.clone()))
            .collect()
    }

    /// Ids still awaiting acknowledgement, ascending.
    pub async fn pending_ids(&self) -> Vec<i64> {
        self.inner.read().await.pending.keys().copied().collect()
    }

    /// Whether this remote id was already delivered.
    pub async fn is_received(&self, id: i64) -> bool {
        self.inner.read().await.remote.contains_key(&id)
    }

    /// Records a freshly delivered remote message with a capture timestamp.
    pub async fn record_remote(&self, id: i64, payload: MessagePayload) {
        self.inner.write().await.remote.insert(
            id,
            StoredMessage {
                id,
                direction: MessageDirection::Remote,
                timestamp_ms: Utc::now().timestamp_millis(),
                text: payload.text,
                image_list: payload.image_list,
            },
        );
    }

    /// All known messages, both directions, in capture order.
    pub async fn messages(&self) -> Vec<StoredMessage> {
        let inner = self.inner.read().await;
        let mut all: Vec<StoredMessage> = inner
            .local
            .values()
            .chain(inner.remote.values())
            .cloned()
            .collect();
        all.sort_by_key(|m| (m.timestamp_ms, m.direction, m.id));
        all
    }
}
