use std::collections::HashSet;

use chrono::{DateTime, Utc};
use shared::{
    domain::{ChannelId, Identity, MessageId},
    protocol::MessageRecord,
};

use crate::pagination::PAGE_SIZE;

/// Ordered message window for exactly one channel at a time. The single
/// source of truth the UI reads; mutated only by the pagination path and the
/// feed pump, both de-duplicating by message id.
///
/// Invariant: `messages` is strictly ascending by `created_at` (ties keep
/// arrival order) and contains no duplicate ids, after any operation
/// sequence.
pub struct MessageStore {
    identity: Identity,
    channel_id: Option<ChannelId>,
    messages: Vec<MessageRecord>,
    ids: HashSet<MessageId>,
    has_more_history: bool,
    loading_more: bool,
}

impl MessageStore {
    pub fn new(identity: Identity) -> Self {
        Self {
            identity,
            channel_id: None,
            messages: Vec::new(),
            ids: HashSet::new(),
            has_more_history: true,
            loading_more: false,
        }
    }

    /// Rebinds the store to a channel, dropping the previous window.
    pub fn reset(&mut self, channel_id: ChannelId) {
        self.channel_id = Some(channel_id);
        self.messages.clear();
        self.ids.clear();
        self.has_more_history = true;
        self.loading_more = false;
    }

    /// Drops the window without binding a new channel, for cascade clears
    /// when the active channel is deleted.
    pub fn clear(&mut self) {
        self.channel_id = None;
        self.messages.clear();
        self.ids.clear();
        self.has_more_history = false;
        self.loading_more = false;
    }

    /// Installs the newest page. Rows arrive newest-first from the fetch and
    /// are reversed into ascending order. A full page means more history may
    /// exist behind it.
    pub fn apply_initial_page(&mut self, rows: Vec<MessageRecord>) {
        self.has_more_history = rows.len() == PAGE_SIZE;
        self.messages = rows.into_iter().rev().collect();
        self.ids = self.messages.iter().map(|m| m.id).collect();
        self.loading_more = false;
    }

    /// Merges an older page (newest-first) in front of the current window.
    /// Idempotent against ids already present. Returns how many rows were
    /// actually prepended.
    pub fn prepend_older_page(&mut self, rows: Vec<MessageRecord>) -> usize {
        self.has_more_history = rows.len() == PAGE_SIZE;
        let older: Vec<MessageRecord> = rows
            .into_iter()
            .rev()
            .filter(|row| !self.ids.contains(&row.id))
            .collect();
        for row in &older {
            self.ids.insert(row.id);
        }
        let prepended = older.len();
        self.messages.splice(0..0, older);
        prepended
    }

    /// Appends a live insert, de-duplicated by id and placed at its sorted
    /// position so late-arriving completions cannot break ordering. A
    /// self-authored echo missing the display-name join is enriched from the
    /// session identity. Returns whether the message entered the window.
    pub fn apply_realtime_insert(&mut self, mut message: MessageRecord) -> bool {
        if self.channel_id != Some(message.channel_id) {
            return false;
        }
        if !self.ids.insert(message.id) {
            return false;
        }
        if message.author_id == self.identity.id && message.author_display_name.is_none() {
            message.author_display_name = Some(self.identity.display_name.clone());
        }
        let at = self
            .messages
            .partition_point(|m| m.created_at <= message.created_at);
        self.messages.insert(at, message);
        true
    }

    /// Replaces the row with a matching id in place. Position and
    /// `created_at` are preserved (edits never change `created_at`), and a
    /// present display name is retained when the feed row lacks the join.
    pub fn apply_realtime_update(&mut self, message: MessageRecord) -> bool {
        let Some(slot) = self.messages.iter_mut().find(|m| m.id == message.id) else {
            return false;
        };
        slot.content = message.content;
        if message.author_display_name.is_some() {
            slot.author_display_name = message.author_display_name;
        }
        true
    }

    pub fn apply_realtime_delete(&mut self, id: MessageId) -> bool {
        if !self.ids.remove(&id) {
            return false;
        }
        self.messages.retain(|m| m.id != id);
        true
    }

    /// Trigger guard for backward pagination: only one in-flight older-page
    /// fetch, and only while history remains and something is loaded.
    /// Returns true when the caller owns the fetch and must call
    /// `finish_load_older` afterwards.
    pub fn try_begin_load_older(&mut self) -> bool {
        if self.loading_more || !self.has_more_history || self.messages.is_empty() {
            return false;
        }
        self.loading_more = true;
        true
    }

    pub fn finish_load_older(&mut self) {
        self.loading_more = false;
    }

    /// Backward-paging cursor: `created_at` of the oldest loaded message.
    pub fn oldest_created_at(&self) -> Option<DateTime<Utc>> {
        self.messages.first().map(|m| m.created_at)
    }

    pub fn get(&self, id: MessageId) -> Option<&MessageRecord> {
        self.messages.iter().find(|m| m.id == id)
    }

    pub fn channel_id(&self) -> Option<ChannelId> {
        self.channel_id
    }

    pub fn messages(&self) -> &[MessageRecord] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn has_more_history(&self) -> bool {
        self.has_more_history
    }

    pub fn loading_more(&self) -> bool {
        self.loading_more
    }
}

#[cfg(test)]
#[path = "tests/store_tests.rs"]
mod tests;
