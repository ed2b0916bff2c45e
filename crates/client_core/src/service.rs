use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::{
    domain::{ChannelId, MessageId, ProfileId, ServerId},
    protocol::{
        ChangeKind, ChangeMessage, ChannelRecord, MessageRecord, NewChannel, NewMembership,
        NewMessage, NewServer, ServerRecord,
    },
};
use tokio::sync::{mpsc, oneshot};

/// One normalized change-feed notification, ready to be routed into the
/// message store.
#[derive(Debug, Clone)]
pub enum FeedEvent {
    Insert { new: MessageRecord },
    Update { new: MessageRecord },
    Delete { id: MessageId },
}

impl FeedEvent {
    /// Normalizes a wire event. Returns `None` for malformed payloads
    /// (missing row for the declared kind) rather than failing the feed.
    pub fn from_change(change: ChangeMessage) -> Option<Self> {
        match change.event {
            ChangeKind::Insert => change.new.map(|new| Self::Insert { new }),
            ChangeKind::Update => change.new.map(|new| Self::Update { new }),
            ChangeKind::Delete => change.old.map(|old| Self::Delete { id: old.id }),
        }
    }
}

/// Cancels the underlying feed subscription. Fires at most once, either
/// through `unsubscribe` or on drop.
pub struct SubscriptionGuard {
    cancel: Option<oneshot::Sender<()>>,
}

impl SubscriptionGuard {
    pub fn new(cancel: oneshot::Sender<()>) -> Self {
        Self {
            cancel: Some(cancel),
        }
    }

    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(());
        }
    }
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(());
        }
    }
}

/// An open change-feed subscription scoped to one channel. The receiver is
/// consumed by a single pump task; the guard tears the feed down.
pub struct FeedSubscription {
    pub channel_id: ChannelId,
    pub events: mpsc::Receiver<FeedEvent>,
    pub guard: SubscriptionGuard,
}

/// Boundary to the external data/query service: historical queries,
/// row mutations, and the per-channel change feed. Each call succeeds or
/// fails atomically; there are no multi-statement transactions.
#[async_trait]
pub trait DataService: Send + Sync {
    /// Servers the profile holds a membership on.
    async fn servers_for_profile(&self, profile_id: ProfileId) -> Result<Vec<ServerRecord>>;

    /// Channels of one server, ascending by `created_at`.
    async fn channels_for_server(&self, server_id: ServerId) -> Result<Vec<ChannelRecord>>;

    /// Newest `limit` messages of a channel with `created_at` strictly below
    /// the cursor (or the newest page when no cursor is given), descending by
    /// `created_at`, with the author display-name join applied.
    async fn messages_before(
        &self,
        channel_id: ChannelId,
        before: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<MessageRecord>>;

    async fn insert_server(&self, row: NewServer) -> Result<ServerRecord>;
    async fn insert_membership(&self, row: NewMembership) -> Result<()>;
    async fn rename_server(&self, server_id: ServerId, name: &str) -> Result<()>;
    async fn delete_server(&self, server_id: ServerId) -> Result<()>;

    async fn insert_channel(&self, row: NewChannel) -> Result<ChannelRecord>;
    async fn rename_channel(&self, channel_id: ChannelId, name: &str) -> Result<()>;
    async fn delete_channel(&self, channel_id: ChannelId) -> Result<()>;

    async fn insert_message(&self, row: NewMessage) -> Result<()>;
    async fn update_message(&self, message_id: MessageId, content: &str) -> Result<()>;
    async fn delete_message(&self, message_id: MessageId) -> Result<()>;

    /// Opens the change feed for one channel. Exactly one subscription is
    /// open per active channel at a time; callers own the teardown.
    async fn subscribe_messages(&self, channel_id: ChannelId) -> Result<FeedSubscription>;
}

pub struct MissingDataService;

#[async_trait]
impl DataService for MissingDataService {
    async fn servers_for_profile(&self, profile_id: ProfileId) -> Result<Vec<ServerRecord>> {
        Err(anyhow!("data service unavailable for profile {profile_id}"))
    }

    async fn channels_for_server(&self, server_id: ServerId) -> Result<Vec<ChannelRecord>> {
        Err(anyhow!("data service unavailable for server {server_id}"))
    }

    async fn messages_before(
        &self,
        channel_id: ChannelId,
        _before: Option<DateTime<Utc>>,
        _limit: usize,
    ) -> Result<Vec<MessageRecord>> {
        Err(anyhow!("data service unavailable for channel {channel_id}"))
    }

    async fn insert_server(&self, _row: NewServer) -> Result<ServerRecord> {
        Err(anyhow!("data service unavailable"))
    }

    async fn insert_membership(&self, _row: NewMembership) -> Result<()> {
        Err(anyhow!("data service unavailable"))
    }

    async fn rename_server(&self, server_id: ServerId, _name: &str) -> Result<()> {
        Err(anyhow!("data service unavailable for server {server_id}"))
    }

    async fn delete_server(&self, server_id: ServerId) -> Result<()> {
        Err(anyhow!("data service unavailable for server {server_id}"))
    }

    async fn insert_channel(&self, _row: NewChannel) -> Result<ChannelRecord> {
        Err(anyhow!("data service unavailable"))
    }

    async fn rename_channel(&self, channel_id: ChannelId, _name: &str) -> Result<()> {
        Err(anyhow!("data service unavailable for channel {channel_id}"))
    }

    async fn delete_channel(&self, channel_id: ChannelId) -> Result<()> {
        Err(anyhow!("data service unavailable for channel {channel_id}"))
    }

    async fn insert_message(&self, _row: NewMessage) -> Result<()> {
        Err(anyhow!("data service unavailable"))
    }

    async fn update_message(&self, message_id: MessageId, _content: &str) -> Result<()> {
        Err(anyhow!("data service unavailable for message {message_id}"))
    }

    async fn delete_message(&self, message_id: MessageId) -> Result<()> {
        Err(anyhow!("data service unavailable for message {message_id}"))
    }

    async fn subscribe_messages(&self, channel_id: ChannelId) -> Result<FeedSubscription> {
        Err(anyhow!("data service unavailable for channel {channel_id}"))
    }
}
