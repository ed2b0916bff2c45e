use std::sync::Arc;

use anyhow::{Context, Result};
use shared::{
    domain::{ChannelId, Identity, MessageId, ServerId},
    protocol::{ChannelRecord, MessageRecord, ServerRecord},
};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, warn};

pub mod directory;
pub mod lifecycle;
pub mod mutation;
pub mod pagination;
pub mod realtime;
pub mod remote;
pub mod service;
pub mod store;

use directory::DirectoryResolver;
use mutation::{MutationDispatcher, MutationError};
use pagination::{ScrollAnchor, Viewport, PAGE_SIZE};
use realtime::{RealtimeAdapter, SubscriptionPhase};
use service::DataService;
use store::MessageStore;

/// Everything the engine pushes at the rendering layer. Consumers hold a
/// `broadcast::Receiver` and may lag; state accessors always reflect the
/// latest snapshot.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    ServersRefreshed {
        servers: Vec<ServerRecord>,
    },
    ChannelsRefreshed {
        server_id: ServerId,
        channels: Vec<ChannelRecord>,
    },
    ActiveChannelChanged {
        channel: Option<ChannelRecord>,
    },
    InitialPageLoaded {
        channel_id: ChannelId,
        count: usize,
    },
    OlderPageMerged {
        channel_id: ChannelId,
        prepended: usize,
        anchor: ScrollAnchor,
    },
    MessageAppended {
        message: MessageRecord,
    },
    MessageUpdated {
        message: MessageRecord,
    },
    MessageRemoved {
        id: MessageId,
    },
    MessageSent {
        channel_id: ChannelId,
    },
    ScrollToBottom,
    Subscription {
        channel_id: ChannelId,
        phase: SubscriptionPhase,
    },
    Reconnecting {
        channel_id: ChannelId,
        attempt: u32,
    },
    FeedRecovered {
        channel_id: ChannelId,
        recovered: usize,
    },
    Error(String),
}

pub(crate) struct SessionState {
    pub(crate) servers: Vec<ServerRecord>,
    pub(crate) channels: Vec<ChannelRecord>,
    pub(crate) active_server: Option<ServerRecord>,
    pub(crate) active_channel: Option<ChannelRecord>,
    pub(crate) store: MessageStore,
    pub(crate) editing: Option<MessageId>,
    pub(crate) viewport: Viewport,
    /// Bumped on every timeline reset. Async completions carry the epoch they
    /// were issued under and are discarded when it no longer matches, so a
    /// fetch issued for a stale channel can never merge into a fresh window.
    pub(crate) timeline_epoch: u64,
}

/// Per-session controller owning the identity, the directory, the active
/// selection, the message store, and the feed subscription. One instance per
/// signed-in session; no ambient globals.
pub struct ChatClient {
    pub(crate) service: Arc<dyn DataService>,
    pub(crate) identity: Identity,
    pub(crate) inner: Mutex<SessionState>,
    pub(crate) realtime: RealtimeAdapter,
    pub(crate) directory: DirectoryResolver,
    pub(crate) mutations: MutationDispatcher,
    pub(crate) events: broadcast::Sender<ClientEvent>,
}

impl ChatClient {
    pub fn new(service: Arc<dyn DataService>, identity: Identity) -> Arc<Self> {
        let (events, _) = broadcast::channel(1024);
        Arc::new(Self {
            inner: Mutex::new(SessionState {
                servers: Vec::new(),
                channels: Vec::new(),
                active_server: None,
                active_channel: None,
                store: MessageStore::new(identity.clone()),
                editing: None,
                viewport: Viewport::default(),
                timeline_epoch: 0,
            }),
            realtime: RealtimeAdapter::new(),
            directory: DirectoryResolver::new(Arc::clone(&service)),
            mutations: MutationDispatcher::new(Arc::clone(&service), identity.clone()),
            service,
            identity,
            events,
        })
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    pub(crate) fn emit(&self, event: ClientEvent) {
        let _ = self.events.send(event);
    }

    /// Loads the server directory and activates the default server/channel.
    pub async fn bootstrap(self: &Arc<Self>) -> Result<()> {
        self.refresh_servers().await
    }

    /// Re-reads the server list. Keeps the active server when it still
    /// exists, cascades a clear when it is gone, and falls back to the first
    /// server when nothing is selected.
    pub async fn refresh_servers(self: &Arc<Self>) -> Result<()> {
        let servers = self.directory.servers_for(self.identity.id).await?;
        let (next_active, vanished) = {
            let mut state = self.inner.lock().await;
            state.servers = servers.clone();
            let still_present = state
                .active_server
                .as_ref()
                .is_some_and(|active| servers.iter().any(|s| s.id == active.id));
            if still_present {
                (None, None)
            } else {
                let vanished = state.active_server.take().map(|s| s.id);
                (
                    DirectoryResolver::default_server(&servers).map(|s| s.id),
                    vanished,
                )
            }
        };
        self.emit(ClientEvent::ServersRefreshed { servers });
        if let Some(old_server_id) = vanished {
            self.clear_active_server_state(old_server_id).await;
        }
        if let Some(server_id) = next_active {
            self.activate_server(server_id).await?;
        }
        Ok(())
    }

    /// Selects a server and loads its channel list, then activates its
    /// default channel (or clears the timeline when the server has none).
    pub async fn activate_server(self: &Arc<Self>, server_id: ServerId) -> Result<()> {
        {
            let mut state = self.inner.lock().await;
            let server = state
                .servers
                .iter()
                .find(|s| s.id == server_id)
                .cloned()
                .with_context(|| format!("unknown server {server_id}"))?;
            state.active_server = Some(server);
            state.active_channel = None;
        }
        self.refresh_channels(server_id).await
    }

    /// Re-reads the channel list of one server and fixes up the active
    /// channel: keep it when still present, fall back to the first channel,
    /// or clear the timeline when the server has none left.
    pub async fn refresh_channels(self: &Arc<Self>, server_id: ServerId) -> Result<()> {
        let channels = self.directory.channels_for(server_id).await?;
        let next_active = {
            let mut state = self.inner.lock().await;
            if state.active_server.as_ref().map(|s| s.id) != Some(server_id) {
                debug!(%server_id, "directory: dropping stale channel list");
                return Ok(());
            }
            state.channels = channels.clone();
            let keep = state
                .active_channel
                .as_ref()
                .is_some_and(|active| channels.iter().any(|c| c.id == active.id));
            if keep {
                None
            } else {
                Some(DirectoryResolver::default_channel(&channels).map(|c| c.id))
            }
        };
        self.emit(ClientEvent::ChannelsRefreshed {
            server_id,
            channels,
        });
        match next_active {
            None => Ok(()),
            Some(Some(channel_id)) => self.activate_channel(channel_id).await,
            Some(None) => {
                self.clear_active_channel_state().await;
                Ok(())
            }
        }
    }

    /// Switches the timeline to a channel: reset the store, fetch the newest
    /// page, then move the feed subscription over (tearing the old one down
    /// first). Stale completions are discarded by epoch.
    pub async fn activate_channel(self: &Arc<Self>, channel_id: ChannelId) -> Result<()> {
        let (channel, epoch) = {
            let mut state = self.inner.lock().await;
            let channel = state
                .channels
                .iter()
                .find(|c| c.id == channel_id)
                .cloned()
                .with_context(|| format!("unknown channel {channel_id}"))?;
            state.active_channel = Some(channel.clone());
            state.editing = None;
            state.timeline_epoch += 1;
            state.store.reset(channel_id);
            (channel, state.timeline_epoch)
        };
        self.emit(ClientEvent::ActiveChannelChanged {
            channel: Some(channel),
        });

        match self
            .service
            .messages_before(channel_id, None, PAGE_SIZE)
            .await
        {
            Ok(rows) => {
                let mut state = self.inner.lock().await;
                if state.timeline_epoch != epoch {
                    debug!(%channel_id, "pagination: discarding stale initial page");
                    return Ok(());
                }
                let count = rows.len();
                state.store.apply_initial_page(rows);
                drop(state);
                self.emit(ClientEvent::InitialPageLoaded { channel_id, count });
                self.emit(ClientEvent::ScrollToBottom);
            }
            Err(err) => {
                // Absorbed: the store stays empty and fills from the feed.
                warn!(%channel_id, "pagination: initial page fetch failed: {err:#}");
                self.emit(ClientEvent::Error(format!(
                    "failed to load messages for channel {channel_id}: {err:#}"
                )));
            }
        }

        self.switch_subscription(channel_id, epoch).await;
        Ok(())
    }

    /// Near-top backward pagination trigger. Safe to call on every scroll
    /// event: the store's `loading_more` flag makes it idempotent against
    /// flooding, and completions for a stale timeline are discarded.
    pub async fn load_older_history(self: &Arc<Self>, viewport: Viewport) -> Result<()> {
        let (channel_id, epoch, cursor, anchor) = {
            let mut state = self.inner.lock().await;
            state.viewport = viewport;
            let Some(channel) = state.active_channel.as_ref() else {
                return Ok(());
            };
            let channel_id = channel.id;
            if !viewport.near_top() {
                return Ok(());
            }
            if !state.store.try_begin_load_older() {
                return Ok(());
            }
            let Some(cursor) = state.store.oldest_created_at() else {
                state.store.finish_load_older();
                return Ok(());
            };
            (
                channel_id,
                state.timeline_epoch,
                cursor,
                ScrollAnchor::capture(viewport),
            )
        };

        let result = self
            .service
            .messages_before(channel_id, Some(cursor), PAGE_SIZE)
            .await;

        let mut state = self.inner.lock().await;
        if state.timeline_epoch != epoch {
            debug!(%channel_id, "pagination: discarding stale older page");
            return Ok(());
        }
        state.store.finish_load_older();
        match result {
            Ok(rows) => {
                let prepended = state.store.prepend_older_page(rows);
                drop(state);
                debug!(%channel_id, prepended, "pagination: older page merged");
                self.emit(ClientEvent::OlderPageMerged {
                    channel_id,
                    prepended,
                    anchor,
                });
            }
            Err(err) => {
                drop(state);
                warn!(%channel_id, "pagination: older page fetch failed: {err:#}");
                self.emit(ClientEvent::Error(format!(
                    "failed to load older messages for channel {channel_id}: {err:#}"
                )));
            }
        }
        Ok(())
    }

    /// Latest scroll measurements, used by the feed pump's follow policy.
    pub async fn report_viewport(&self, viewport: Viewport) {
        self.inner.lock().await.viewport = viewport;
    }

    /// Sends the composed message. No optimistic append: the row comes back
    /// through the feed. On success the compose input is cleared by the
    /// caller and a bottom-scroll is requested.
    pub async fn send_message(&self, content: &str) -> Result<(), MutationError> {
        let channel_id = {
            let state = self.inner.lock().await;
            state
                .active_channel
                .as_ref()
                .map(|c| c.id)
                .ok_or(MutationError::NoActiveChannel)?
        };
        self.mutations.send_message(channel_id, content).await?;
        self.emit(ClientEvent::MessageSent { channel_id });
        self.emit(ClientEvent::ScrollToBottom);
        Ok(())
    }

    /// Enters edit mode for an own message. The guard runs here, not in the
    /// UI affordance.
    pub async fn begin_edit(&self, id: MessageId) -> Result<(), MutationError> {
        let mut state = self.inner.lock().await;
        let target = state
            .store
            .get(id)
            .ok_or(MutationError::UnknownMessage(id))?;
        self.mutations.ensure_author(target)?;
        state.editing = Some(id);
        Ok(())
    }

    /// Leaves edit mode without mutating anything (the escape affordance).
    pub async fn cancel_edit(&self) {
        self.inner.lock().await.editing = None;
    }

    pub async fn editing(&self) -> Option<MessageId> {
        self.inner.lock().await.editing
    }

    /// Dispatches an edit. The store is not touched; the update event
    /// reflects it in place.
    pub async fn edit_message(&self, id: MessageId, content: &str) -> Result<(), MutationError> {
        let target = {
            let state = self.inner.lock().await;
            state
                .store
                .get(id)
                .cloned()
                .ok_or(MutationError::UnknownMessage(id))?
        };
        self.mutations.edit_message(&target, content).await?;
        let mut state = self.inner.lock().await;
        if state.editing == Some(id) {
            state.editing = None;
        }
        Ok(())
    }

    /// Dispatches a delete; removal arrives via the feed.
    pub async fn delete_message(&self, id: MessageId) -> Result<(), MutationError> {
        let target = {
            let state = self.inner.lock().await;
            state
                .store
                .get(id)
                .cloned()
                .ok_or(MutationError::UnknownMessage(id))?
        };
        self.mutations.delete_message(&target).await
    }

    /// Tears down the feed subscription. Idempotent; the guard fires once.
    pub async fn shutdown(&self) {
        self.teardown_subscription().await;
    }

    pub(crate) async fn clear_active_channel_state(&self) {
        {
            let mut state = self.inner.lock().await;
            state.active_channel = None;
            state.editing = None;
            state.timeline_epoch += 1;
            state.store.clear();
        }
        self.teardown_subscription().await;
        self.emit(ClientEvent::ActiveChannelChanged { channel: None });
    }

    pub(crate) async fn clear_active_server_state(&self, server_id: ServerId) {
        {
            let mut state = self.inner.lock().await;
            state.channels.clear();
        }
        // Renderers track the channel list through events alone.
        self.emit(ClientEvent::ChannelsRefreshed {
            server_id,
            channels: Vec::new(),
        });
        self.clear_active_channel_state().await;
    }

    // --- snapshots for the rendering layer and tests ---

    pub async fn servers(&self) -> Vec<ServerRecord> {
        self.inner.lock().await.servers.clone()
    }

    pub async fn channels(&self) -> Vec<ChannelRecord> {
        self.inner.lock().await.channels.clone()
    }

    pub async fn active_server(&self) -> Option<ServerRecord> {
        self.inner.lock().await.active_server.clone()
    }

    pub async fn active_channel(&self) -> Option<ChannelRecord> {
        self.inner.lock().await.active_channel.clone()
    }

    pub async fn timeline(&self) -> Vec<MessageRecord> {
        self.inner.lock().await.store.messages().to_vec()
    }

    pub async fn has_more_history(&self) -> bool {
        self.inner.lock().await.store.has_more_history()
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
