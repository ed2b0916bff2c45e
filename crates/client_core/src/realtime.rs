use std::{sync::Arc, time::Duration};

use shared::domain::ChannelId;
use tokio::{
    sync::{mpsc, Mutex},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{
    pagination::PAGE_SIZE,
    service::{FeedEvent, FeedSubscription, SubscriptionGuard},
    ChatClient, ClientEvent,
};

pub const RESUBSCRIBE_BASE_DELAY: Duration = Duration::from_millis(500);
pub const RESUBSCRIBE_MAX_ATTEMPTS: u32 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionPhase {
    Unsubscribed,
    Subscribing,
    Subscribed,
}

/// Owns the single change-feed subscription of the session. Switching
/// channels tears the previous subscription down before the new subscribe is
/// issued; the guard fires exactly once per subscription.
pub(crate) struct RealtimeAdapter {
    active: Mutex<Option<ActiveSubscription>>,
}

struct ActiveSubscription {
    channel_id: ChannelId,
    guard: SubscriptionGuard,
    pump: JoinHandle<()>,
}

impl RealtimeAdapter {
    pub(crate) fn new() -> Self {
        Self {
            active: Mutex::new(None),
        }
    }
}

impl ChatClient {
    /// Moves the feed subscription to a channel: unsubscribe the previous
    /// channel first, then subscribe the new one and start its pump task.
    pub(crate) async fn switch_subscription(self: &Arc<Self>, channel_id: ChannelId, epoch: u64) {
        let mut active = self.realtime.active.lock().await;
        {
            // A later activation may have moved the timeline on while this
            // one's initial fetch was in flight; its subscription must stay.
            let state = self.inner.lock().await;
            if state.timeline_epoch != epoch {
                debug!(%channel_id, "realtime: skipping subscription switch for stale timeline");
                return;
            }
        }
        if let Some(previous) = active.take() {
            previous.pump.abort();
            let previous_channel = previous.channel_id;
            previous.guard.unsubscribe();
            info!(channel_id = %previous_channel, "realtime: unsubscribed");
            self.emit(ClientEvent::Subscription {
                channel_id: previous_channel,
                phase: SubscriptionPhase::Unsubscribed,
            });
        }

        self.emit(ClientEvent::Subscription {
            channel_id,
            phase: SubscriptionPhase::Subscribing,
        });
        match self.service.subscribe_messages(channel_id).await {
            Ok(FeedSubscription { events, guard, .. }) => {
                let pump = self.spawn_feed_pump(channel_id, epoch, events);
                *active = Some(ActiveSubscription {
                    channel_id,
                    guard,
                    pump,
                });
                info!(%channel_id, "realtime: subscribed");
                self.emit(ClientEvent::Subscription {
                    channel_id,
                    phase: SubscriptionPhase::Subscribed,
                });
            }
            Err(err) => {
                warn!(%channel_id, "realtime: subscribe failed: {err:#}");
                self.emit(ClientEvent::Error(format!(
                    "failed to subscribe to channel {channel_id}: {err:#}"
                )));
            }
        }
    }

    pub(crate) async fn teardown_subscription(&self) {
        let mut active = self.realtime.active.lock().await;
        if let Some(previous) = active.take() {
            previous.pump.abort();
            let previous_channel = previous.channel_id;
            previous.guard.unsubscribe();
            info!(channel_id = %previous_channel, "realtime: unsubscribed");
            self.emit(ClientEvent::Subscription {
                channel_id: previous_channel,
                phase: SubscriptionPhase::Unsubscribed,
            });
        }
    }

    /// Single-writer pump: feed events are applied to the store from this
    /// task only, never from within a transport callback. When the feed ends
    /// without a teardown, supervision takes over and resubscribes.
    fn spawn_feed_pump(
        self: &Arc<Self>,
        channel_id: ChannelId,
        epoch: u64,
        mut events: mpsc::Receiver<FeedEvent>,
    ) -> JoinHandle<()> {
        let client = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                while let Some(event) = events.recv().await {
                    client.apply_feed_event(channel_id, epoch, event).await;
                }
                match client.resubscribe_with_backoff(channel_id, epoch).await {
                    Some(new_events) => {
                        events = new_events;
                        client.recover_missed_messages(channel_id, epoch).await;
                    }
                    None => break,
                }
            }
        })
    }

    async fn apply_feed_event(&self, channel_id: ChannelId, epoch: u64, event: FeedEvent) {
        let mut state = self.inner.lock().await;
        if state.timeline_epoch != epoch {
            debug!(%channel_id, "realtime: dropping event for stale timeline");
            return;
        }
        match event {
            FeedEvent::Insert { new } => {
                let id = new.id;
                if !state.store.apply_realtime_insert(new) {
                    return;
                }
                let message = state.store.get(id).cloned();
                let follow = state.viewport.near_bottom();
                drop(state);
                if let Some(message) = message {
                    self.emit(ClientEvent::MessageAppended { message });
                }
                if follow {
                    self.emit(ClientEvent::ScrollToBottom);
                }
            }
            FeedEvent::Update { new } => {
                let id = new.id;
                if !state.store.apply_realtime_update(new) {
                    return;
                }
                let message = state.store.get(id).cloned();
                drop(state);
                if let Some(message) = message {
                    self.emit(ClientEvent::MessageUpdated { message });
                }
            }
            FeedEvent::Delete { id } => {
                if !state.store.apply_realtime_delete(id) {
                    return;
                }
                if state.editing == Some(id) {
                    state.editing = None;
                }
                drop(state);
                self.emit(ClientEvent::MessageRemoved { id });
            }
        }
    }

    /// Re-establishes a dropped feed with exponential backoff. Returns the
    /// new receiver, or `None` when the timeline moved on or attempts ran
    /// out.
    async fn resubscribe_with_backoff(
        &self,
        channel_id: ChannelId,
        epoch: u64,
    ) -> Option<mpsc::Receiver<FeedEvent>> {
        let mut delay = RESUBSCRIBE_BASE_DELAY;
        for attempt in 1..=RESUBSCRIBE_MAX_ATTEMPTS {
            {
                let state = self.inner.lock().await;
                if state.timeline_epoch != epoch {
                    return None;
                }
            }
            warn!(%channel_id, attempt, "realtime: feed dropped; resubscribing");
            self.emit(ClientEvent::Reconnecting {
                channel_id,
                attempt,
            });
            match self.service.subscribe_messages(channel_id).await {
                Ok(FeedSubscription { events, guard, .. }) => {
                    let mut active = self.realtime.active.lock().await;
                    match active.as_mut() {
                        Some(current) if current.channel_id == channel_id => {
                            // Replace the dead guard; this task stays the pump.
                            current.guard = guard;
                            drop(active);
                            info!(%channel_id, attempt, "realtime: resubscribed");
                            self.emit(ClientEvent::Subscription {
                                channel_id,
                                phase: SubscriptionPhase::Subscribed,
                            });
                            return Some(events);
                        }
                        _ => {
                            // Torn down while we were reconnecting.
                            guard.unsubscribe();
                            return None;
                        }
                    }
                }
                Err(err) => {
                    warn!(%channel_id, attempt, "realtime: resubscribe failed: {err:#}");
                    if attempt < RESUBSCRIBE_MAX_ATTEMPTS {
                        tokio::time::sleep(delay).await;
                        delay *= 2;
                    }
                }
            }
        }
        self.emit(ClientEvent::Error(format!(
            "change feed for channel {channel_id} could not be re-established"
        )));
        None
    }

    /// The feed gives no replay guarantee, so after a successful resubscribe
    /// the newest page is re-fetched and merged; id de-dup covers the
    /// overlap with rows already in the window.
    async fn recover_missed_messages(&self, channel_id: ChannelId, epoch: u64) {
        match self
            .service
            .messages_before(channel_id, None, PAGE_SIZE)
            .await
        {
            Ok(rows) => {
                let mut state = self.inner.lock().await;
                if state.timeline_epoch != epoch {
                    return;
                }
                let mut appended = Vec::new();
                for row in rows.into_iter().rev() {
                    let id = row.id;
                    if state.store.apply_realtime_insert(row) {
                        if let Some(message) = state.store.get(id).cloned() {
                            appended.push(message);
                        }
                    }
                }
                drop(state);
                let recovered = appended.len();
                for message in appended {
                    self.emit(ClientEvent::MessageAppended { message });
                }
                info!(%channel_id, recovered, "realtime: feed recovered");
                self.emit(ClientEvent::FeedRecovered {
                    channel_id,
                    recovered,
                });
            }
            Err(err) => {
                warn!(%channel_id, "realtime: recovery fetch failed: {err:#}");
                self.emit(ClientEvent::Error(format!(
                    "failed to refresh channel {channel_id} after reconnect: {err:#}"
                )));
            }
        }
    }
}
