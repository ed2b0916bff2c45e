use std::sync::Arc;

use shared::{
    domain::{normalize_channel_name, ChannelId, ChannelKind, Role, ServerId},
    protocol::{ChannelRecord, NewChannel, NewMembership, NewServer, ServerRecord},
};
use thiserror::Error;
use tracing::{info, warn};

use crate::{ChatClient, ClientEvent};

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("name must not be empty")]
    EmptyName,
    #[error("no active server")]
    NoActiveServer,
    #[error("unknown server {0}")]
    UnknownServer(ServerId),
    #[error("unknown channel {0}")]
    UnknownChannel(ChannelId),
    #[error("only the owner may modify server {0}")]
    NotOwner(ServerId),
    #[error(transparent)]
    Service(#[from] anyhow::Error),
}

impl ChatClient {
    /// Creates a server plus the creator's owner membership. The two inserts
    /// are logically one transaction the service cannot express, so a failed
    /// membership insert triggers a compensating server delete.
    pub async fn create_server(
        self: &Arc<Self>,
        name: &str,
    ) -> Result<ServerRecord, LifecycleError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(LifecycleError::EmptyName);
        }
        let server = self
            .service
            .insert_server(NewServer {
                name: name.to_string(),
                owner_id: self.identity.id,
            })
            .await?;
        if let Err(err) = self
            .service
            .insert_membership(NewMembership {
                server_id: server.id,
                profile_id: self.identity.id,
                role: Role::Owner,
            })
            .await
        {
            warn!(server_id = %server.id, "lifecycle: owner membership insert failed; compensating");
            if let Err(cleanup) = self.service.delete_server(server.id).await {
                warn!(server_id = %server.id, "lifecycle: compensating delete failed, server orphaned: {cleanup:#}");
            }
            return Err(LifecycleError::Service(
                err.context("failed to create owner membership"),
            ));
        }
        info!(server_id = %server.id, "lifecycle: server created");
        self.refresh_servers().await?;
        Ok(server)
    }

    pub async fn rename_server(
        self: &Arc<Self>,
        server_id: ServerId,
        name: &str,
    ) -> Result<(), LifecycleError> {
        self.owned_server(server_id).await?;
        let name = name.trim();
        if name.is_empty() {
            return Err(LifecycleError::EmptyName);
        }
        self.service.rename_server(server_id, name).await?;
        info!(%server_id, "lifecycle: server renamed");
        self.refresh_servers().await?;
        Ok(())
    }

    /// Deletes a server (the service cascades to its channels and messages).
    /// Deleting the active server clears the channel list and the timeline
    /// before the directory refresh picks a new default.
    pub async fn delete_server(self: &Arc<Self>, server_id: ServerId) -> Result<(), LifecycleError> {
        self.owned_server(server_id).await?;
        self.service.delete_server(server_id).await?;
        info!(%server_id, "lifecycle: server deleted");
        let was_active = {
            let mut state = self.inner.lock().await;
            if state.active_server.as_ref().map(|s| s.id) == Some(server_id) {
                state.active_server = None;
                true
            } else {
                false
            }
        };
        if was_active {
            self.clear_active_server_state(server_id).await;
        }
        self.refresh_servers().await?;
        Ok(())
    }

    /// Creates a text channel on the active server. The name is normalized
    /// (trim, lowercase, whitespace to hyphens) before insertion.
    pub async fn create_channel(
        self: &Arc<Self>,
        name: &str,
    ) -> Result<ChannelRecord, LifecycleError> {
        let server_id = {
            let state = self.inner.lock().await;
            state
                .active_server
                .as_ref()
                .map(|s| s.id)
                .ok_or(LifecycleError::NoActiveServer)?
        };
        let name = normalize_channel_name(name);
        if name.is_empty() {
            return Err(LifecycleError::EmptyName);
        }
        let channel = self
            .service
            .insert_channel(NewChannel {
                server_id,
                name,
                kind: ChannelKind::Text,
            })
            .await?;
        info!(channel_id = %channel.id, "lifecycle: channel created");
        self.refresh_channels(server_id).await?;
        Ok(channel)
    }

    pub async fn rename_channel(
        self: &Arc<Self>,
        channel_id: ChannelId,
        name: &str,
    ) -> Result<(), LifecycleError> {
        let channel = self.known_channel(channel_id).await?;
        self.owned_server(channel.server_id).await?;
        let name = normalize_channel_name(name);
        if name.is_empty() {
            return Err(LifecycleError::EmptyName);
        }
        self.service.rename_channel(channel_id, &name).await?;
        info!(%channel_id, "lifecycle: channel renamed");
        self.refresh_channels(channel.server_id).await?;
        Ok(())
    }

    /// Deletes a channel. When it is the active one, the selection drops to
    /// none, pending edit state is discarded, the store is cleared, and the
    /// feed is unsubscribed; no other channel is auto-selected.
    pub async fn delete_channel(
        self: &Arc<Self>,
        channel_id: ChannelId,
    ) -> Result<(), LifecycleError> {
        let channel = self.known_channel(channel_id).await?;
        self.owned_server(channel.server_id).await?;
        self.service.delete_channel(channel_id).await?;
        info!(%channel_id, "lifecycle: channel deleted");
        let was_active = {
            let state = self.inner.lock().await;
            state.active_channel.as_ref().map(|c| c.id) == Some(channel_id)
        };
        if was_active {
            self.clear_active_channel_state().await;
        }
        // List-only refresh: deletion must not re-select a channel.
        let channels = self.directory.channels_for(channel.server_id).await?;
        {
            let mut state = self.inner.lock().await;
            if state.active_server.as_ref().map(|s| s.id) == Some(channel.server_id) {
                state.channels = channels.clone();
            }
        }
        self.emit(ClientEvent::ChannelsRefreshed {
            server_id: channel.server_id,
            channels,
        });
        Ok(())
    }

    async fn owned_server(&self, server_id: ServerId) -> Result<ServerRecord, LifecycleError> {
        let server = {
            let state = self.inner.lock().await;
            state
                .servers
                .iter()
                .find(|s| s.id == server_id)
                .cloned()
                .ok_or(LifecycleError::UnknownServer(server_id))?
        };
        self.mutations
            .ensure_owner(&server)
            .map_err(|_| LifecycleError::NotOwner(server_id))?;
        Ok(server)
    }

    async fn known_channel(&self, channel_id: ChannelId) -> Result<ChannelRecord, LifecycleError> {
        let state = self.inner.lock().await;
        state
            .channels
            .iter()
            .find(|c| c.id == channel_id)
            .cloned()
            .ok_or(LifecycleError::UnknownChannel(channel_id))
    }
}
