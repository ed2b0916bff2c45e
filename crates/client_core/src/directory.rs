use std::sync::Arc;

use anyhow::{Context, Result};
use shared::{
    domain::{ProfileId, ServerId},
    protocol::{ChannelRecord, ServerRecord},
};

use crate::service::DataService;

/// Loads the servers the current identity belongs to and the channels of the
/// active server, and picks defaults when nothing is selected yet.
pub struct DirectoryResolver {
    service: Arc<dyn DataService>,
}

impl DirectoryResolver {
    pub fn new(service: Arc<dyn DataService>) -> Self {
        Self { service }
    }

    pub async fn servers_for(&self, profile_id: ProfileId) -> Result<Vec<ServerRecord>> {
        self.service
            .servers_for_profile(profile_id)
            .await
            .with_context(|| format!("failed to list servers for profile {profile_id}"))
    }

    /// Channels arrive ascending by `created_at` from the service.
    pub async fn channels_for(&self, server_id: ServerId) -> Result<Vec<ChannelRecord>> {
        self.service
            .channels_for_server(server_id)
            .await
            .with_context(|| format!("failed to list channels for server {server_id}"))
    }

    pub fn default_server(servers: &[ServerRecord]) -> Option<&ServerRecord> {
        servers.first()
    }

    pub fn default_channel(channels: &[ChannelRecord]) -> Option<&ChannelRecord> {
        channels.first()
    }
}
