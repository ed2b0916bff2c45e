use std::sync::Arc;

use shared::{
    domain::{ChannelId, Identity, MessageId, ServerId},
    protocol::{MessageRecord, NewMessage, ServerRecord},
};
use thiserror::Error;
use tracing::debug;

use crate::service::DataService;

#[derive(Debug, Error)]
pub enum MutationError {
    #[error("message content must not be empty")]
    EmptyContent,
    #[error("no active channel to send to")]
    NoActiveChannel,
    #[error("message {0} is not in the loaded window")]
    UnknownMessage(MessageId),
    #[error("only the author may modify message {0}")]
    NotAuthor(MessageId),
    #[error("only the owner may modify server {0}")]
    NotOwner(ServerId),
    #[error(transparent)]
    Service(#[from] anyhow::Error),
}

/// Issues send/edit/delete requests against the data service. Never mutates
/// the local window: successful mutations come back through the change feed
/// (the self-echo path covers the missing display-name join on sends).
pub struct MutationDispatcher {
    service: Arc<dyn DataService>,
    identity: Identity,
}

impl MutationDispatcher {
    pub fn new(service: Arc<dyn DataService>, identity: Identity) -> Self {
        Self { service, identity }
    }

    pub async fn send_message(
        &self,
        channel_id: ChannelId,
        content: &str,
    ) -> Result<(), MutationError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(MutationError::EmptyContent);
        }
        self.service
            .insert_message(NewMessage {
                channel_id,
                author_id: self.identity.id,
                content: content.to_string(),
            })
            .await?;
        debug!(%channel_id, "mutation: message insert dispatched");
        Ok(())
    }

    pub async fn edit_message(
        &self,
        target: &MessageRecord,
        content: &str,
    ) -> Result<(), MutationError> {
        self.ensure_author(target)?;
        let content = content.trim();
        if content.is_empty() {
            return Err(MutationError::EmptyContent);
        }
        self.service.update_message(target.id, content).await?;
        debug!(message_id = %target.id, "mutation: message update dispatched");
        Ok(())
    }

    pub async fn delete_message(&self, target: &MessageRecord) -> Result<(), MutationError> {
        self.ensure_author(target)?;
        self.service.delete_message(target.id).await?;
        debug!(message_id = %target.id, "mutation: message delete dispatched");
        Ok(())
    }

    /// Author guard, enforced before dispatch rather than left to the UI.
    pub fn ensure_author(&self, target: &MessageRecord) -> Result<(), MutationError> {
        if target.author_id != self.identity.id {
            return Err(MutationError::NotAuthor(target.id));
        }
        Ok(())
    }

    /// Owner guard for server and channel lifecycle mutations.
    pub fn ensure_owner(&self, server: &ServerRecord) -> Result<(), MutationError> {
        if server.owner_id != self.identity.id {
            return Err(MutationError::NotOwner(server.id));
        }
        Ok(())
    }
}
