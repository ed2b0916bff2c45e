use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use reqwest::Client;
use serde::Serialize;
use shared::{
    domain::{ChannelId, MessageId, ProfileId, ServerId},
    error::ServiceError,
    protocol::{
        ChangeMessage, ChannelRecord, MessageRecord, NewChannel, NewMembership, NewMessage,
        NewServer, ServerRecord,
    },
};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, warn};

use crate::service::{DataService, FeedEvent, FeedSubscription, SubscriptionGuard};

const FEED_BUFFER: usize = 256;

/// `DataService` over the remote HTTP API plus a websocket change feed per
/// channel.
pub struct RestDataService {
    http: Client,
    base_url: String,
}

impl RestDataService {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            http: Client::new(),
            base_url,
        }
    }

    fn ws_base(&self) -> Result<String> {
        if let Some(rest) = self.base_url.strip_prefix("https://") {
            Ok(format!("wss://{rest}"))
        } else if let Some(rest) = self.base_url.strip_prefix("http://") {
            Ok(format!("ws://{rest}"))
        } else {
            Err(anyhow!("base_url must start with http:// or https://"))
        }
    }
}

#[derive(Serialize)]
struct ListMessagesQuery {
    limit: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    before: Option<DateTime<Utc>>,
}

#[derive(Serialize)]
struct RenameBody<'a> {
    name: &'a str,
}

#[derive(Serialize)]
struct ContentBody<'a> {
    content: &'a str,
}

/// Maps non-2xx responses to a `ServiceError` carrying the status class.
async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    Err(ServiceError::from_status(status.as_u16(), message).into())
}

#[async_trait]
impl DataService for RestDataService {
    async fn servers_for_profile(&self, profile_id: ProfileId) -> Result<Vec<ServerRecord>> {
        let response = self
            .http
            .get(format!("{}/profiles/{profile_id}/servers", self.base_url))
            .send()
            .await?;
        Ok(check(response).await?.json().await?)
    }

    async fn channels_for_server(&self, server_id: ServerId) -> Result<Vec<ChannelRecord>> {
        let response = self
            .http
            .get(format!("{}/servers/{server_id}/channels", self.base_url))
            .send()
            .await?;
        Ok(check(response).await?.json().await?)
    }

    async fn messages_before(
        &self,
        channel_id: ChannelId,
        before: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<MessageRecord>> {
        let response = self
            .http
            .get(format!("{}/channels/{channel_id}/messages", self.base_url))
            .query(&ListMessagesQuery { limit, before })
            .send()
            .await?;
        Ok(check(response).await?.json().await?)
    }

    async fn insert_server(&self, row: NewServer) -> Result<ServerRecord> {
        let response = self
            .http
            .post(format!("{}/servers", self.base_url))
            .json(&row)
            .send()
            .await?;
        Ok(check(response).await?.json().await?)
    }

    async fn insert_membership(&self, row: NewMembership) -> Result<()> {
        let response = self
            .http
            .post(format!("{}/memberships", self.base_url))
            .json(&row)
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }

    async fn rename_server(&self, server_id: ServerId, name: &str) -> Result<()> {
        let response = self
            .http
            .patch(format!("{}/servers/{server_id}", self.base_url))
            .json(&RenameBody { name })
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }

    async fn delete_server(&self, server_id: ServerId) -> Result<()> {
        let response = self
            .http
            .delete(format!("{}/servers/{server_id}", self.base_url))
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }

    async fn insert_channel(&self, row: NewChannel) -> Result<ChannelRecord> {
        let response = self
            .http
            .post(format!("{}/channels", self.base_url))
            .json(&row)
            .send()
            .await?;
        Ok(check(response).await?.json().await?)
    }

    async fn rename_channel(&self, channel_id: ChannelId, name: &str) -> Result<()> {
        let response = self
            .http
            .patch(format!("{}/channels/{channel_id}", self.base_url))
            .json(&RenameBody { name })
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }

    async fn delete_channel(&self, channel_id: ChannelId) -> Result<()> {
        let response = self
            .http
            .delete(format!("{}/channels/{channel_id}", self.base_url))
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }

    async fn insert_message(&self, row: NewMessage) -> Result<()> {
        let response = self
            .http
            .post(format!("{}/messages", self.base_url))
            .json(&row)
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }

    async fn update_message(&self, message_id: MessageId, content: &str) -> Result<()> {
        let response = self
            .http
            .patch(format!("{}/messages/{message_id}", self.base_url))
            .json(&ContentBody { content })
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }

    async fn delete_message(&self, message_id: MessageId) -> Result<()> {
        let response = self
            .http
            .delete(format!("{}/messages/{message_id}", self.base_url))
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }

    /// Connects the per-channel feed websocket and bridges its `ChangeMessage`
    /// frames into the subscription queue. The reader task ends on cancel,
    /// close, or transport error; ending drops the sender so the consumer
    /// observes the feed drop.
    async fn subscribe_messages(&self, channel_id: ChannelId) -> Result<FeedSubscription> {
        let ws_url = format!("{}/channels/{channel_id}/feed", self.ws_base()?);
        let (ws_stream, _) = connect_async(&ws_url)
            .await
            .with_context(|| format!("failed to connect change feed: {ws_url}"))?;
        let (_, mut reader) = ws_stream.split();

        let (tx, rx) = mpsc::channel(FEED_BUFFER);
        let (cancel_tx, mut cancel_rx) = oneshot::channel::<()>();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut cancel_rx => {
                        debug!(%channel_id, "feed: unsubscribed");
                        break;
                    }
                    frame = reader.next() => match frame {
                        Some(Ok(Message::Text(text))) => {
                            match serde_json::from_str::<ChangeMessage>(&text) {
                                Ok(change) => {
                                    let Some(event) = FeedEvent::from_change(change) else {
                                        warn!(%channel_id, "feed: malformed change payload");
                                        continue;
                                    };
                                    if tx.send(event).await.is_err() {
                                        break;
                                    }
                                }
                                Err(err) => {
                                    warn!(%channel_id, "feed: undecodable frame: {err}");
                                }
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            debug!(%channel_id, "feed: closed by server");
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(err)) => {
                            warn!(%channel_id, "feed: receive failed: {err}");
                            break;
                        }
                    }
                }
            }
        });

        Ok(FeedSubscription {
            channel_id,
            events: rx,
            guard: SubscriptionGuard::new(cancel_tx),
        })
    }
}

#[cfg(test)]
#[path = "tests/remote_tests.rs"]
mod tests;
