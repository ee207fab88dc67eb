// Copyright 2025 AgentReplay (https://github.com/agentreplay)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Telegram Bot API connector.
//!
//! Sends commands with `sendMessage` and receives channel traffic by
//! long-polling `getUpdates` on a background task. The task lives exactly as
//! long as the connector: `shutdown` aborts it, and so does dropping the
//! connector.
//!
//! The Bot API never delivers messages written by another bot in a group or
//! supergroup. A bot responder must therefore post in a channel the gateway
//! bot administers (received as `channel_post`); in a group, the responder
//! has to be a user account.

use super::{
    ChannelId, ChatConnector, EventCallback, InboundChannelEvent, MessageHandle, MessageId,
    SubscriptionHandle, SubscriptionHub,
};
use crate::error::{GatewayError, GatewayResult};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const DEFAULT_API_BASE: &str = "https://api.telegram.org";

/// Pause after a failed `getUpdates` before polling again
const POLL_ERROR_PAUSE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    /// Token issued by @BotFather
    #[serde(default)]
    pub bot_token: String,

    /// Bot API base URL (override for self-hosted Bot API servers)
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// Long-poll timeout handed to `getUpdates`, in seconds
    #[serde(default = "default_poll_timeout")]
    pub poll_timeout_secs: u64,
}

fn default_api_base() -> String {
    DEFAULT_API_BASE.to_string()
}

fn default_poll_timeout() -> u64 {
    30
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            api_base: default_api_base(),
            poll_timeout_secs: default_poll_timeout(),
        }
    }
}

// ── Bot API types ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct TgResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TgUpdate {
    update_id: i64,
    message: Option<TgMessage>,
    channel_post: Option<TgMessage>,
}

#[derive(Debug, Deserialize)]
struct TgMessage {
    message_id: i64,
    chat: TgChat,
    text: Option<String>,
    caption: Option<String>,
    date: i64,
    reply_to_message: Option<TgReplyRef>,
}

#[derive(Debug, Deserialize)]
struct TgReplyRef {
    message_id: i64,
}

#[derive(Debug, Deserialize)]
struct TgChat {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct TgUser {
    username: Option<String>,
    first_name: String,
}

impl TgUpdate {
    /// Text-bearing messages and channel posts become channel events
    fn into_event(self) -> Option<InboundChannelEvent> {
        let msg = self.message.or(self.channel_post)?;
        let text = msg.text.or(msg.caption)?;
        Some(InboundChannelEvent {
            message_id: msg.message_id,
            channel_id: msg.chat.id,
            text,
            reply_to_id: msg.reply_to_message.map(|r| r.message_id),
            timestamp: Utc
                .timestamp_opt(msg.date, 0)
                .single()
                .unwrap_or_else(Utc::now),
        })
    }
}

// ── HTTP client ────────────────────────────────────────────────────────

#[derive(Clone)]
struct BotApi {
    client: reqwest::Client,
    base: String,
}

impl BotApi {
    fn new(config: &TelegramConfig) -> GatewayResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.poll_timeout_secs + 30))
            .build()?;
        Ok(Self {
            client,
            base: format!("{}/bot{}", config.api_base.trim_end_matches('/'), config.bot_token),
        })
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        body: serde_json::Value,
    ) -> GatewayResult<T> {
        // The URL carries the bot token and must not reach error text.
        let url = format!("{}/{}", self.base, method);
        let resp: TgResponse<T> = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| GatewayError::from(e.without_url()))?
            .json()
            .await
            .map_err(|e| GatewayError::from(e.without_url()))?;

        if !resp.ok {
            return Err(GatewayError::Transport(format!(
                "{} failed: {}",
                method,
                resp.description.unwrap_or_default()
            )));
        }
        resp.result
            .ok_or_else(|| GatewayError::Transport(format!("{}: no result", method)))
    }

    async fn get_me(&self) -> GatewayResult<String> {
        let me: TgUser = self.call("getMe", serde_json::json!({})).await?;
        Ok(me.username.unwrap_or(me.first_name))
    }

    async fn send_message(&self, chat_id: ChannelId, text: &str) -> GatewayResult<MessageId> {
        let msg: TgMessage = self
            .call(
                "sendMessage",
                serde_json::json!({ "chat_id": chat_id, "text": text }),
            )
            .await?;
        Ok(msg.message_id)
    }

    async fn get_updates(&self, offset: i64, timeout: u64) -> GatewayResult<Vec<TgUpdate>> {
        self.call(
            "getUpdates",
            serde_json::json!({
                "offset": offset,
                "timeout": timeout,
                "allowed_updates": ["message", "channel_post"],
            }),
        )
        .await
    }
}

async fn run_polling_loop(api: BotApi, hub: Arc<SubscriptionHub>, poll_timeout: u64) {
    let mut offset: i64 = 0;
    loop {
        match api.get_updates(offset, poll_timeout).await {
            Ok(updates) => {
                for update in updates {
                    offset = offset.max(update.update_id + 1);
                    if let Some(event) = update.into_event() {
                        debug!(
                            channel_id = event.channel_id,
                            message_id = event.message_id,
                            reply_to = ?event.reply_to_id,
                            "telegram event received"
                        );
                        hub.dispatch(&event);
                    }
                }
            }
            Err(e) => {
                warn!("Telegram getUpdates failed: {}. Retrying in {:?}", e, POLL_ERROR_PAUSE);
                tokio::time::sleep(POLL_ERROR_PAUSE).await;
            }
        }
    }
}

// ── Connector ──────────────────────────────────────────────────────────

pub struct TelegramConnector {
    api: BotApi,
    hub: Arc<SubscriptionHub>,
    bot_username: String,
    poller: Mutex<Option<JoinHandle<()>>>,
}

impl TelegramConnector {
    /// Verify the token with `getMe` and start receiving updates.
    pub async fn connect(config: TelegramConfig) -> GatewayResult<Self> {
        if config.bot_token.is_empty() {
            return Err(GatewayError::InvalidInput(
                "telegram bot token is not configured".to_string(),
            ));
        }

        let api = BotApi::new(&config)?;
        let bot_username = api.get_me().await?;
        info!("Connected to Telegram as @{}", bot_username);

        let hub = Arc::new(SubscriptionHub::new());
        let poller = tokio::spawn(run_polling_loop(
            api.clone(),
            hub.clone(),
            config.poll_timeout_secs,
        ));

        Ok(Self {
            api,
            hub,
            bot_username,
            poller: Mutex::new(Some(poller)),
        })
    }

    pub fn bot_username(&self) -> &str {
        &self.bot_username
    }

    fn stop_poller(&self) -> bool {
        match self.poller.lock().take() {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }
}

impl Drop for TelegramConnector {
    fn drop(&mut self) {
        self.stop_poller();
    }
}

#[async_trait]
impl ChatConnector for TelegramConnector {
    async fn send_command(&self, channel: ChannelId, text: &str) -> GatewayResult<MessageHandle> {
        if self.poller.lock().is_none() {
            return Err(GatewayError::transport("telegram connector is shut down"));
        }
        let message_id = self.api.send_message(channel, text).await?;
        debug!(channel_id = channel, message_id, "telegram command sent");
        Ok(MessageHandle {
            channel_id: channel,
            message_id,
        })
    }

    fn subscribe(&self, channel: ChannelId, callback: EventCallback) -> SubscriptionHandle {
        self.hub.subscribe(channel, callback)
    }

    fn unsubscribe(&self, handle: SubscriptionHandle) -> bool {
        self.hub.unsubscribe(handle)
    }

    fn subscription_count(&self) -> usize {
        self.hub.len()
    }

    fn name(&self) -> &str {
        "telegram"
    }

    async fn shutdown(&self) {
        if self.stop_poller() {
            info!("Telegram connector shut down");
        }
    }
}
