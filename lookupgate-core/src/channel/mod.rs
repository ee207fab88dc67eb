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

//! Chat responder client contract.
//!
//! A connector owns one session with the chat network. Commands go out with
//! `send_command`; every inbound message on a channel is fanned out to the
//! callbacks registered with `subscribe`. Callbacks run on the connector's
//! receive task, concurrently with request handling.

pub mod loopback;
pub mod telegram;

pub use loopback::LoopbackConnector;
pub use telegram::{TelegramConfig, TelegramConnector};

use crate::error::GatewayResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::trace;

/// Chat/channel identifier (Telegram chat ids are signed 64-bit)
pub type ChannelId = i64;

/// Message identifier, unique within a channel
pub type MessageId = i64;

/// A message observed on a channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundChannelEvent {
    pub message_id: MessageId,
    pub channel_id: ChannelId,
    pub text: String,
    /// Message this one replies to, if the sender linked it
    pub reply_to_id: Option<MessageId>,
    pub timestamp: DateTime<Utc>,
}

impl InboundChannelEvent {
    pub fn new(channel_id: ChannelId, message_id: MessageId, text: impl Into<String>) -> Self {
        Self {
            message_id,
            channel_id,
            text: text.into(),
            reply_to_id: None,
            timestamp: Utc::now(),
        }
    }

    pub fn replying_to(mut self, message_id: MessageId) -> Self {
        self.reply_to_id = Some(message_id);
        self
    }
}

/// Returned by `send_command`; its id is the correlation token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHandle {
    pub channel_id: ChannelId,
    pub message_id: MessageId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(u64);

pub type EventCallback = Arc<dyn Fn(&InboundChannelEvent) + Send + Sync>;

#[async_trait]
pub trait ChatConnector: Send + Sync {
    /// Post `text` into `channel` and return the created message.
    async fn send_command(&self, channel: ChannelId, text: &str) -> GatewayResult<MessageHandle>;

    /// Register `callback` for every subsequent event on `channel`.
    fn subscribe(&self, channel: ChannelId, callback: EventCallback) -> SubscriptionHandle;

    /// Remove a subscription. Returns false if it was already gone.
    fn unsubscribe(&self, handle: SubscriptionHandle) -> bool;

    /// Number of live subscriptions
    fn subscription_count(&self) -> usize;

    /// Short connector name for logs and health output
    fn name(&self) -> &str;

    /// Tear down the session. Further sends fail.
    async fn shutdown(&self) {}
}

/// Subscription registry shared by every connector implementation
#[derive(Default)]
pub struct SubscriptionHub {
    next_id: AtomicU64,
    subscribers: DashMap<u64, (ChannelId, EventCallback)>,
}

impl SubscriptionHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, channel: ChannelId, callback: EventCallback) -> SubscriptionHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers.insert(id, (channel, callback));
        SubscriptionHandle(id)
    }

    pub fn unsubscribe(&self, handle: SubscriptionHandle) -> bool {
        self.subscribers.remove(&handle.0).is_some()
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    /// Deliver `event` to every subscriber of its channel.
    ///
    /// Callbacks are collected first so none runs while a map shard is
    /// locked; a callback may then unsubscribe itself safely.
    pub fn dispatch(&self, event: &InboundChannelEvent) -> usize {
        let targets: Vec<EventCallback> = self
            .subscribers
            .iter()
            .filter(|entry| entry.value().0 == event.channel_id)
            .map(|entry| entry.value().1.clone())
            .collect();

        trace!(
            channel_id = event.channel_id,
            message_id = event.message_id,
            subscribers = targets.len(),
            "dispatching inbound event"
        );

        for callback in &targets {
            callback(event);
        }
        targets.len()
    }
}
