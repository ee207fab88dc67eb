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

//! In-memory connector.
//!
//! Stands in for the chat network during local development and tests: sent
//! commands are recorded, a scripted responder can answer them after a delay,
//! and arbitrary inbound events can be injected.

use super::{
    ChannelId, ChatConnector, EventCallback, InboundChannelEvent, MessageHandle, MessageId,
    SubscriptionHandle, SubscriptionHub,
};
use crate::error::{GatewayError, GatewayResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Most recent sent commands kept for inspection
const SENT_HISTORY_LIMIT: usize = 256;

/// One reply produced by a scripted responder
#[derive(Debug, Clone)]
pub struct LoopbackReply {
    pub text: String,
    /// Link the reply to the command message (`reply_to_id`)
    pub linked: bool,
    pub delay: Duration,
}

impl LoopbackReply {
    pub fn linked(text: impl Into<String>, delay: Duration) -> Self {
        Self {
            text: text.into(),
            linked: true,
            delay,
        }
    }

    pub fn unlinked(text: impl Into<String>, delay: Duration) -> Self {
        Self {
            text: text.into(),
            linked: false,
            delay,
        }
    }
}

/// Produces replies for a command text
pub type Responder = Arc<dyn Fn(&str) -> Vec<LoopbackReply> + Send + Sync>;

pub struct LoopbackConnector {
    hub: Arc<SubscriptionHub>,
    next_message_id: Arc<AtomicI64>,
    sent: Mutex<VecDeque<(ChannelId, String)>>,
    responder: Option<Responder>,
    fail_sends: AtomicBool,
    closed: AtomicBool,
}

impl Default for LoopbackConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackConnector {
    pub fn new() -> Self {
        Self {
            hub: Arc::new(SubscriptionHub::new()),
            next_message_id: Arc::new(AtomicI64::new(1)),
            sent: Mutex::new(VecDeque::new()),
            responder: None,
            fail_sends: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    pub fn with_responder(mut self, responder: Responder) -> Self {
        self.responder = Some(responder);
        self
    }

    /// Responder that echoes the command argument back as a linked reply,
    /// preceded by an in-progress notice. Used by the `loopback` connector mode.
    pub fn echo(delay: Duration) -> Self {
        Self::new().with_responder(Arc::new(move |command: &str| {
            let arg = command.split_once(' ').map(|(_, v)| v).unwrap_or(command);
            vec![
                LoopbackReply::linked("⏳ Carregando consulta...", delay / 2),
                LoopbackReply::linked(format!("✅ Resultado para {}: sem registros", arg), delay),
            ]
        }))
    }

    /// Make every subsequent `send_command` fail with a transport error
    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    /// Most recent commands sent, oldest first
    pub fn sent(&self) -> Vec<(ChannelId, String)> {
        self.sent.lock().iter().cloned().collect()
    }

    /// Allocate a message id as if another participant had posted
    pub fn allocate_id(&self) -> MessageId {
        self.next_message_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Push an inbound event through the subscription hub
    pub fn inject(&self, event: InboundChannelEvent) -> usize {
        self.hub.dispatch(&event)
    }
}

#[async_trait]
impl ChatConnector for LoopbackConnector {
    async fn send_command(&self, channel: ChannelId, text: &str) -> GatewayResult<MessageHandle> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(GatewayError::transport("loopback connector is shut down"));
        }
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(GatewayError::transport("loopback send failure"));
        }

        let message_id = self.allocate_id();
        {
            let mut sent = self.sent.lock();
            if sent.len() == SENT_HISTORY_LIMIT {
                sent.pop_front();
            }
            sent.push_back((channel, text.to_string()));
        }
        debug!(channel_id = channel, message_id, "loopback command sent");

        if let Some(responder) = &self.responder {
            for reply in responder(text) {
                let hub = self.hub.clone();
                let ids = self.next_message_id.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(reply.delay).await;
                    let id = ids.fetch_add(1, Ordering::SeqCst);
                    let mut event = InboundChannelEvent::new(channel, id, reply.text);
                    if reply.linked {
                        event = event.replying_to(message_id);
                    }
                    hub.dispatch(&event);
                });
            }
        }

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
        "loopback"
    }

    async fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
