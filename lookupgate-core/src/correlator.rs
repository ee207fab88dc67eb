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

//! Request/reply correlation over a shared chat channel.
//!
//! A lookup posts `/{type} {value}` into the responder channel and then
//! watches every inbound event on that channel for the one that answers it.
//! Each outstanding lookup is a [`PendingRequest`] driven through
//!
//! ```text
//! Idle ──Dispatched──► Sent ──Accepted────────► Resolved
//!   │                   ├───DeadlineElapsed──► TimedOut
//!   └──TransportFault───┴───TransportFault───► Failed
//! ```
//!
//! Only `Sent` evaluates events. Events that arrive while `Idle` (the
//! subscription is opened before the command goes out) are buffered and
//! evaluated on entering `Sent`. The accepting callback fires a oneshot, so
//! the waiting request wakes immediately instead of polling.

use crate::channel::{ChannelId, ChatConnector, InboundChannelEvent, MessageId, SubscriptionHandle};
use crate::error::{GatewayError, GatewayResult};
use crate::query::QueryType;
use crate::sanitize::sanitize;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

/// In-progress markers posted by the responder (Portuguese locale)
pub const DEFAULT_NOISE_MARKERS: &[&str] = &["aguarde", "carregando", "processando"];

/// How an inbound event is tied to a pending command
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchPolicy {
    /// Reply link to the command OR the query value anywhere in the text.
    /// Concurrent lookups on one channel can steal each other's replies.
    #[default]
    Loose,
    /// An event that carries a reply link must point at the command; the
    /// value-substring test only applies to events without one.
    ReplyPreferred,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelatorConfig {
    /// Channel the responder listens on and answers in
    #[serde(default)]
    pub channel_id: ChannelId,

    /// Maximum wait for a qualifying reply, in milliseconds
    #[serde(default = "default_reply_timeout_ms")]
    pub reply_timeout_ms: u64,

    /// Case-insensitive substrings marking interim "please wait" messages
    #[serde(default = "default_noise_markers")]
    pub noise_markers: Vec<String>,

    #[serde(default)]
    pub match_policy: MatchPolicy,
}

fn default_reply_timeout_ms() -> u64 {
    10_000
}

fn default_noise_markers() -> Vec<String> {
    DEFAULT_NOISE_MARKERS.iter().map(|m| m.to_string()).collect()
}

impl Default for CorrelatorConfig {
    fn default() -> Self {
        Self {
            channel_id: 0,
            reply_timeout_ms: default_reply_timeout_ms(),
            noise_markers: default_noise_markers(),
            match_policy: MatchPolicy::default(),
        }
    }
}

impl CorrelatorConfig {
    pub fn reply_timeout(&self) -> Duration {
        Duration::from_millis(self.reply_timeout_ms)
    }
}

// ── State machine ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorrelationState {
    Idle,
    Sent,
    Resolved,
    TimedOut,
    Failed,
}

impl CorrelationState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            CorrelationState::Resolved | CorrelationState::TimedOut | CorrelationState::Failed
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorrelationEvent {
    Dispatched,
    Accepted,
    DeadlineElapsed,
    TransportFault,
}

#[derive(Debug, Error)]
#[error("Invalid transition: {current:?} -> {event:?}")]
pub struct InvalidTransition {
    pub current: CorrelationState,
    pub event: CorrelationEvent,
}

impl CorrelationState {
    pub fn transition(self, event: CorrelationEvent) -> Result<CorrelationState, InvalidTransition> {
        use CorrelationEvent::*;
        use CorrelationState::*;

        let next = match (self, event) {
            (Idle, Dispatched) => Sent,
            (Sent, Accepted) => Resolved,
            (Sent, DeadlineElapsed) => TimedOut,
            (Idle | Sent, TransportFault) => Failed,
            _ => {
                return Err(InvalidTransition {
                    current: self,
                    event,
                })
            }
        };

        Ok(next)
    }
}

// ── Pending request ────────────────────────────────────────────────────

/// Outcome of offering one event to a pending request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Became the answer
    Accepted,
    /// In-progress notice, skipped
    Noise,
    /// Unrelated traffic
    NoMatch,
    /// Held until the command is sent
    Buffered,
    /// Request already settled
    Ignored,
}

struct PendingInner {
    state: CorrelationState,
    correlation_token: Option<MessageId>,
    result: Option<String>,
    backlog: Vec<InboundChannelEvent>,
    waker: Option<oneshot::Sender<()>>,
}

/// One outstanding lookup awaiting its reply
pub struct PendingRequest {
    expected_type: QueryType,
    query_value: String,
    deadline: Instant,
    noise_markers: Arc<[String]>,
    policy: MatchPolicy,
    inner: Mutex<PendingInner>,
}

impl PendingRequest {
    /// Create an `Idle` request. The receiver fires once an answer is accepted.
    pub fn new(
        expected_type: QueryType,
        query_value: impl Into<String>,
        deadline: Instant,
        noise_markers: Arc<[String]>,
        policy: MatchPolicy,
    ) -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        let request = Self {
            expected_type,
            query_value: query_value.into(),
            deadline,
            noise_markers,
            policy,
            inner: Mutex::new(PendingInner {
                state: CorrelationState::Idle,
                correlation_token: None,
                result: None,
                backlog: Vec::new(),
                waker: Some(tx),
            }),
        };
        (request, rx)
    }

    pub fn expected_type(&self) -> QueryType {
        self.expected_type
    }

    pub fn query_value(&self) -> &str {
        &self.query_value
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn state(&self) -> CorrelationState {
        self.inner.lock().state
    }

    pub fn correlation_token(&self) -> Option<MessageId> {
        self.inner.lock().correlation_token
    }

    pub fn result(&self) -> Option<String> {
        self.inner.lock().result.clone()
    }

    fn is_noise(&self, text: &str) -> bool {
        let lower = text.to_lowercase();
        self.noise_markers.iter().any(|m| lower.contains(m.as_str()))
    }

    fn matches(&self, token: MessageId, event: &InboundChannelEvent) -> bool {
        let contains_value =
            !self.query_value.is_empty() && event.text.contains(self.query_value.as_str());
        match (self.policy, event.reply_to_id) {
            (_, Some(reply_to)) if reply_to == token => true,
            (MatchPolicy::Loose, _) => contains_value,
            (MatchPolicy::ReplyPreferred, Some(_)) => false,
            (MatchPolicy::ReplyPreferred, None) => contains_value,
        }
    }

    /// Evaluate `event` while holding the lock. Caller guarantees state `Sent`.
    fn evaluate(&self, inner: &mut PendingInner, event: &InboundChannelEvent) -> Verdict {
        if self.is_noise(&event.text) {
            return Verdict::Noise;
        }
        let Some(token) = inner.correlation_token else {
            return Verdict::NoMatch;
        };
        if !self.matches(token, event) {
            return Verdict::NoMatch;
        }

        match inner.state.transition(CorrelationEvent::Accepted) {
            Ok(next) => {
                inner.state = next;
                inner.result = Some(event.text.clone());
                if let Some(waker) = inner.waker.take() {
                    let _ = waker.send(());
                }
                Verdict::Accepted
            }
            Err(_) => Verdict::Ignored,
        }
    }

    /// Offer an inbound event. First accepted event wins; later ones are ignored.
    pub fn offer(&self, event: &InboundChannelEvent) -> Verdict {
        let mut inner = self.inner.lock();
        match inner.state {
            CorrelationState::Idle => {
                inner.backlog.push(event.clone());
                Verdict::Buffered
            }
            CorrelationState::Sent => self.evaluate(&mut inner, event),
            _ => Verdict::Ignored,
        }
    }

    /// Record the command's message id and evaluate anything buffered meanwhile.
    pub fn mark_sent(&self, token: MessageId) -> Result<(), InvalidTransition> {
        let mut inner = self.inner.lock();
        inner.state = inner.state.transition(CorrelationEvent::Dispatched)?;
        inner.correlation_token = Some(token);

        let backlog = std::mem::take(&mut inner.backlog);
        for event in &backlog {
            if self.evaluate(&mut inner, event) == Verdict::Accepted {
                break;
            }
        }
        Ok(())
    }

    pub fn mark_failed(&self) {
        let mut inner = self.inner.lock();
        if let Ok(next) = inner.state.transition(CorrelationEvent::TransportFault) {
            inner.state = next;
            inner.backlog.clear();
            inner.waker = None;
        }
    }

    /// Settle after the wait ends: the accepted text, or `None` after moving
    /// to `TimedOut`. An acceptance that raced the deadline still wins.
    pub fn settle(&self) -> Option<String> {
        let mut inner = self.inner.lock();
        if inner.state == CorrelationState::Sent {
            if let Ok(next) = inner.state.transition(CorrelationEvent::DeadlineElapsed) {
                inner.state = next;
                inner.waker = None;
            }
        }
        inner.result.clone()
    }
}

// ── Correlator ─────────────────────────────────────────────────────────

/// Answer produced by a successful lookup
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LookupAnswer {
    pub query_type: QueryType,
    pub value: String,
    pub answer: String,
}

/// Removes the subscription on every exit path, including cancellation
struct SubscriptionGuard {
    connector: Arc<dyn ChatConnector>,
    handle: SubscriptionHandle,
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        if !self.connector.unsubscribe(self.handle) {
            warn!("Subscription {:?} was already removed", self.handle);
        }
    }
}

#[derive(Clone)]
pub struct Correlator {
    connector: Arc<dyn ChatConnector>,
    config: CorrelatorConfig,
    noise_markers: Arc<[String]>,
}

impl Correlator {
    pub fn new(connector: Arc<dyn ChatConnector>, config: CorrelatorConfig) -> Self {
        let noise_markers: Arc<[String]> = config
            .noise_markers
            .iter()
            .map(|m| m.to_lowercase())
            .filter(|m| !m.is_empty())
            .collect();
        Self {
            connector,
            config,
            noise_markers,
        }
    }

    pub fn connector(&self) -> &Arc<dyn ChatConnector> {
        &self.connector
    }

    pub fn config(&self) -> &CorrelatorConfig {
        &self.config
    }

    /// Send `/{type} {value}` and wait for the reply that answers it.
    ///
    /// Returns the sanitized answer, `NoResponseTimeout` when nothing
    /// qualifies before the deadline, or `Transport` when the send fails.
    /// No retries.
    pub async fn lookup(&self, query_type: QueryType, value: &str) -> GatewayResult<LookupAnswer> {
        let channel = self.config.channel_id;
        let wait = self.config.reply_timeout();
        let deadline = Instant::now() + wait;

        let (pending, answered) = PendingRequest::new(
            query_type,
            value,
            deadline,
            self.noise_markers.clone(),
            self.config.match_policy,
        );
        let pending = Arc::new(pending);

        let listener = pending.clone();
        let handle = self.connector.subscribe(
            channel,
            Arc::new(move |event: &InboundChannelEvent| {
                let verdict = listener.offer(event);
                trace!(message_id = event.message_id, ?verdict, "event offered");
            }),
        );
        let _guard = SubscriptionGuard {
            connector: self.connector.clone(),
            handle,
        };

        let command = query_type.command(value);
        let sent = match self.connector.send_command(channel, &command).await {
            Ok(sent) => sent,
            Err(e) => {
                pending.mark_failed();
                warn!(query_type = %query_type, "Failed to send command: {}", e);
                return Err(match e {
                    GatewayError::Transport(_) => e,
                    other => GatewayError::transport(other),
                });
            }
        };

        pending
            .mark_sent(sent.message_id)
            .map_err(GatewayError::transport)?;
        debug!(
            query_type = %query_type,
            token = sent.message_id,
            "command sent, awaiting reply"
        );

        // Either the oneshot fires or the deadline passes; `settle` decides.
        let _ = tokio::time::timeout_at(deadline, answered).await;

        match pending.settle() {
            Some(text) => {
                info!(query_type = %query_type, token = sent.message_id, "reply correlated");
                Ok(LookupAnswer {
                    query_type,
                    value: value.to_string(),
                    answer: sanitize(&text),
                })
            }
            None => {
                warn!(
                    query_type = %query_type,
                    token = sent.message_id,
                    "no reply within {:?}",
                    wait
                );
                Err(GatewayError::NoResponseTimeout(wait))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::loopback::{LoopbackConnector, LoopbackReply};

    fn markers() -> Arc<[String]> {
        DEFAULT_NOISE_MARKERS.iter().map(|m| m.to_string()).collect()
    }

    fn pending(value: &str, policy: MatchPolicy) -> (PendingRequest, oneshot::Receiver<()>) {
        PendingRequest::new(
            QueryType::Cpf,
            value,
            Instant::now() + Duration::from_secs(10),
            markers(),
            policy,
        )
    }

    fn event(id: MessageId, text: &str) -> InboundChannelEvent {
        InboundChannelEvent::new(-100, id, text)
    }

    #[test]
    fn test_state_transitions() {
        use CorrelationEvent::*;
        use CorrelationState::*;

        assert_eq!(Idle.transition(Dispatched).unwrap(), Sent);
        assert_eq!(Sent.transition(Accepted).unwrap(), Resolved);
        assert_eq!(Sent.transition(DeadlineElapsed).unwrap(), TimedOut);
        assert_eq!(Idle.transition(TransportFault).unwrap(), Failed);
        assert!(Idle.transition(Accepted).is_err());
        assert!(Resolved.transition(Accepted).is_err());
        assert!(TimedOut.transition(Accepted).is_err());
        assert!(Resolved.transition(DeadlineElapsed).is_err());
        for terminal in [Resolved, TimedOut, Failed] {
            assert!(terminal.is_terminal());
        }
    }

    #[test]
    fn test_reply_link_accepted_without_value() {
        let (req, mut rx) = pending("12345678901", MatchPolicy::Loose);
        req.mark_sent(42).unwrap();

        let reply = event(43, "NOME: FULANO").replying_to(42);
        assert_eq!(req.offer(&reply), Verdict::Accepted);
        assert_eq!(req.state(), CorrelationState::Resolved);
        assert_eq!(req.result().as_deref(), Some("NOME: FULANO"));
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn test_value_substring_accepted_without_link() {
        let (req, _rx) = pending("12345678901", MatchPolicy::Loose);
        req.mark_sent(42).unwrap();

        assert_eq!(req.offer(&event(43, "bom dia")), Verdict::NoMatch);
        assert_eq!(
            req.offer(&event(44, "CPF 12345678901: regular")),
            Verdict::Accepted
        );
    }

    #[test]
    fn test_value_match_is_case_sensitive() {
        let (req, _rx) = pending("Fulano", MatchPolicy::Loose);
        req.mark_sent(1).unwrap();
        assert_eq!(req.offer(&event(2, "resultado: FULANO")), Verdict::NoMatch);
        assert_eq!(req.offer(&event(3, "resultado: Fulano")), Verdict::Accepted);
    }

    #[test]
    fn test_noise_never_accepted() {
        let (req, _rx) = pending("12345678901", MatchPolicy::Loose);
        req.mark_sent(42).unwrap();

        let noisy = event(43, "Carregando 12345678901...").replying_to(42);
        assert_eq!(req.offer(&noisy), Verdict::Noise);
        assert_eq!(req.offer(&event(44, "AGUARDE")), Verdict::Noise);
        assert_eq!(req.state(), CorrelationState::Sent);
        assert_eq!(req.result(), None);
    }

    #[test]
    fn test_first_accepted_wins() {
        let (req, _rx) = pending("999", MatchPolicy::Loose);
        req.mark_sent(7).unwrap();

        assert_eq!(req.offer(&event(8, "first 999")), Verdict::Accepted);
        assert_eq!(
            req.offer(&event(9, "second 999").replying_to(7)),
            Verdict::Ignored
        );
        assert_eq!(req.result().as_deref(), Some("first 999"));
    }

    #[test]
    fn test_events_before_send_are_buffered() {
        let (req, mut rx) = pending("555", MatchPolicy::Loose);

        assert_eq!(req.offer(&event(1, "processando")), Verdict::Buffered);
        assert_eq!(req.offer(&event(2, "dados 555")), Verdict::Buffered);
        assert_eq!(req.state(), CorrelationState::Idle);

        req.mark_sent(3).unwrap();
        assert_eq!(req.state(), CorrelationState::Resolved);
        assert_eq!(req.result().as_deref(), Some("dados 555"));
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn test_reply_preferred_rejects_foreign_links() {
        let (req, _rx) = pending("123", MatchPolicy::ReplyPreferred);
        req.mark_sent(10).unwrap();

        let foreign = event(11, "resultado 1234").replying_to(9);
        assert_eq!(req.offer(&foreign), Verdict::NoMatch);
        assert_eq!(req.offer(&event(12, "resultado 123")), Verdict::Accepted);
    }

    #[test]
    fn test_settle_after_deadline() {
        let (req, _rx) = pending("1", MatchPolicy::Loose);
        req.mark_sent(5).unwrap();

        assert_eq!(req.settle(), None);
        assert_eq!(req.state(), CorrelationState::TimedOut);
        assert_eq!(req.offer(&event(6, "1").replying_to(5)), Verdict::Ignored);
        assert_eq!(req.result(), None);
    }

    #[test]
    fn test_failed_request_ignores_events() {
        let (req, _rx) = pending("1", MatchPolicy::Loose);
        req.mark_failed();
        assert_eq!(req.state(), CorrelationState::Failed);
        assert_eq!(req.offer(&event(6, "1")), Verdict::Ignored);
        assert!(req.mark_sent(7).is_err());
    }

    fn correlator(connector: Arc<LoopbackConnector>, policy: MatchPolicy) -> Correlator {
        Correlator::new(
            connector,
            CorrelatorConfig {
                channel_id: -100,
                match_policy: policy,
                ..Default::default()
            },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_lookup_end_to_end() {
        let connector = Arc::new(LoopbackConnector::new().with_responder(Arc::new(
            |_cmd: &str| {
                vec![
                    LoopbackReply::linked("⏳ Aguarde, consultando...", Duration::from_millis(200)),
                    LoopbackReply::linked("CEP: 01001-000, São Paulo", Duration::from_secs(2)),
                ]
            },
        )));
        let correlator = correlator(connector.clone(), MatchPolicy::Loose);

        let answer = correlator.lookup(QueryType::Cep, "01001000").await.unwrap();
        assert_eq!(answer.query_type, QueryType::Cep);
        assert_eq!(answer.value, "01001000");
        assert_eq!(answer.answer, "CEP: 01001-000, São Paulo");
        assert_eq!(connector.sent(), vec![(-100, "/cep 01001000".to_string())]);
        assert_eq!(connector.subscription_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lookup_timeout_unsubscribes() {
        let connector = Arc::new(LoopbackConnector::new().with_responder(Arc::new(
            |_cmd: &str| vec![LoopbackReply::linked("Processando...", Duration::from_secs(1))],
        )));
        let correlator = correlator(connector.clone(), MatchPolicy::Loose);

        let start = Instant::now();
        let result = correlator.lookup(QueryType::Ip, "8.8.8.8").await;
        assert!(matches!(result, Err(GatewayError::NoResponseTimeout(_))));
        assert!(start.elapsed() >= Duration::from_secs(10));
        assert_eq!(connector.subscription_count(), 0);
    }

    #[tokio::test]
    async fn test_lookup_send_failure() {
        let connector = Arc::new(LoopbackConnector::new());
        connector.fail_sends(true);
        let correlator = correlator(connector.clone(), MatchPolicy::Loose);

        let result = correlator.lookup(QueryType::Email, "a@b.c").await;
        match result {
            Err(GatewayError::Transport(cause)) => assert!(cause.contains("loopback")),
            other => panic!("expected transport error, got {:?}", other),
        }
        assert_eq!(connector.subscription_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lookup_wakes_on_injected_reply() {
        let connector = Arc::new(LoopbackConnector::new());
        let correlator = correlator(connector.clone(), MatchPolicy::Loose);

        let task = {
            let correlator = correlator.clone();
            tokio::spawn(async move { correlator.lookup(QueryType::Cpf, "12345678901").await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(connector.subscription_count(), 1);

        // Command got id 1; replies reference it.
        let start = Instant::now();
        connector.inject(event(connector.allocate_id(), "carregando 12345678901").replying_to(1));
        connector.inject(event(connector.allocate_id(), "*Situação*: REGULAR @bot").replying_to(1));
        connector.inject(event(connector.allocate_id(), "late 12345678901"));

        let answer = task.await.unwrap().unwrap();
        assert_eq!(answer.answer, "Situação: REGULAR");
        assert!(start.elapsed() < Duration::from_secs(1));
        assert_eq!(connector.subscription_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_loose_policy_cross_request_capture() {
        let connector = Arc::new(LoopbackConnector::new());
        let loose = correlator(connector.clone(), MatchPolicy::Loose);

        let a = {
            let c = loose.clone();
            tokio::spawn(async move { c.lookup(QueryType::Telefone, "1199").await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        let b = {
            let c = loose.clone();
            tokio::spawn(async move { c.lookup(QueryType::Telefone, "119988").await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        // Reply meant for B (token 2) also contains A's value.
        connector.inject(event(connector.allocate_id(), "Telefone 119988: operadora X").replying_to(2));

        let a = a.await.unwrap().unwrap();
        let b = b.await.unwrap().unwrap();
        assert_eq!(a.answer, "Telefone 119988: operadora X");
        assert_eq!(b.answer, "Telefone 119988: operadora X");
    }

    #[tokio::test(start_paused = true)]
    async fn test_reply_preferred_isolates_linked_replies() {
        let connector = Arc::new(LoopbackConnector::new());
        let strict = correlator(connector.clone(), MatchPolicy::ReplyPreferred);

        let a = {
            let c = strict.clone();
            tokio::spawn(async move { c.lookup(QueryType::Telefone, "1199").await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        let b = {
            let c = strict.clone();
            tokio::spawn(async move { c.lookup(QueryType::Telefone, "119988").await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        connector.inject(event(connector.allocate_id(), "Telefone 119988: operadora X").replying_to(2));

        let b = b.await.unwrap().unwrap();
        assert_eq!(b.answer, "Telefone 119988: operadora X");
        assert!(matches!(
            a.await.unwrap(),
            Err(GatewayError::NoResponseTimeout(_))
        ));
        assert_eq!(connector.subscription_count(), 0);
    }
}
