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

//! Lookupgate Core
//!
//! Query types, reply sanitization, chat connectors and the request/reply
//! correlator that turns a shared chat channel into a lookup service.

pub mod channel;
pub mod correlator;
pub mod error;
pub mod query;
pub mod sanitize;

pub use channel::{
    ChannelId, ChatConnector, InboundChannelEvent, LoopbackConnector, MessageHandle, MessageId,
    SubscriptionHandle, TelegramConfig, TelegramConnector,
};
pub use correlator::{
    CorrelationState, Correlator, CorrelatorConfig, LookupAnswer, MatchPolicy, PendingRequest,
    Verdict, DEFAULT_NOISE_MARKERS,
};
pub use error::{GatewayError, GatewayResult};
pub use query::{ApiVersion, ExternalKind, QueryType};
pub use sanitize::{escape_html, sanitize};
