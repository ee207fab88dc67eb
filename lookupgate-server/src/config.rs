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

use anyhow::Result;
use lookupgate_core::{CorrelatorConfig, MatchPolicy, TelegramConfig};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use crate::auth::SessionMode;
use crate::external::ExternalConfig;

/// Lookupgate Server Configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub server: HttpServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub telegram: TelegramSection,
    #[serde(default)]
    pub correlator: CorrelatorConfig,
    #[serde(default)]
    pub external: ExternalConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub branding: BrandingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HttpServerConfig {
    /// HTTP listen address (e.g., "127.0.0.1:8000")
    #[serde(default = "default_http_addr")]
    pub listen_addr: String,

    /// Enable CORS
    #[serde(default = "default_enable_cors")]
    pub enable_cors: bool,

    /// Directory served under /static
    #[serde(default = "default_static_dir")]
    pub static_dir: PathBuf,

    /// Emit logs as JSON lines
    #[serde(default)]
    pub log_json: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Directory holding usuarios.json and consultas.json
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

/// Which chat connector backs the correlator
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectorKind {
    #[default]
    Telegram,
    /// In-memory echo responder for local development
    Loopback,
}

impl std::str::FromStr for ConnectorKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "telegram" => Ok(ConnectorKind::Telegram),
            "loopback" => Ok(ConnectorKind::Loopback),
            other => anyhow::bail!("unknown connector '{}'", other),
        }
    }
}

/// Kind of chat the responder answers in
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatKind {
    /// Group or supergroup: the gateway bot sees `message` updates
    #[default]
    Group,
    /// Broadcast channel: the gateway bot sees `channel_post` updates
    Channel,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TelegramSection {
    #[serde(default)]
    pub connector: ConnectorKind,

    #[serde(default)]
    pub chat_kind: ChatKind,

    /// Whether the responder account is itself a bot
    #[serde(default = "default_responder_is_bot")]
    pub responder_is_bot: bool,

    #[serde(flatten)]
    pub bot: TelegramConfig,
}

impl Default for TelegramSection {
    fn default() -> Self {
        Self {
            connector: ConnectorKind::default(),
            chat_kind: ChatKind::default(),
            responder_is_bot: default_responder_is_bot(),
            bot: TelegramConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub session_mode: SessionMode,

    /// HMAC key for signed session markers. A random key is generated at
    /// startup when unset, so sessions do not survive restarts.
    pub session_secret: Option<String>,
}

/// Fields stamped on every successful lookup response
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BrandingConfig {
    #[serde(default = "default_criador")]
    pub criador: String,
    #[serde(default = "default_site")]
    pub site: String,
    #[serde(default = "default_telegram_link")]
    pub telegram: String,
}

// Default values
fn default_http_addr() -> String {
    "127.0.0.1:8000".to_string()
}

fn default_responder_is_bot() -> bool {
    true
}

fn default_enable_cors() -> bool {
    true
}

fn default_static_dir() -> PathBuf {
    PathBuf::from("./static")
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./db")
}

fn default_criador() -> String {
    "CenterApis - derxan.kvs".to_string()
}

fn default_site() -> String {
    "https://centerseven7.netlify.app".to_string()
}

fn default_telegram_link() -> String {
    "https://t.me/consultasblack01".to_string()
}

impl Default for HttpServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_http_addr(),
            enable_cors: default_enable_cors(),
            static_dir: default_static_dir(),
            log_json: false,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

impl Default for BrandingConfig {
    fn default() -> Self {
        Self {
            criador: default_criador(),
            site: default_site(),
            telegram: default_telegram_link(),
        }
    }
}

impl GatewayConfig {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration with priority: file > defaults, then environment
    pub fn load(config_file: Option<PathBuf>) -> Result<Self> {
        let config = if let Some(path) = config_file {
            if path.exists() {
                tracing::info!("Loading configuration from file: {:?}", path);
                Self::from_file(&path)?
            } else {
                tracing::warn!("Config file not found: {:?}, using defaults", path);
                Self::default()
            }
        } else {
            Self::default()
        };

        config.merge_with_env()
    }

    /// Apply environment overrides. Only variables that are set take effect.
    ///
    /// Supported environment variables:
    /// - LOOKUPGATE_HTTP_ADDR: HTTP listen address
    /// - LOOKUPGATE_DATA_DIR: directory for usuarios.json / consultas.json
    /// - LOOKUPGATE_CONNECTOR: `telegram` or `loopback`
    /// - LOOKUPGATE_BOT_TOKEN: Telegram bot token
    /// - LOOKUPGATE_CHANNEL_ID: responder chat id
    /// - LOOKUPGATE_REPLY_TIMEOUT_MS: correlation window
    /// - LOOKUPGATE_MATCH_POLICY: `loose` or `reply_preferred`
    /// - API_LAYER_KEY: apilayer key for whois lookups
    /// - LOOKUPGATE_SESSION_MODE: `signed` or `presence`
    /// - LOOKUPGATE_SESSION_SECRET: HMAC key for signed sessions
    pub fn merge_with_env(mut self) -> Result<Self> {
        if let Ok(addr) = std::env::var("LOOKUPGATE_HTTP_ADDR") {
            self.server.listen_addr = addr;
        }
        if let Ok(dir) = std::env::var("LOOKUPGATE_DATA_DIR") {
            self.storage.data_dir = PathBuf::from(dir);
        }
        if let Ok(kind) = std::env::var("LOOKUPGATE_CONNECTOR") {
            self.telegram.connector = kind.parse()?;
        }
        if let Ok(token) = std::env::var("LOOKUPGATE_BOT_TOKEN") {
            self.telegram.bot.bot_token = token;
        }
        if let Ok(channel) = std::env::var("LOOKUPGATE_CHANNEL_ID") {
            self.correlator.channel_id = channel
                .trim()
                .parse()
                .map_err(|e| anyhow::anyhow!("LOOKUPGATE_CHANNEL_ID: {}", e))?;
        }
        if let Ok(ms) = std::env::var("LOOKUPGATE_REPLY_TIMEOUT_MS") {
            self.correlator.reply_timeout_ms = ms
                .trim()
                .parse()
                .map_err(|e| anyhow::anyhow!("LOOKUPGATE_REPLY_TIMEOUT_MS: {}", e))?;
        }
        if let Ok(policy) = std::env::var("LOOKUPGATE_MATCH_POLICY") {
            self.correlator.match_policy = parse_match_policy(&policy)?;
        }
        if let Ok(key) = std::env::var("API_LAYER_KEY") {
            self.external.api_layer_key = Some(key);
        }
        if let Ok(mode) = std::env::var("LOOKUPGATE_SESSION_MODE") {
            self.auth.session_mode = mode.parse()?;
        }
        if let Ok(secret) = std::env::var("LOOKUPGATE_SESSION_SECRET") {
            self.auth.session_secret = Some(secret);
        }

        Ok(self)
    }

    /// Parse listen address as SocketAddr
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        Ok(self.server.listen_addr.parse()?)
    }

    pub fn users_path(&self) -> PathBuf {
        self.storage.data_dir.join("usuarios.json")
    }

    pub fn query_log_path(&self) -> PathBuf {
        self.storage.data_dir.join("consultas.json")
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        self.socket_addr()?;

        if self.correlator.reply_timeout_ms == 0 {
            anyhow::bail!("correlator.reply_timeout_ms must be greater than zero");
        }

        if self.telegram.connector == ConnectorKind::Telegram {
            if self.telegram.bot.bot_token.trim().is_empty() {
                anyhow::bail!(
                    "Telegram connector selected but no bot token configured \
                     (set LOOKUPGATE_BOT_TOKEN or use LOOKUPGATE_CONNECTOR=loopback)"
                );
            }
            if self.correlator.channel_id == 0 {
                anyhow::bail!("Telegram connector selected but correlator.channel_id is unset");
            }
        }

        if let Some(warning) = self.deployment_warning() {
            tracing::warn!("{}", warning);
        }

        if !self.storage.data_dir.exists() {
            std::fs::create_dir_all(&self.storage.data_dir)?;
        }

        Ok(())
    }

    /// Deployments the Bot API connector cannot observe.
    ///
    /// Telegram never delivers messages sent by one bot to another bot in a
    /// group or supergroup, regardless of privacy mode. Lookups then always
    /// time out.
    pub fn deployment_warning(&self) -> Option<&'static str> {
        let tg = &self.telegram;
        if tg.connector == ConnectorKind::Telegram
            && tg.responder_is_bot
            && tg.chat_kind == ChatKind::Group
        {
            return Some(
                "Responder is a bot in a group: the Bot API does not deliver bot-to-bot \
                 group messages, so replies will never arrive. Use a channel \
                 (telegram.chat_kind = \"channel\") or a user-account responder \
                 (telegram.responder_is_bot = false)",
            );
        }
        None
    }
}

pub fn parse_match_policy(raw: &str) -> Result<MatchPolicy> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "loose" => Ok(MatchPolicy::Loose),
        "reply_preferred" | "reply-preferred" => Ok(MatchPolicy::ReplyPreferred),
        other => anyhow::bail!("unknown match policy '{}'", other),
    }
}
