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

//! Account registration, login and cookie sessions.
//!
//! A successful login hands the browser a session marker in the `user`
//! cookie. In `signed` mode the marker is `{email}.{hex hmac-sha256}` and is
//! verified on every request; in `presence` mode any non-empty marker is
//! accepted.

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::str::FromStr;
use tracing::{debug, warn};

use lookupgate_core::{GatewayError, GatewayResult};

use crate::api::{ApiError, AppState};
use crate::store::UserStore;

type HmacSha256 = Hmac<Sha256>;

pub const SESSION_COOKIE: &str = "user";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionMode {
    /// HMAC-signed marker bound to the account email
    #[default]
    Signed,
    /// Any non-empty cookie value is a session
    Presence,
}

impl FromStr for SessionMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "signed" => Ok(SessionMode::Signed),
            "presence" => Ok(SessionMode::Presence),
            other => anyhow::bail!("unknown session mode '{}'", other),
        }
    }
}

/// Authenticated caller, attached to the request by [`require_session`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// Verified email (signed mode) or the raw marker (presence mode)
    pub user: String,
}

pub struct AuthGateway {
    users: UserStore,
    mode: SessionMode,
    keyed: HmacSha256,
}

impl AuthGateway {
    pub fn new(users: UserStore, mode: SessionMode, secret: Option<&str>) -> GatewayResult<Self> {
        let secret = match secret {
            Some(s) if !s.is_empty() => s.as_bytes().to_vec(),
            _ => {
                if mode == SessionMode::Signed {
                    warn!("No session secret configured, generating an ephemeral one");
                }
                let mut key = vec![0u8; 32];
                rand::thread_rng().fill_bytes(&mut key);
                key
            }
        };

        let keyed = <HmacSha256 as Mac>::new_from_slice(&secret)
            .map_err(|e| GatewayError::InvalidInput(format!("invalid session secret: {}", e)))?;

        Ok(Self { users, mode, keyed })
    }

    pub fn mode(&self) -> SessionMode {
        self.mode
    }

    pub fn users(&self) -> &UserStore {
        &self.users
    }

    pub async fn register(&self, email: &str, password: &str) -> GatewayResult<()> {
        self.users.register(email, password).await
    }

    /// Check credentials and return the session marker for the cookie.
    pub async fn login(&self, email: &str, password: &str) -> GatewayResult<String> {
        self.users.verify(email, password).await?;
        debug!(email = %email, "login succeeded");
        Ok(self.issue_marker(email))
    }

    pub fn issue_marker(&self, email: &str) -> String {
        match self.mode {
            SessionMode::Presence => email.to_string(),
            SessionMode::Signed => format!("{}.{}", email, hex::encode(self.sign(email))),
        }
    }

    pub fn authenticate(&self, marker: Option<&str>) -> GatewayResult<Session> {
        let marker = marker
            .filter(|m| !m.is_empty())
            .ok_or(GatewayError::AuthRequired)?;

        match self.mode {
            SessionMode::Presence => Ok(Session {
                user: marker.to_string(),
            }),
            SessionMode::Signed => {
                let (email, signature) =
                    marker.rsplit_once('.').ok_or(GatewayError::AuthRequired)?;
                let signature = hex::decode(signature).map_err(|_| GatewayError::AuthRequired)?;
                // verify_slice compares in constant time
                self.mac(email)
                    .verify_slice(&signature)
                    .map_err(|_| GatewayError::AuthRequired)?;
                Ok(Session {
                    user: email.to_string(),
                })
            }
        }
    }

    /// `Set-Cookie` value carrying `marker`
    pub fn session_cookie(marker: &str) -> String {
        format!("{}={}; Path=/; HttpOnly; SameSite=Lax", SESSION_COOKIE, marker)
    }

    fn mac(&self, email: &str) -> HmacSha256 {
        let mut mac = self.keyed.clone();
        mac.update(email.as_bytes());
        mac
    }

    fn sign(&self, email: &str) -> Vec<u8> {
        self.mac(email).finalize().into_bytes().to_vec()
    }
}

/// Value of cookie `name` from the request headers
pub fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|raw| raw.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.trim_matches('"').to_string())
}

/// Session of the current request, if any
pub fn current_session(state: &AppState, headers: &HeaderMap) -> GatewayResult<Session> {
    let marker = cookie_value(headers, SESSION_COOKIE);
    state.auth.authenticate(marker.as_deref())
}

/// Rejects requests without a valid session cookie with 401
pub async fn require_session(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    match current_session(&state, req.headers()) {
        Ok(session) => {
            req.extensions_mut().insert(session);
            Ok(next.run(req).await)
        }
        Err(e) => {
            debug!(path = %req.uri().path(), "rejected unauthenticated request");
            Err(ApiError::from_lookup(e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use tempfile::TempDir;

    fn gateway(dir: &TempDir, mode: SessionMode) -> AuthGateway {
        let users = UserStore::open(dir.path().join("usuarios.json")).unwrap();
        AuthGateway::new(users, mode, Some("test-secret")).unwrap()
    }

    #[tokio::test]
    async fn test_signed_login_round() {
        let dir = TempDir::new().unwrap();
        let auth = gateway(&dir, SessionMode::Signed);

        auth.register("ana@example.com", "pw").await.unwrap();
        let marker = auth.login("ana@example.com", "pw").await.unwrap();
        assert!(marker.starts_with("ana@example.com."));

        let session = auth.authenticate(Some(&marker)).unwrap();
        assert_eq!(session.user, "ana@example.com");

        assert!(matches!(
            auth.login("ana@example.com", "nope").await,
            Err(GatewayError::InvalidCredentials)
        ));
    }

    #[tokio::test]
    async fn test_signed_rejects_forgery() {
        let dir = TempDir::new().unwrap();
        let auth = gateway(&dir, SessionMode::Signed);
        let marker = auth.issue_marker("ana@example.com");

        // Unsigned bare email
        assert!(auth.authenticate(Some("ana@example.com")).is_err());
        assert!(auth.authenticate(Some("")).is_err());
        assert!(auth.authenticate(None).is_err());

        let forged = marker.replacen("ana@", "bob@", 1);
        assert!(auth.authenticate(Some(&forged)).is_err());

        let other_key = AuthGateway::new(auth.users().clone(), SessionMode::Signed, Some("other")).unwrap();
        assert!(other_key.authenticate(Some(&marker)).is_err());
    }

    #[tokio::test]
    async fn test_presence_mode() {
        let dir = TempDir::new().unwrap();
        let auth = gateway(&dir, SessionMode::Presence);

        assert_eq!(auth.issue_marker("ana@example.com"), "ana@example.com");
        assert_eq!(auth.authenticate(Some("anything")).unwrap().user, "anything");
        assert!(matches!(
            auth.authenticate(Some("")),
            Err(GatewayError::AuthRequired)
        ));
    }

    #[test]
    fn test_cookie_value() {
        let mut headers = HeaderMap::new();
        headers.append(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; user=ana@example.com.abcd"),
        );
        headers.append(header::COOKIE, HeaderValue::from_static("other=1"));

        assert_eq!(
            cookie_value(&headers, "user").as_deref(),
            Some("ana@example.com.abcd")
        );
        assert_eq!(cookie_value(&headers, "other").as_deref(), Some("1"));
        assert_eq!(cookie_value(&headers, "missing"), None);
    }

    #[test]
    fn test_session_mode_parse() {
        assert_eq!("SIGNED".parse::<SessionMode>().unwrap(), SessionMode::Signed);
        assert_eq!(
            "presence".parse::<SessionMode>().unwrap(),
            SessionMode::Presence
        );
        assert!("jwt".parse::<SessionMode>().is_err());
        assert_eq!(
            AuthGateway::session_cookie("x"),
            "user=x; Path=/; HttpOnly; SameSite=Lax"
        );
    }
}
