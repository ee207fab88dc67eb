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

//! Third-party REST lookups (`whois`, `ddd`).

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use lookupgate_core::{ExternalKind, GatewayError, GatewayResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalConfig {
    #[serde(default = "default_whois_base_url")]
    pub whois_base_url: String,

    #[serde(default = "default_ddd_base_url")]
    pub ddd_base_url: String,

    /// apilayer key sent as the `apikey` header on whois lookups
    #[serde(default)]
    pub api_layer_key: Option<String>,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_whois_base_url() -> String {
    "https://api.apilayer.com/whois/query".to_string()
}

fn default_ddd_base_url() -> String {
    "https://brasilapi.com.br/api/ddd/v1".to_string()
}

fn default_request_timeout() -> u64 {
    15
}

impl Default for ExternalConfig {
    fn default() -> Self {
        Self {
            whois_base_url: default_whois_base_url(),
            ddd_base_url: default_ddd_base_url(),
            api_layer_key: None,
            request_timeout_secs: default_request_timeout(),
        }
    }
}

pub struct ExternalLookup {
    client: reqwest::Client,
    config: ExternalConfig,
}

impl ExternalLookup {
    pub fn new(config: ExternalConfig) -> GatewayResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self { client, config })
    }

    /// Fetch `value` from the service behind `kind` and return its JSON body
    /// unchanged. The upstream status code is not inspected.
    pub async fn lookup(&self, kind: ExternalKind, value: &str) -> GatewayResult<serde_json::Value> {
        let request = match kind {
            ExternalKind::Whois => {
                let mut request = self
                    .client
                    .get(&self.config.whois_base_url)
                    .query(&[("domain", value)]);
                match &self.config.api_layer_key {
                    Some(key) => request = request.header("apikey", key),
                    None => warn!("whois lookup without API_LAYER_KEY"),
                }
                request
            }
            ExternalKind::Ddd => self.client.get(self.ddd_url(value)?),
        };

        let response = request.send().await?;
        debug!(?kind, status = %response.status(), "external lookup answered");

        let body = response.text().await?;
        serde_json::from_str(&body).map_err(GatewayError::from)
    }

    /// `value` becomes exactly one percent-encoded path segment.
    fn ddd_url(&self, value: &str) -> GatewayResult<reqwest::Url> {
        let mut url = reqwest::Url::parse(&self.config.ddd_base_url)
            .map_err(|e| GatewayError::transport(format!("invalid ddd base URL: {}", e)))?;
        url.path_segments_mut()
            .map_err(|()| GatewayError::transport("ddd base URL cannot take a path"))?
            .pop_if_empty()
            .push(value);
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        extract::{Path, Query},
        http::HeaderMap,
        routing::get,
        Json, Router,
    };
    use std::collections::HashMap;

    async fn spawn_upstream() -> String {
        let app = Router::new()
            .route(
                "/whois",
                get(
                    |Query(q): Query<HashMap<String, String>>, headers: HeaderMap| async move {
                        Json(serde_json::json!({
                            "domain": q.get("domain"),
                            "apikey": headers.get("apikey").and_then(|v| v.to_str().ok()),
                        }))
                    },
                ),
            )
            .route(
                "/ddd/:code",
                get(|Path(code): Path<String>| async move {
                    if code == "00" {
                        (
                            axum::http::StatusCode::NOT_FOUND,
                            Json(serde_json::json!({"message": "DDD não encontrado"})),
                        )
                    } else {
                        (
                            axum::http::StatusCode::OK,
                            Json(serde_json::json!({"state": "SP", "cities": ["SAO PAULO"]})),
                        )
                    }
                }),
            )
            .route(
                "/echo/:code",
                get(|Path(code): Path<String>| async move {
                    Json(serde_json::json!({ "code": code }))
                }),
            )
            .route("/broken/:code", get(|| async { "<html>oops</html>" }));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn lookup(base: &str, key: Option<&str>, ddd_path: &str) -> ExternalLookup {
        ExternalLookup::new(ExternalConfig {
            whois_base_url: format!("{}/whois", base),
            ddd_base_url: format!("{}/{}", base, ddd_path),
            api_layer_key: key.map(String::from),
            request_timeout_secs: 5,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_whois_sends_domain_and_key() {
        let base = spawn_upstream().await;
        let adapter = lookup(&base, Some("k-123"), "ddd");

        let body = adapter
            .lookup(ExternalKind::Whois, "example.com")
            .await
            .unwrap();
        assert_eq!(body["domain"], "example.com");
        assert_eq!(body["apikey"], "k-123");
    }

    #[tokio::test]
    async fn test_ddd_returns_body_verbatim() {
        let base = spawn_upstream().await;
        let adapter = lookup(&base, None, "ddd/");

        let body = adapter.lookup(ExternalKind::Ddd, "11").await.unwrap();
        assert_eq!(body, serde_json::json!({"state": "SP", "cities": ["SAO PAULO"]}));

        // Error statuses still yield the upstream JSON
        let body = adapter.lookup(ExternalKind::Ddd, "00").await.unwrap();
        assert_eq!(body["message"], "DDD não encontrado");
    }

    #[tokio::test]
    async fn test_ddd_value_stays_one_path_segment() {
        let base = spawn_upstream().await;
        let adapter = lookup(&base, None, "echo");

        let body = adapter
            .lookup(ExternalKind::Ddd, "../whois?domain=evil.com")
            .await
            .unwrap();
        assert_eq!(body, serde_json::json!({"code": "../whois?domain=evil.com"}));

        let url = adapter.ddd_url("11 #x").unwrap();
        assert_eq!(url.path(), "/echo/11%20%23x");
        assert_eq!(url.query(), None);
    }

    #[tokio::test]
    async fn test_non_json_is_transport_error() {
        let base = spawn_upstream().await;
        let adapter = lookup(&base, None, "broken");

        let err = adapter.lookup(ExternalKind::Ddd, "11").await.unwrap_err();
        assert!(err.is_transport());
    }

    #[tokio::test]
    async fn test_unreachable_upstream() {
        let adapter = lookup("http://127.0.0.1:1", None, "ddd");
        let err = adapter.lookup(ExternalKind::Ddd, "11").await.unwrap_err();
        assert!(matches!(err, GatewayError::Transport(_)));
    }
}
