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

use axum::{
    extract::{ConnectInfo, Path, State},
    http::HeaderMap,
    Extension, Json,
};
use lookupgate_core::{ApiVersion, ExternalKind};
use serde::Serialize;
use std::net::SocketAddr;
use tracing::{debug, info};

use crate::api::{ApiError, AppState};
use crate::auth::Session;

/// Successful chat lookup
#[derive(Debug, Serialize)]
pub struct LookupEnvelope {
    pub tipo: String,
    pub dado: String,
    pub resposta: String,
    pub criador: String,
    pub site: String,
    pub telegram: String,
}

/// Successful external lookup
#[derive(Debug, Serialize)]
pub struct ExternalEnvelope {
    pub criador: String,
    pub site: String,
    pub resultado: serde_json::Value,
}

/// Source address of the caller: first `X-Forwarded-For` hop, then
/// `X-Real-IP`, then the socket peer.
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    if let Some(forwarded) = headers.get("X-Forwarded-For") {
        if let Ok(forwarded_str) = forwarded.to_str() {
            if let Some(first_ip) = forwarded_str.split(',').next() {
                let first_ip = first_ip.trim();
                if !first_ip.is_empty() {
                    return first_ip.to_string();
                }
            }
        }
    }

    if let Some(real_ip) = headers.get("X-Real-IP") {
        if let Ok(ip_str) = real_ip.to_str() {
            if !ip_str.trim().is_empty() {
                return ip_str.trim().to_string();
            }
        }
    }

    peer.map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

async fn chat_lookup(
    state: AppState,
    version: ApiVersion,
    session: Session,
    ip: String,
    tipo: String,
    dado: String,
) -> Result<Json<LookupEnvelope>, ApiError> {
    let query_type = version.resolve(&tipo).map_err(ApiError::from_lookup)?;

    state
        .query_log
        .record(&ip, query_type.as_str(), &dado)
        .await
        .map_err(ApiError::from_lookup)?;

    debug!(user = %session.user, ?version, tipo = %query_type, "dispatching lookup");
    let answer = state
        .correlator
        .lookup(query_type, &dado)
        .await
        .map_err(ApiError::from_lookup)?;
    info!(tipo = %query_type, ip = %ip, "lookup answered");

    Ok(Json(LookupEnvelope {
        tipo: answer.query_type.to_string(),
        dado: answer.value,
        resposta: answer.answer,
        criador: state.branding.criador.clone(),
        site: state.branding.site.clone(),
        telegram: state.branding.telegram.clone(),
    }))
}

/// GET /free/v1/:tipo/:dado
pub async fn lookup_v1(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Path((tipo, dado)): Path<(String, String)>,
) -> Result<Json<LookupEnvelope>, ApiError> {
    let ip = client_ip(&headers, peer.map(|ConnectInfo(addr)| addr));
    chat_lookup(state, ApiVersion::V1, session, ip, tipo, dado).await
}

/// GET /free/v2/:tipo/:dado
pub async fn lookup_v2(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Path((tipo, dado)): Path<(String, String)>,
) -> Result<Json<LookupEnvelope>, ApiError> {
    let ip = client_ip(&headers, peer.map(|ConnectInfo(addr)| addr));
    chat_lookup(state, ApiVersion::V2, session, ip, tipo, dado).await
}

/// GET /free/:tipo/:valor
///
/// The query is logged before the type is checked.
pub async fn external_lookup(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Path((tipo, valor)): Path<(String, String)>,
) -> Result<Json<ExternalEnvelope>, ApiError> {
    let ip = client_ip(&headers, peer.map(|ConnectInfo(addr)| addr));
    state
        .query_log
        .record(&ip, &tipo, &valor)
        .await
        .map_err(ApiError::from_external)?;

    let kind: ExternalKind = tipo.parse().map_err(ApiError::from_external)?;
    debug!(user = %session.user, ?kind, "external lookup");

    let resultado = state
        .external
        .lookup(kind, &valor)
        .await
        .map_err(ApiError::from_external)?;

    Ok(Json(ExternalEnvelope {
        criador: state.branding.criador.clone(),
        site: state.branding.site.clone(),
        resultado,
    }))
}
