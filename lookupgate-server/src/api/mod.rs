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

pub mod health;
pub mod lookup;
pub mod pages;

pub use health::health_check;
pub use lookup::{client_ip, external_lookup, lookup_v1, lookup_v2};
pub use pages::{docs, login_form, login_submit, register_form, register_submit};

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use lookupgate_core::{Correlator, GatewayError};
use serde::Serialize;
use std::sync::Arc;

use crate::auth::AuthGateway;
use crate::config::BrandingConfig;
use crate::external::ExternalLookup;
use crate::store::QueryLog;

/// API error type. The display text is the `erro` field of the JSON body.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Acesso negado. Faça login.")]
    Unauthorized,

    #[error("{0}")]
    BadRequest(String),

    #[error("Sem resposta final após aguardar")]
    GatewayTimeout,

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    /// Map a failure of the chat lookup path
    pub fn from_lookup(e: GatewayError) -> Self {
        match e {
            GatewayError::InvalidQueryType(_) => ApiError::BadRequest("Tipo inválido".to_string()),
            GatewayError::Transport(cause) => {
                ApiError::Internal(format!("Erro ao enviar consulta: {}", cause))
            }
            other => Self::common(other),
        }
    }

    /// Map a failure of the external adapter path
    pub fn from_external(e: GatewayError) -> Self {
        match e {
            GatewayError::InvalidQueryType(_) => {
                ApiError::BadRequest("Tipo externo inválido".to_string())
            }
            GatewayError::Transport(cause) => ApiError::Internal(format!("Erro externo: {}", cause)),
            other => Self::common(other),
        }
    }

    fn common(e: GatewayError) -> Self {
        match e {
            GatewayError::AuthRequired => ApiError::Unauthorized,
            GatewayError::NoResponseTimeout(_) => ApiError::GatewayTimeout,
            GatewayError::InvalidInput(msg) => ApiError::BadRequest(msg),
            GatewayError::Storage(msg) => ApiError::Internal(msg),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::GatewayTimeout => StatusCode::GATEWAY_TIMEOUT,
            ApiError::Internal(msg) => {
                tracing::error!("Request failed: {}", msg);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        (status, Json(ErrorResponse { erro: self.to_string() })).into_response()
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    erro: String,
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub correlator: Correlator,
    pub external: Arc<ExternalLookup>,
    pub auth: Arc<AuthGateway>,
    pub query_log: QueryLog,
    pub branding: Arc<BrandingConfig>,
}
