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
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{Html, IntoResponse, Response},
    Form,
};
use lookupgate_core::GatewayError;
use serde::Deserialize;
use tracing::{info, warn};

use crate::api::{ApiError, AppState};
use crate::auth::{current_session, AuthGateway};
use crate::pages;

/// Body of the login and register forms
#[derive(Debug, Deserialize)]
pub struct CredentialsForm {
    pub email: String,
    pub senha: String,
}

fn found(location: &str) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location.to_string())]).into_response()
}

/// GET /
pub async fn login_form() -> Html<String> {
    Html(pages::login_page(None))
}

/// POST /login
pub async fn login_submit(State(state): State<AppState>, Form(form): Form<CredentialsForm>) -> Response {
    match state.auth.login(&form.email, &form.senha).await {
        Ok(marker) => {
            info!(email = %form.email, "user logged in");
            (
                StatusCode::FOUND,
                [
                    (header::LOCATION, "/docs-api".to_string()),
                    (header::SET_COOKIE, AuthGateway::session_cookie(&marker)),
                ],
            )
                .into_response()
        }
        Err(GatewayError::InvalidCredentials) => {
            warn!(email = %form.email, "login rejected");
            Html(pages::login_page(Some("Credenciais inválidas"))).into_response()
        }
        Err(e) => ApiError::from_lookup(e).into_response(),
    }
}

/// GET /cadastro
pub async fn register_form() -> Html<String> {
    Html(pages::register_page(None))
}

/// POST /cadastro
pub async fn register_submit(
    State(state): State<AppState>,
    Form(form): Form<CredentialsForm>,
) -> Response {
    match state.auth.register(&form.email, &form.senha).await {
        Ok(()) => found("/"),
        Err(GatewayError::AlreadyExists(_)) => {
            Html(pages::register_page(Some("Usuário já cadastrado"))).into_response()
        }
        Err(GatewayError::InvalidInput(msg)) => {
            Html(pages::register_page(Some(&msg))).into_response()
        }
        Err(e) => ApiError::from_lookup(e).into_response(),
    }
}

/// GET /docs-api
pub async fn docs(State(state): State<AppState>, headers: HeaderMap) -> Response {
    match current_session(&state, &headers) {
        Ok(session) => Html(pages::docs_page(&session.user)).into_response(),
        Err(_) => found("/"),
    }
}
