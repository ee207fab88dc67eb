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

//! Server-rendered HTML for the login, register and docs pages.

use lookupgate_core::{escape_html, ApiVersion};

fn layout(title: &str, body: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="pt-BR">
<head>
  <meta charset="utf-8">
  <meta name="viewport" content="width=device-width, initial-scale=1">
  <title>{title}</title>
  <link rel="stylesheet" href="/static/style.css">
</head>
<body>
<main>
{body}
</main>
</body>
</html>
"#,
        title = escape_html(title),
        body = body,
    )
}

fn error_banner(error: Option<&str>) -> String {
    match error {
        Some(msg) => format!(r#"<p class="erro">{}</p>"#, escape_html(msg)),
        None => String::new(),
    }
}

fn credentials_form(action: &str, submit: &str) -> String {
    format!(
        r#"<form method="post" action="{action}">
  <label>Email <input type="email" name="email" required></label>
  <label>Senha <input type="password" name="senha" required></label>
  <button type="submit">{submit}</button>
</form>"#
    )
}

pub fn login_page(error: Option<&str>) -> String {
    let body = format!(
        "<h1>Entrar</h1>\n{}\n{}\n<p><a href=\"/cadastro\">Criar conta</a></p>",
        error_banner(error),
        credentials_form("/login", "Entrar"),
    );
    layout("Login", &body)
}

pub fn register_page(error: Option<&str>) -> String {
    let body = format!(
        "<h1>Cadastro</h1>\n{}\n{}\n<p><a href=\"/\">Já tenho conta</a></p>",
        error_banner(error),
        credentials_form("/cadastro", "Cadastrar"),
    );
    layout("Cadastro", &body)
}

fn endpoint_list(prefix: &str, version: ApiVersion) -> String {
    version
        .allowed()
        .iter()
        .map(|t| format!("  <li><code>GET {}/{}/{{dado}}</code></li>\n", prefix, t))
        .collect()
}

pub fn docs_page(user: &str) -> String {
    let body = format!(
        r#"<h1>Documentação da API</h1>
<p>Sessão: <strong>{user}</strong></p>
<h2>v1</h2>
<ul>
{v1}</ul>
<h2>v2</h2>
<ul>
{v2}</ul>
<h2>Externa</h2>
<ul>
  <li><code>GET /free/whois/{{dominio}}</code></li>
  <li><code>GET /free/ddd/{{ddd}}</code></li>
</ul>
<p>Respostas são JSON. Falhas trazem o campo <code>erro</code>.</p>"#,
        user = escape_html(user),
        v1 = endpoint_list("/free/v1", ApiVersion::V1),
        v2 = endpoint_list("/free/v2", ApiVersion::V2),
    );
    layout("Docs API", &body)
}
