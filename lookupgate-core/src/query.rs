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

//! Lookup categories and the per-route allow-lists.

use crate::error::{GatewayError, GatewayResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lookup category understood by the chat responder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryType {
    Cpf,
    Nome,
    Cnpj,
    Cep,
    Telefone,
    Ddd,
    Ip,
    Email,
    Rg,
    Whois,
}

impl QueryType {
    pub const ALL: [QueryType; 10] = [
        QueryType::Cpf,
        QueryType::Nome,
        QueryType::Cnpj,
        QueryType::Cep,
        QueryType::Telefone,
        QueryType::Ddd,
        QueryType::Ip,
        QueryType::Email,
        QueryType::Rg,
        QueryType::Whois,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            QueryType::Cpf => "cpf",
            QueryType::Nome => "nome",
            QueryType::Cnpj => "cnpj",
            QueryType::Cep => "cep",
            QueryType::Telefone => "telefone",
            QueryType::Ddd => "ddd",
            QueryType::Ip => "ip",
            QueryType::Email => "email",
            QueryType::Rg => "rg",
            QueryType::Whois => "whois",
        }
    }

    /// Command text posted into the responder channel
    pub fn command(self, value: &str) -> String {
        format!("/{} {}", self.as_str(), value)
    }
}

impl fmt::Display for QueryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueryType {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        QueryType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| GatewayError::InvalidQueryType(s.to_string()))
    }
}

/// Versioned chat lookup surface. Each version exposes its own allow-list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiVersion {
    V1,
    V2,
}

impl ApiVersion {
    pub fn allowed(self) -> &'static [QueryType] {
        use QueryType::*;
        match self {
            ApiVersion::V1 => &[Cnpj, Cep, Telefone, Ddd, Ip, Email, Whois],
            ApiVersion::V2 => &[Cpf, Nome, Cnpj, Cep, Telefone, Ddd, Ip, Email, Rg, Whois],
        }
    }

    /// Parse `raw` and check it against this version's allow-list.
    pub fn resolve(self, raw: &str) -> GatewayResult<QueryType> {
        let query_type: QueryType = raw.parse()?;
        if self.allowed().contains(&query_type) {
            Ok(query_type)
        } else {
            Err(GatewayError::InvalidQueryType(raw.to_string()))
        }
    }
}

/// Query types answered by third-party REST services instead of the chat responder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExternalKind {
    Whois,
    Ddd,
}

impl FromStr for ExternalKind {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "whois" => Ok(ExternalKind::Whois),
            "ddd" => Ok(ExternalKind::Ddd),
            other => Err(GatewayError::InvalidQueryType(other.to_string())),
        }
    }
}
