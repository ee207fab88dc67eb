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

//! Append-only log of lookups, backed by `consultas.json`.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

use lookupgate_core::GatewayResult;

use super::actor::{JsonFile, StoreError};

/// Field names match the on-disk format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryLogEntry {
    pub ip: String,
    pub tipo: String,
    pub dado: String,
}

#[derive(Clone)]
pub struct QueryLog {
    file: JsonFile<QueryLogEntry>,
}

impl QueryLog {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Ok(Self {
            file: JsonFile::open(path)?,
        })
    }

    pub async fn record(&self, ip: &str, tipo: &str, dado: &str) -> GatewayResult<()> {
        debug!(ip, tipo, "recording query");
        self.file
            .append(QueryLogEntry {
                ip: ip.to_string(),
                tipo: tipo.to_string(),
                dado: dado.to_string(),
            })
            .await?;
        Ok(())
    }

    pub async fn entries(&self) -> GatewayResult<Vec<QueryLogEntry>> {
        Ok(self.file.snapshot().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_record_persists_in_order() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("consultas.json");
        let log = QueryLog::open(&path).unwrap();

        log.record("10.0.0.1", "cep", "01001000").await.unwrap();
        log.record("10.0.0.2", "whois", "example.com").await.unwrap();

        let entries = log.entries().await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].tipo, "cep");
        assert_eq!(entries[1].dado, "example.com");

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(
            raw[0],
            serde_json::json!({"ip": "10.0.0.1", "tipo": "cep", "dado": "01001000"})
        );
    }
}
