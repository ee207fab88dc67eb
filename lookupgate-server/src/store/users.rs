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

//! Credential store backed by `usuarios.json`.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;
use tracing::info;

use lookupgate_core::{GatewayError, GatewayResult};

use super::actor::{JsonFile, StoreError};

/// One registered account. Field names match the on-disk format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub email: String,
    /// Hex SHA-256 digest of the password
    pub senha: String,
}

pub fn hash_password(password: &str) -> String {
    hex::encode(Sha256::digest(password.as_bytes()))
}

#[derive(Clone)]
pub struct UserStore {
    file: JsonFile<UserRecord>,
}

impl UserStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Ok(Self {
            file: JsonFile::open(path)?,
        })
    }

    /// Add an account. The existence check and the write happen in one step.
    pub async fn register(&self, email: &str, password: &str) -> GatewayResult<()> {
        if email.trim().is_empty() || password.is_empty() {
            return Err(GatewayError::InvalidInput(
                "email e senha são obrigatórios".to_string(),
            ));
        }

        let record = UserRecord {
            email: email.to_string(),
            senha: hash_password(password),
        };
        self.file
            .update(move |users| {
                if users.iter().any(|u| u.email == record.email) {
                    return Err(GatewayError::AlreadyExists(record.email));
                }
                users.push(record);
                Ok(())
            })
            .await??;

        info!(email = %email, "user registered");
        Ok(())
    }

    pub async fn exists(&self, email: &str) -> GatewayResult<bool> {
        let email = email.to_string();
        Ok(self
            .file
            .read(move |users| users.iter().any(|u| u.email == email))
            .await?)
    }

    /// Succeeds iff a record matches both email and password digest.
    pub async fn verify(&self, email: &str, password: &str) -> GatewayResult<()> {
        let email = email.to_string();
        let digest = hash_password(password);
        let found = self
            .file
            .read(move |users| users.iter().any(|u| u.email == email && u.senha == digest))
            .await?;

        if found {
            Ok(())
        } else {
            Err(GatewayError::InvalidCredentials)
        }
    }

    pub async fn count(&self) -> GatewayResult<usize> {
        Ok(self.file.len().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_hash_password() {
        assert_eq!(
            hash_password("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[tokio::test]
    async fn test_register_and_verify() {
        let dir = TempDir::new().unwrap();
        let store = UserStore::open(dir.path().join("usuarios.json")).unwrap();

        store.register("ana@example.com", "s3nha").await.unwrap();
        assert!(store.exists("ana@example.com").await.unwrap());
        store.verify("ana@example.com", "s3nha").await.unwrap();

        assert!(matches!(
            store.verify("ana@example.com", "wrong").await,
            Err(GatewayError::InvalidCredentials)
        ));
        assert!(matches!(
            store.verify("bob@example.com", "s3nha").await,
            Err(GatewayError::InvalidCredentials)
        ));
    }

    #[tokio::test]
    async fn test_register_twice() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("usuarios.json");
        let store = UserStore::open(&path).unwrap();

        store.register("ana@example.com", "one").await.unwrap();
        match store.register("ana@example.com", "two").await {
            Err(GatewayError::AlreadyExists(email)) => assert_eq!(email, "ana@example.com"),
            other => panic!("expected AlreadyExists, got {:?}", other),
        }
        assert_eq!(store.count().await.unwrap(), 1);

        // Password stays the first one
        store.verify("ana@example.com", "one").await.unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        let on_disk: Vec<UserRecord> = serde_json::from_str(&raw).unwrap();
        assert_eq!(on_disk[0].senha, hash_password("one"));
    }

    #[tokio::test]
    async fn test_register_rejects_blank() {
        let dir = TempDir::new().unwrap();
        let store = UserStore::open(dir.path().join("usuarios.json")).unwrap();

        assert!(matches!(
            store.register("  ", "x").await,
            Err(GatewayError::InvalidInput(_))
        ));
        assert!(matches!(
            store.register("a@b.c", "").await,
            Err(GatewayError::InvalidInput(_))
        ));
        assert_eq!(store.count().await.unwrap(), 0);
    }
}
