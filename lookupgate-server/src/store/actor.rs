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

//! Single-writer JSON array files.
//!
//! Each file is owned by one task that holds the records in memory and
//! persists every accepted mutation with an atomic write (temp file +
//! rename, previous version kept as `.bak`). Handles talk to the task over
//! an mpsc queue, so read-modify-write sequences never interleave.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use lookupgate_core::GatewayError;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON in {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Store task for {0} has stopped")]
    Closed(PathBuf),
}

impl From<StoreError> for GatewayError {
    fn from(e: StoreError) -> Self {
        GatewayError::Storage(e.to_string())
    }
}

/// Serialized records waiting to be written, plus what to do once the write
/// has finished (commit or roll back the in-memory change)
struct Commit<T> {
    bytes: Vec<u8>,
    done: Box<dyn FnOnce(&mut Vec<T>, Result<(), StoreError>) + Send>,
}

type Job<T> = Box<dyn FnOnce(&mut Vec<T>) -> Option<Commit<T>> + Send>;
type Reply<R> = oneshot::Sender<Result<R, StoreError>>;

/// Handle to a JSON array file owned by a writer task
pub struct JsonFile<T> {
    sender: mpsc::Sender<Job<T>>,
    path: PathBuf,
}

impl<T> Clone for JsonFile<T> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            path: self.path.clone(),
        }
    }
}

impl<T> JsonFile<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + 'static,
{
    /// Load (or create as `[]`) the file at `path` and spawn its writer task.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let records = load_or_init::<T>(&path)?;
        info!("Loaded {} records from {:?}", records.len(), path);

        let (sender, receiver) = mpsc::channel::<Job<T>>(CHANNEL_CAPACITY);
        tokio::spawn(run_writer(records, receiver, path.clone()));

        Ok(Self { sender, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn submit<R: Send + 'static>(
        &self,
        build: impl FnOnce(Reply<R>) -> Job<T>,
    ) -> Result<R, StoreError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(build(tx))
            .await
            .map_err(|_| StoreError::Closed(self.path.clone()))?;

        rx.await.map_err(|_| StoreError::Closed(self.path.clone()))?
    }

    /// Run `f` against the current records without modifying them.
    pub async fn read<R, F>(&self, f: F) -> Result<R, StoreError>
    where
        R: Send + 'static,
        F: FnOnce(&[T]) -> R + Send + 'static,
    {
        self.submit(move |tx| {
            let job: Job<T> = Box::new(move |records: &mut Vec<T>| {
                let _ = tx.send(Ok(f(records)));
                None
            });
            job
        })
        .await
    }

    /// Apply `f` to a copy of the records and persist the copy if `f`
    /// succeeds. On error neither memory nor disk changes.
    pub async fn update<R, E, F>(&self, f: F) -> Result<Result<R, E>, StoreError>
    where
        R: Send + 'static,
        E: Send + 'static,
        F: FnOnce(&mut Vec<T>) -> Result<R, E> + Send + 'static,
    {
        self.submit(move |tx| {
            let job: Job<T> = Box::new(move |records: &mut Vec<T>| {
                let mut next = records.clone();
                let value = match f(&mut next) {
                    Ok(value) => value,
                    Err(e) => {
                        let _ = tx.send(Ok(Err(e)));
                        return None;
                    }
                };
                let bytes = match serde_json::to_vec_pretty(&next) {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        let _ = tx.send(Err(e.into()));
                        return None;
                    }
                };
                Some(Commit {
                    bytes,
                    done: Box::new(move |records: &mut Vec<T>, written: Result<(), StoreError>| {
                        let outcome = written.map(|()| {
                            *records = next;
                            Ok(value)
                        });
                        let _ = tx.send(outcome);
                    }),
                })
            });
            job
        })
        .await
    }

    /// Push one record and persist. The record is removed again if the
    /// write fails.
    pub async fn append(&self, record: T) -> Result<(), StoreError> {
        self.submit(move |tx| {
            let job: Job<T> = Box::new(move |records: &mut Vec<T>| {
                records.push(record);
                match serde_json::to_vec_pretty(&*records) {
                    Ok(bytes) => Some(Commit {
                        bytes,
                        done: Box::new(move |records: &mut Vec<T>, written: Result<(), StoreError>| {
                            if written.is_err() {
                                records.pop();
                            }
                            let _ = tx.send(written);
                        }),
                    }),
                    Err(e) => {
                        records.pop();
                        let _ = tx.send(Err(e.into()));
                        None
                    }
                }
            });
            job
        })
        .await
    }

    pub async fn len(&self) -> Result<usize, StoreError> {
        self.read(|records| records.len()).await
    }

    pub async fn snapshot(&self) -> Result<Vec<T>, StoreError> {
        self.read(|records| records.to_vec()).await
    }
}

/// Owns the records; file writes run on the blocking pool, one at a time.
async fn run_writer<T: Send + 'static>(
    mut records: Vec<T>,
    mut receiver: mpsc::Receiver<Job<T>>,
    path: PathBuf,
) {
    while let Some(job) = receiver.recv().await {
        let Some(Commit { bytes, done }) = job(&mut records) else {
            continue;
        };
        let target = path.clone();
        let written = match tokio::task::spawn_blocking(move || write_atomic(&target, &bytes)).await
        {
            Ok(result) => result,
            Err(e) => Err(StoreError::Io(std::io::Error::other(e))),
        };
        if let Err(e) = &written {
            warn!("Failed to persist {:?}: {}", path, e);
        }
        done(&mut records, written);
    }
    debug!("Store task for {:?} finished", path);
}

fn load_or_init<T: Serialize + DeserializeOwned>(path: &Path) -> Result<Vec<T>, StoreError> {
    if !path.exists() {
        info!("{:?} not found, creating empty file", path);
        write_atomic(path, b"[]")?;
        return Ok(Vec::new());
    }

    let file = File::open(path)?;
    let reader = BufReader::new(file);
    match serde_json::from_reader(reader) {
        Ok(records) => Ok(records),
        Err(source) => {
            let backup = path.with_extension("json.bak");
            if backup.exists() {
                warn!("{:?} is corrupt ({}), trying backup {:?}", path, source, backup);
                let file = File::open(&backup)?;
                if let Ok(records) = serde_json::from_reader(BufReader::new(file)) {
                    return Ok(records);
                }
            }
            Err(StoreError::Corrupt {
                path: path.to_path_buf(),
                source,
            })
        }
    }
}

/// Temp file + rename, keeping the previous version as `.bak`
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    if path.exists() {
        let backup_path = path.with_extension("json.bak");
        if let Err(e) = fs::copy(path, &backup_path) {
            warn!("Failed to back up {:?}: {}", path, e);
        }
    }

    let temp_path = path.with_extension("json.tmp");
    {
        let file = File::create(&temp_path)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(bytes)?;
        writer.flush()?;
    }

    fs::rename(&temp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::TempDir;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Row {
        n: u32,
    }

    #[tokio::test]
    async fn test_creates_empty_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rows.json");

        let file: JsonFile<Row> = JsonFile::open(&path).unwrap();
        assert_eq!(file.len().await.unwrap(), 0);
        assert_eq!(fs::read_to_string(&path).unwrap().trim(), "[]");
    }

    #[tokio::test]
    async fn test_concurrent_appends_not_lost() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rows.json");
        let file: JsonFile<Row> = JsonFile::open(&path).unwrap();

        let tasks: Vec<_> = (0..50)
            .map(|n| {
                let file = file.clone();
                tokio::spawn(async move { file.append(Row { n }).await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(file.len().await.unwrap(), 50);
        let on_disk: Vec<Row> = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(on_disk.len(), 50);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn test_failed_update_changes_nothing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rows.json");
        let file: JsonFile<Row> = JsonFile::open(&path).unwrap();
        file.append(Row { n: 1 }).await.unwrap();

        let outcome = file
            .update(|rows| {
                rows.push(Row { n: 2 });
                Err::<(), _>("rejected")
            })
            .await
            .unwrap();
        assert_eq!(outcome, Err("rejected"));
        assert_eq!(file.snapshot().await.unwrap(), vec![Row { n: 1 }]);
    }

    #[tokio::test]
    async fn test_failed_append_is_rolled_back() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rows.json");
        let file: JsonFile<Row> = JsonFile::open(&path).unwrap();
        file.append(Row { n: 1 }).await.unwrap();

        // A directory where the temp file should go makes the write fail
        let temp_path = path.with_extension("json.tmp");
        fs::create_dir(&temp_path).unwrap();
        assert!(file.append(Row { n: 2 }).await.is_err());
        assert_eq!(file.snapshot().await.unwrap(), vec![Row { n: 1 }]);

        fs::remove_dir(&temp_path).unwrap();
        file.append(Row { n: 3 }).await.unwrap();
        assert_eq!(file.snapshot().await.unwrap(), vec![Row { n: 1 }, Row { n: 3 }]);
        let on_disk: Vec<Row> = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(on_disk, vec![Row { n: 1 }, Row { n: 3 }]);
    }

    #[tokio::test]
    async fn test_reload_and_corrupt_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rows.json");
        {
            let file: JsonFile<Row> = JsonFile::open(&path).unwrap();
            file.append(Row { n: 7 }).await.unwrap();
        }

        let reopened: JsonFile<Row> = JsonFile::open(&path).unwrap();
        assert_eq!(reopened.snapshot().await.unwrap(), vec![Row { n: 7 }]);

        let bad = dir.path().join("bad.json");
        fs::write(&bad, "{not json").unwrap();
        assert!(matches!(
            JsonFile::<Row>::open(&bad),
            Err(StoreError::Corrupt { .. })
        ));
    }
}
