// Copyright 2025 TierFS Labs
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use prost::bytes::Buf;
use prost::Message;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use super::{JournalBatch, JournalEntry, JournalStore};
use crate::error::{MetaError, MetaResult};

/// A single append-only log file of length-delimited entry frames. Each
/// batch is appended as one contiguous write and synced before the call
/// returns. Segmentation and replication are an embedder's concern.
pub struct FileJournal {
    path: PathBuf,
    file: Mutex<File>,
}

impl FileJournal {
    pub async fn open(path: impl AsRef<Path>) -> MetaResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| {
                MetaError::unavailable(format!(
                    "failed to open journal {}: {}",
                    path.display(),
                    e
                ))
            })?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl JournalStore for FileJournal {
    async fn write(&self, batch: JournalBatch) -> MetaResult<()> {
        let mut buf = Vec::new();
        for entry in batch.into_entries() {
            buf.extend(entry.encode_length_delimited_to_vec());
        }
        let mut file = self.file.lock().await;
        file.write_all(&buf)
            .await
            .map_err(|e| MetaError::unavailable(format!("journal write failed: {}", e)))?;
        file.sync_data()
            .await
            .map_err(|e| MetaError::unavailable(format!("journal sync failed: {}", e)))?;
        Ok(())
    }

    async fn entries(&self) -> MetaResult<Vec<JournalEntry>> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => {
                return Err(MetaError::unavailable(format!(
                    "failed to read journal {}: {}",
                    self.path.display(),
                    e
                )))
            }
        };
        let mut buf = bytes.as_slice();
        let mut entries = Vec::new();
        while buf.has_remaining() {
            entries.push(JournalEntry::decode_length_delimited(&mut buf)?);
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{BlockInfoEntry, DeleteBlockEntry};

    #[tokio::test]
    async fn test_append_and_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal");

        {
            let journal = FileJournal::open(&path).await.unwrap();
            let mut batch = JournalBatch::default();
            batch.append(BlockInfoEntry {
                block_id: 7,
                length: 1024,
            });
            journal.write(batch).await.unwrap();

            let mut batch = JournalBatch::default();
            batch.append(DeleteBlockEntry { block_id: 7 });
            journal.write(batch).await.unwrap();
        }

        // Reopening sees both batches in write order.
        let journal = FileJournal::open(&path).await.unwrap();
        let entries = journal.entries().await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(
            entries[0],
            BlockInfoEntry {
                block_id: 7,
                length: 1024
            }
            .into()
        );
        assert_eq!(entries[1], DeleteBlockEntry { block_id: 7 }.into());
    }

    #[tokio::test]
    async fn test_empty_journal() {
        let dir = tempfile::tempdir().unwrap();
        let journal = FileJournal::open(dir.path().join("journal")).await.unwrap();
        assert!(journal.entries().await.unwrap().is_empty());
    }
}
