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

use async_trait::async_trait;

use crate::error::MetaResult;

/// Advances the container-id generator: ids below `next_container_id` are
/// reserved and may be handed out without further journaling.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ContainerIdEntry {
    #[prost(uint64, tag = "1")]
    pub next_container_id: u64,
}

/// Creates a block or upgrades its length.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct BlockInfoEntry {
    #[prost(uint64, tag = "1")]
    pub block_id: u64,
    #[prost(uint64, tag = "2")]
    pub length: u64,
}

/// Removes a block from the registry.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DeleteBlockEntry {
    #[prost(uint64, tag = "1")]
    pub block_id: u64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct JournalEntry {
    #[prost(oneof = "journal_entry::Entry", tags = "1, 2, 3")]
    pub entry: ::core::option::Option<journal_entry::Entry>,
}

pub mod journal_entry {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Entry {
        #[prost(message, tag = "1")]
        ContainerIdGenerator(super::ContainerIdEntry),
        #[prost(message, tag = "2")]
        BlockInfo(super::BlockInfoEntry),
        #[prost(message, tag = "3")]
        DeleteBlock(super::DeleteBlockEntry),
    }
}

impl From<ContainerIdEntry> for JournalEntry {
    fn from(e: ContainerIdEntry) -> Self {
        JournalEntry {
            entry: Some(journal_entry::Entry::ContainerIdGenerator(e)),
        }
    }
}

impl From<BlockInfoEntry> for JournalEntry {
    fn from(e: BlockInfoEntry) -> Self {
        JournalEntry {
            entry: Some(journal_entry::Entry::BlockInfo(e)),
        }
    }
}

impl From<DeleteBlockEntry> for JournalEntry {
    fn from(e: DeleteBlockEntry) -> Self {
        JournalEntry {
            entry: Some(journal_entry::Entry::DeleteBlock(e)),
        }
    }
}

/// Entries buffered by a single handler. A batch is written atomically: on
/// replay either the whole bundle is present or none of it. A batch that is
/// dropped without being written leaves no trace in the log.
#[derive(Debug, Default)]
pub struct JournalBatch {
    entries: Vec<JournalEntry>,
}

impl JournalBatch {
    pub fn append(&mut self, entry: impl Into<JournalEntry>) {
        self.entries.push(entry.into());
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn into_entries(self) -> Vec<JournalEntry> {
        self.entries
    }
}

impl From<Vec<JournalEntry>> for JournalBatch {
    fn from(entries: Vec<JournalEntry>) -> Self {
        Self { entries }
    }
}

/// Where journal entries go. Implementations decide the physical encoding;
/// the contract is that `entries` returns everything previously written, in
/// write order, so replaying it reconstructs identical semantic state.
#[async_trait]
pub trait JournalStore: Send + Sync + 'static {
    /// Append a batch. Entries are durable when this returns. A failed write
    /// must leave no partial batch visible to `entries`.
    async fn write(&self, batch: JournalBatch) -> MetaResult<()>;

    /// All entries in write order, for replay.
    async fn entries(&self) -> MetaResult<Vec<JournalEntry>>;
}

#[cfg(test)]
mod tests {
    use prost::Message;

    use super::*;

    #[test]
    fn test_entry_roundtrip() {
        let entry: JournalEntry = BlockInfoEntry {
            block_id: 7,
            length: 1024,
        }
        .into();
        let bytes = entry.encode_to_vec();
        let decoded = JournalEntry::decode(bytes.as_slice()).unwrap();
        assert_eq!(entry, decoded);
    }

    #[test]
    fn test_batch_collects_in_order() {
        let mut batch = JournalBatch::default();
        batch.append(BlockInfoEntry {
            block_id: 1,
            length: 10,
        });
        batch.append(DeleteBlockEntry { block_id: 1 });
        assert_eq!(batch.len(), 2);
        let entries = batch.into_entries();
        assert!(matches!(
            entries[0].entry,
            Some(journal_entry::Entry::BlockInfo(_))
        ));
        assert!(matches!(
            entries[1].entry,
            Some(journal_entry::Entry::DeleteBlock(_))
        ));
    }
}
