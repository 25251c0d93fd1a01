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

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use itertools::Itertools;
use tierfs_common::util::tier::TierAssoc;

use crate::error::{MetaError, MetaResult};
use crate::model::{Block, BlockId, WorkerId, UNKNOWN_BLOCK_LENGTH};
use crate::storage::{BlockInfoEntry, DeleteBlockEntry, JournalBatch};

/// The block registry: block id → record, plus the set of blocks with no
/// live replica. Registry membership is index-level and lock-free for
/// readers; a record's fields change only under that record's own lock.
pub struct BlockManager {
    blocks: DashMap<BlockId, Arc<Block>>,
    lost_blocks: DashSet<BlockId>,
    tiers: TierAssoc,
}

impl BlockManager {
    pub fn new(tiers: TierAssoc) -> Self {
        Self {
            blocks: DashMap::new(),
            lost_blocks: DashSet::new(),
            tiers,
        }
    }

    pub fn get(&self, block_id: BlockId) -> Option<Arc<Block>> {
        self.blocks.get(&block_id).map(|e| e.value().clone())
    }

    pub fn contains(&self, block_id: BlockId) -> bool {
        self.blocks.contains_key(&block_id)
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn lost_block_count(&self) -> usize {
        self.lost_blocks.len()
    }

    pub fn is_lost(&self, block_id: BlockId) -> bool {
        self.lost_blocks.contains(&block_id)
    }

    /// Snapshot of all known block ids. Not synchronized with concurrent
    /// inserts or deletes.
    pub fn block_ids(&self) -> Vec<BlockId> {
        self.blocks.iter().map(|e| *e.key()).collect_vec()
    }

    /// Fetch the record for `block_id`, creating it with `length` if absent.
    /// Returns whether this call created it. The caller owning a stale `Arc`
    /// must [`Self::confirm`] after locking, since a concurrent delete may
    /// have removed the record from the registry in between.
    pub fn get_or_insert(&self, block_id: BlockId, length: u64) -> (Arc<Block>, bool) {
        match self.blocks.entry(block_id) {
            Entry::Occupied(e) => (e.get().clone(), false),
            Entry::Vacant(v) => {
                let block = Arc::new(Block::new(block_id, length));
                v.insert(block.clone());
                (block, true)
            }
        }
    }

    /// Whether `block` is still the registry's record for `block_id`.
    pub fn confirm(&self, block_id: BlockId, block: &Arc<Block>) -> bool {
        self.blocks
            .get(&block_id)
            .map(|e| Arc::ptr_eq(e.value(), block))
            .unwrap_or(false)
    }

    /// Record a block with a known length: insert if absent, upgrade if the
    /// length was unknown, otherwise leave it alone. Appends a journal entry
    /// iff the record actually changed.
    pub async fn commit_known(&self, block_id: BlockId, length: u64, batch: &mut JournalBatch) {
        loop {
            let (block, created) = self.get_or_insert(block_id, length);
            if created {
                // No replica yet: the block counts as lost until a worker
                // reports a location.
                self.lost_blocks.insert(block_id);
                batch.append(BlockInfoEntry { block_id, length });
                return;
            }
            let mut meta = block.lock().await;
            if !self.confirm(block_id, &block) {
                continue;
            }
            if meta.try_set_length(length) {
                batch.append(BlockInfoEntry { block_id, length });
            } else if length != UNKNOWN_BLOCK_LENGTH && meta.length != length {
                tracing::warn!(
                    "block {} committed with length {} but is already {} bytes, ignoring",
                    block_id,
                    length,
                    meta.length
                );
            }
            return;
        }
    }

    /// Add a replica location. Returns false if the block is unknown, which
    /// the caller treats as an orphan to reclaim.
    pub async fn add_location(&self, block_id: BlockId, worker_id: WorkerId, tier: &str) -> bool {
        loop {
            let Some(block) = self.get(block_id) else {
                return false;
            };
            let mut meta = block.lock().await;
            if !self.confirm(block_id, &block) {
                continue;
            }
            meta.locations.insert(worker_id, tier.to_string());
            self.lost_blocks.remove(&block_id);
            return true;
        }
    }

    /// Drop a replica location. A block left with no replica joins the
    /// lost-blocks set.
    pub async fn remove_location(&self, block_id: BlockId, worker_id: WorkerId) {
        loop {
            let Some(block) = self.get(block_id) else {
                return;
            };
            let mut meta = block.lock().await;
            if !self.confirm(block_id, &block) {
                continue;
            }
            if meta.locations.remove(&worker_id).is_some() && meta.locations.is_empty() {
                self.lost_blocks.insert(block_id);
            }
            return;
        }
    }

    /// The workers currently holding the block.
    pub async fn locations(&self, block_id: BlockId) -> Vec<WorkerId> {
        match self.get(block_id) {
            Some(block) => block.lock().await.locations.keys().copied().collect_vec(),
            None => vec![],
        }
    }

    /// Atomically remove the block from the registry. Returns the replica
    /// holders at removal time, or `None` if the block was already gone.
    pub async fn purge(&self, block_id: BlockId, batch: &mut JournalBatch) -> Option<Vec<WorkerId>> {
        loop {
            let block = self.get(block_id)?;
            let meta = block.lock().await;
            if !self.confirm(block_id, &block) {
                continue;
            }
            let holders = meta.locations.keys().copied().collect_vec();
            self.blocks.remove(&block_id);
            self.lost_blocks.remove(&block_id);
            batch.append(DeleteBlockEntry { block_id });
            return Some(holders);
        }
    }

    /// Length and replica pairs of a block, ordered fastest tier first (ties
    /// keep worker-id order).
    pub async fn snapshot(&self, block_id: BlockId) -> MetaResult<(u64, Vec<(WorkerId, String)>)> {
        let block = self
            .get(block_id)
            .ok_or(MetaError::BlockNotFound(block_id))?;
        let meta = block.lock().await;
        let pairs = meta
            .locations
            .iter()
            .map(|(&worker_id, tier)| (worker_id, tier.clone()))
            .sorted_by_key(|(_, tier)| self.tiers.ordinal(tier))
            .collect_vec();
        Ok((meta.length, pairs))
    }

    /// Drop a block from the lost set after a replica add.
    pub fn clear_lost(&self, block_id: BlockId) {
        self.lost_blocks.remove(&block_id);
    }

    /// Mark blocks as lost regardless of their current replica count.
    pub fn report_lost(&self, block_ids: &[BlockId]) {
        for &block_id in block_ids {
            self.lost_blocks.insert(block_id);
        }
    }

    /// One `BlockInfoEntry` per block, for snapshot export.
    pub async fn snapshot_entries(&self) -> Vec<crate::storage::JournalEntry> {
        let blocks = self.blocks.iter().map(|e| e.value().clone()).collect_vec();
        let mut entries = Vec::with_capacity(blocks.len());
        for block in blocks {
            let length = block.lock().await.length;
            entries.push(
                BlockInfoEntry {
                    block_id: block.id(),
                    length,
                }
                .into(),
            );
        }
        entries
    }

    /// Replay: insert or overwrite the length. A replayed block has no
    /// replicas until its workers register again, so it starts out lost.
    pub async fn apply_block_info(&self, entry: &BlockInfoEntry) {
        let (block, created) = self.get_or_insert(entry.block_id, entry.length);
        if created {
            self.lost_blocks.insert(entry.block_id);
        } else {
            block.lock().await.length = entry.length;
        }
    }

    /// Replay: drop the block.
    pub fn apply_delete(&self, block_id: BlockId) {
        self.blocks.remove(&block_id);
        self.lost_blocks.remove(&block_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> BlockManager {
        BlockManager::new(TierAssoc::new(&["MEM".into(), "SSD".into(), "HDD".into()]))
    }

    #[tokio::test]
    async fn test_lost_block_tracks_replica_count() {
        let blocks = manager();
        let mut batch = JournalBatch::default();
        blocks.commit_known(7, 1024, &mut batch).await;
        assert_eq!(batch.len(), 1);
        // No replica reported yet.
        assert!(blocks.is_lost(7));

        assert!(blocks.add_location(7, 42, "MEM").await);
        assert!(!blocks.is_lost(7));

        blocks.remove_location(7, 42).await;
        assert!(blocks.is_lost(7));

        // A replica coming back clears the lost mark.
        assert!(blocks.add_location(7, 43, "SSD").await);
        assert!(!blocks.is_lost(7));
    }

    #[tokio::test]
    async fn test_commit_known_journals_only_changes() {
        let blocks = manager();
        let mut batch = JournalBatch::default();
        blocks
            .commit_known(7, UNKNOWN_BLOCK_LENGTH, &mut batch)
            .await;
        blocks.commit_known(7, 500, &mut batch).await;
        // Repeats and mismatches change nothing.
        blocks.commit_known(7, 500, &mut batch).await;
        blocks.commit_known(7, 9999, &mut batch).await;
        assert_eq!(batch.len(), 2);
        assert_eq!(blocks.snapshot(7).await.unwrap().0, 500);
    }

    #[tokio::test]
    async fn test_snapshot_orders_by_tier() {
        let blocks = manager();
        let mut batch = JournalBatch::default();
        blocks.commit_known(7, 1024, &mut batch).await;
        blocks.add_location(7, 3, "HDD").await;
        blocks.add_location(7, 1, "MEM").await;
        blocks.add_location(7, 2, "SSD").await;

        let (length, pairs) = blocks.snapshot(7).await.unwrap();
        assert_eq!(length, 1024);
        assert_eq!(
            pairs,
            vec![
                (1, "MEM".to_string()),
                (2, "SSD".to_string()),
                (3, "HDD".to_string())
            ]
        );
    }

    #[tokio::test]
    async fn test_purge_reports_holders() {
        let blocks = manager();
        let mut batch = JournalBatch::default();
        blocks.commit_known(7, 1024, &mut batch).await;
        blocks.add_location(7, 42, "MEM").await;

        let mut batch = JournalBatch::default();
        let holders = blocks.purge(7, &mut batch).await.unwrap();
        assert_eq!(holders, vec![42]);
        assert_eq!(batch.len(), 1);
        assert!(!blocks.contains(7));
        assert!(!blocks.is_lost(7));
        assert!(blocks.purge(7, &mut batch).await.is_none());
    }

    #[tokio::test]
    async fn test_unknown_block_location_is_orphan() {
        let blocks = manager();
        assert!(!blocks.add_location(99, 42, "MEM").await);
    }
}
