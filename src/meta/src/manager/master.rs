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

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use itertools::Itertools;
use tierfs_common::util::addr::HostAddress;
use tierfs_common::util::tier::TierAssoc;
use tokio::sync::oneshot::Sender;
use tokio::task::JoinHandle;

use super::block::BlockManager;
use super::cluster::ClusterManager;
use super::env::MasterEnv;
use super::id::ContainerIdGenerator;
use crate::error::{MetaError, MetaResult};
use crate::model::{
    current_time_millis, BlockId, BlockInfo, BlockLocation, Command, WorkerId, WorkerView,
    UNKNOWN_BLOCK_LENGTH,
};
use crate::storage::{journal_entry, BlockInfoEntry, JournalBatch, JournalEntry, JournalStore};

/// The block master: composes the block registry, the worker registry and
/// the container-id generator under one lock-ordering rule, and funnels
/// their state transitions into the journal.
///
/// Lock order is global: when a handler needs both a worker lock and a block
/// lock, the worker lock is acquired first. No handler holds two worker
/// locks or two block locks at once.
pub struct BlockMaster<S: JournalStore> {
    env: MasterEnv<S>,
    cluster: ClusterManager,
    blocks: BlockManager,
    container_ids: ContainerIdGenerator<S>,
}

pub type BlockMasterRef<S> = Arc<BlockMaster<S>>;

impl<S: JournalStore> BlockMaster<S> {
    pub fn new(env: MasterEnv<S>) -> Self {
        let tiers = TierAssoc::new(&env.opts().tier_aliases);
        let container_ids = ContainerIdGenerator::new(env.journal_ref());
        Self {
            env,
            cluster: ClusterManager::new(),
            blocks: BlockManager::new(tiers),
            container_ids,
        }
    }

    pub fn cluster(&self) -> &ClusterManager {
        &self.cluster
    }

    pub fn blocks(&self) -> &BlockManager {
        &self.blocks
    }

    /// Rebuild state from the journal. Called once before serving.
    pub async fn replay(&self) -> MetaResult<()> {
        let entries = self.env.journal().entries().await?;
        let count = entries.len();
        for entry in entries {
            match entry.entry {
                Some(journal_entry::Entry::ContainerIdGenerator(e)) => {
                    self.container_ids.apply(&e).await;
                }
                Some(journal_entry::Entry::BlockInfo(e)) => {
                    self.blocks.apply_block_info(&e).await;
                }
                Some(journal_entry::Entry::DeleteBlock(e)) => {
                    self.blocks.apply_delete(e.block_id);
                }
                None => {
                    return Err(MetaError::UnexpectedJournalEntry(
                        "entry carries no payload".to_string(),
                    ));
                }
            }
        }
        tracing::info!(
            "replayed {} journal entries into {} blocks",
            count,
            self.blocks.block_count()
        );
        self.refresh_metrics();
        Ok(())
    }

    /// Export the full state as a journal snapshot: the id reservation
    /// first, then one entry per block.
    pub async fn snapshot(&self) -> Vec<JournalEntry> {
        let mut entries = vec![crate::storage::ContainerIdEntry {
            next_container_id: self.container_ids.journaled_next().await,
        }
        .into()];
        entries.extend(self.blocks.snapshot_entries().await);
        entries
    }

    // ------------------------------ client RPCs ------------------------------

    pub async fn get_new_container_id(&self) -> MetaResult<u64> {
        self.container_ids.new_container_id().await
    }

    pub async fn get_block_info(&self, block_id: BlockId) -> MetaResult<BlockInfo> {
        self.check_available()?;
        self.block_info_view(block_id).await
    }

    /// Missing ids are silently skipped.
    pub async fn get_block_info_list(&self, block_ids: &[BlockId]) -> MetaResult<Vec<BlockInfo>> {
        let mut infos = Vec::with_capacity(block_ids.len());
        for &block_id in block_ids {
            match self.block_info_view(block_id).await {
                Ok(info) => infos.push(info),
                Err(MetaError::BlockNotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(infos)
    }

    pub async fn get_worker_info_list(&self) -> MetaResult<Vec<WorkerView>> {
        self.check_available()?;
        let mut views = Vec::new();
        for worker in self.cluster.active_workers() {
            views.push(worker.view().await);
        }
        Ok(views)
    }

    /// Lost workers, most recently heard from first.
    pub async fn get_lost_workers_info_list(&self) -> Vec<WorkerView> {
        let mut views = Vec::new();
        for worker in self.cluster.lost_workers() {
            views.push(worker.view().await);
        }
        views
            .into_iter()
            .sorted_by_key(|view| view.last_contact_secs)
            .collect_vec()
    }

    pub async fn get_capacity_bytes(&self) -> u64 {
        let mut total = 0;
        for worker in self.cluster.active_workers() {
            total += worker.lock().await.capacity_bytes();
        }
        total
    }

    pub async fn get_used_bytes(&self) -> u64 {
        let mut total = 0;
        for worker in self.cluster.active_workers() {
            total += worker.lock().await.used_bytes();
        }
        total
    }

    pub async fn get_total_bytes_on_tiers(&self) -> BTreeMap<String, u64> {
        let mut totals: BTreeMap<String, u64> = BTreeMap::new();
        for worker in self.cluster.active_workers() {
            for (tier, bytes) in &worker.lock().await.capacity_by_tier {
                *totals.entry(tier.clone()).or_default() += bytes;
            }
        }
        totals
    }

    pub async fn get_used_bytes_on_tiers(&self) -> BTreeMap<String, u64> {
        let mut totals: BTreeMap<String, u64> = BTreeMap::new();
        for worker in self.cluster.active_workers() {
            for (tier, bytes) in &worker.lock().await.used_by_tier {
                *totals.entry(tier.clone()).or_default() += bytes;
            }
        }
        totals
    }

    /// An under-filesystem commit: no worker is involved, the block may even
    /// have no length yet.
    pub async fn commit_block_in_ufs(&self, block_id: BlockId, length: u64) -> MetaResult<()> {
        let mut batch = JournalBatch::default();
        self.blocks.commit_known(block_id, length, &mut batch).await;
        self.write_journal(batch).await?;
        self.refresh_metrics();
        Ok(())
    }

    /// Remove blocks, optionally deleting their metadata. Every current
    /// holder is told to drop its replica via the next heartbeat.
    pub async fn remove_blocks(&self, block_ids: Vec<BlockId>, delete: bool) -> MetaResult<()> {
        let mut batch = JournalBatch::default();
        for block_id in block_ids {
            let holders = if delete {
                match self.blocks.purge(block_id, &mut batch).await {
                    Some(holders) => holders,
                    None => continue,
                }
            } else {
                self.blocks.locations(block_id).await
            };
            // Worker locks are taken here after a block lock was held above,
            // inverting the usual order. The relaxation is deliberate: the
            // block lock is already released, and (when deleting) the block
            // is unreachable through the registry, so no composite invariant
            // is left to protect.
            for worker_id in holders {
                if let Some(worker) = self.cluster.get_active(worker_id) {
                    worker.lock().await.pending_free.push(block_id);
                }
            }
        }
        self.write_journal(batch).await?;
        self.refresh_metrics();
        Ok(())
    }

    /// Collect the block ids failing `validator`; with `repair`, delete
    /// them. The id snapshot is unsynchronized, so each failing candidate is
    /// re-checked against the registry: a concurrently deleted block is not
    /// a validation failure.
    pub async fn validate_blocks(
        &self,
        validator: impl Fn(BlockId) -> bool,
        repair: bool,
    ) -> MetaResult<Vec<BlockId>> {
        let mut invalid = Vec::new();
        for block_id in self.blocks.block_ids() {
            if validator(block_id) {
                continue;
            }
            if !self.blocks.contains(block_id) {
                continue;
            }
            invalid.push(block_id);
        }
        if !invalid.is_empty() {
            tracing::warn!("{} invalid blocks found, repair={}", invalid.len(), repair);
            if repair {
                self.remove_blocks(invalid.clone(), true).await?;
            }
        }
        Ok(invalid)
    }

    pub fn report_lost_blocks(&self, block_ids: &[BlockId]) {
        self.blocks.report_lost(block_ids);
        self.refresh_metrics();
    }

    pub fn get_block_count(&self) -> usize {
        self.blocks.block_count()
    }

    pub fn get_lost_block_count(&self) -> usize {
        self.blocks.lost_block_count()
    }

    // ------------------------------ worker RPCs ------------------------------

    pub fn get_worker_id(&self, address: HostAddress) -> WorkerId {
        let worker_id = self.cluster.get_worker_id(address);
        self.refresh_metrics();
        worker_id
    }

    pub async fn worker_register(
        &self,
        worker_id: WorkerId,
        tiers: Vec<String>,
        capacity_by_tier: HashMap<String, u64>,
        used_by_tier: HashMap<String, u64>,
        blocks_by_tier: HashMap<String, Vec<BlockId>>,
    ) -> MetaResult<()> {
        self.cluster
            .register_worker(
                &self.blocks,
                worker_id,
                tiers,
                capacity_by_tier,
                used_by_tier,
                blocks_by_tier,
            )
            .await?;
        self.refresh_metrics();
        Ok(())
    }

    pub async fn worker_heartbeat(
        &self,
        worker_id: WorkerId,
        used_by_tier: HashMap<String, u64>,
        removed_blocks: Vec<BlockId>,
        added_blocks_by_tier: HashMap<String, Vec<BlockId>>,
    ) -> Command {
        let command = self
            .cluster
            .heartbeat(
                &self.blocks,
                worker_id,
                used_by_tier,
                removed_blocks,
                added_blocks_by_tier,
            )
            .await;
        self.refresh_metrics();
        command
    }

    /// A worker commits a block it now holds. Journals the block iff it is
    /// new to the registry or its length was just learned.
    pub async fn commit_block(
        &self,
        worker_id: WorkerId,
        used_bytes_on_tier: u64,
        tier: String,
        block_id: BlockId,
        length: u64,
    ) -> MetaResult<()> {
        let worker = self
            .cluster
            .get_active(worker_id)
            .ok_or(MetaError::NoWorker(worker_id))?;
        // Worker lock first, then the block lock.
        let mut worker_meta = worker.lock().await;
        let mut batch = JournalBatch::default();
        loop {
            let (block, created) = self.blocks.get_or_insert(block_id, length);
            let mut block_meta = block.lock().await;
            if !self.blocks.confirm(block_id, &block) {
                // Lost the race against a delete; take a fresh record.
                continue;
            }
            let mut changed = created;
            if !created {
                if block_meta.try_set_length(length) {
                    changed = true;
                } else if length != UNKNOWN_BLOCK_LENGTH && block_meta.length != length {
                    tracing::warn!(
                        "worker {} committed block {} with length {} but it is already {} bytes, ignoring",
                        worker_id,
                        block_id,
                        length,
                        block_meta.length
                    );
                }
            }
            block_meta.locations.insert(worker_id, tier.clone());
            self.blocks.clear_lost(block_id);
            worker_meta.blocks.insert(block_id);
            worker_meta
                .used_by_tier
                .insert(tier.clone(), used_bytes_on_tier);
            worker.touch();
            if changed {
                batch.append(BlockInfoEntry {
                    block_id,
                    length: block_meta.length,
                });
            }
            // Flushed before the locks drop, so the durable order for this
            // block matches its commit order.
            self.write_journal(batch).await?;
            break;
        }
        self.refresh_metrics();
        Ok(())
    }

    // ---------------------------- lost-worker detector ----------------------------

    /// One sweep of the detector, driven by the caller's clock.
    pub async fn detect_lost_workers(&self, now_ms: i64) {
        let timeout_ms = self.env.opts().worker_timeout.as_millis() as i64;
        self.cluster
            .detect_lost_workers(&self.blocks, timeout_ms, now_ms)
            .await;
        self.refresh_metrics();
    }

    pub async fn start_lost_worker_checker(
        master: BlockMasterRef<S>,
        check_interval: Duration,
    ) -> (JoinHandle<()>, Sender<()>) {
        let (shutdown_tx, mut shutdown_rx) = tokio::sync::oneshot::channel();
        let join_handle = tokio::spawn(async move {
            let mut min_interval = tokio::time::interval(check_interval);
            min_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    // Wait for interval
                    _ = min_interval.tick() => {},
                    // Shutdown
                    _ = &mut shutdown_rx => {
                        tracing::info!("Lost worker checker is stopped");
                        return;
                    }
                }
                master.detect_lost_workers(current_time_millis()).await;
            }
        });
        (join_handle, shutdown_tx)
    }

    // ------------------------------ internals ------------------------------

    async fn block_info_view(&self, block_id: BlockId) -> MetaResult<BlockInfo> {
        let (length, pairs) = self.blocks.snapshot(block_id).await?;
        let locations = pairs
            .into_iter()
            .filter_map(|(worker_id, tier_alias)| {
                self.cluster.get_active(worker_id).map(|worker| BlockLocation {
                    worker_id,
                    address: worker.address().clone(),
                    tier_alias,
                })
            })
            .collect();
        Ok(BlockInfo {
            block_id,
            length,
            locations,
        })
    }

    fn check_available(&self) -> MetaResult<()> {
        if self.env.is_in_safe_mode() {
            return Err(MetaError::unavailable("the master is in safe mode"));
        }
        Ok(())
    }

    async fn write_journal(&self, batch: JournalBatch) -> MetaResult<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let entries = batch.len() as u64;
        self.env.journal().write(batch).await?;
        self.env.metrics().journal_entry_count.inc_by(entries);
        Ok(())
    }

    fn refresh_metrics(&self) {
        let metrics = self.env.metrics();
        metrics
            .worker_num
            .with_label_values(&["active"])
            .set(self.cluster.active_worker_count() as i64);
        metrics
            .worker_num
            .with_label_values(&["lost"])
            .set(self.cluster.lost_worker_count() as i64);
        metrics
            .worker_num
            .with_label_values(&["temp"])
            .set(self.cluster.temp_worker_count() as i64);
        metrics.block_num.set(self.blocks.block_count() as i64);
        metrics
            .lost_block_num
            .set(self.blocks.lost_block_count() as i64);
    }
}
