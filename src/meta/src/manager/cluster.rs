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

use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use dashmap::DashMap;
use itertools::Itertools;
use rand::Rng;
use tierfs_common::util::addr::HostAddress;

use super::block::BlockManager;
use crate::error::{MetaError, MetaResult};
use crate::model::{BlockId, Command, Worker, WorkerId};

#[derive(Clone, Debug)]
pub struct WorkerKey(pub HostAddress);

impl PartialEq<Self> for WorkerKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq(&other.0)
    }
}
impl Eq for WorkerKey {}

impl Hash for WorkerKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.host.hash(state);
        self.0.port.hash(state);
    }
}

/// One of the three worker sets, dual-indexed by id and by address. Both
/// indexes always hold the same records.
struct WorkerSet {
    by_id: DashMap<WorkerId, Arc<Worker>>,
    by_addr: DashMap<WorkerKey, Arc<Worker>>,
}

impl WorkerSet {
    fn new() -> Self {
        Self {
            by_id: DashMap::new(),
            by_addr: DashMap::new(),
        }
    }

    fn insert(&self, worker: Arc<Worker>) {
        self.by_addr
            .insert(WorkerKey(worker.address().clone()), worker.clone());
        self.by_id.insert(worker.id(), worker);
    }

    fn remove(&self, worker_id: WorkerId) -> Option<Arc<Worker>> {
        let (_, worker) = self.by_id.remove(&worker_id)?;
        self.by_addr.remove(&WorkerKey(worker.address().clone()));
        Some(worker)
    }

    fn remove_by_addr(&self, address: &HostAddress) -> Option<Arc<Worker>> {
        let (_, worker) = self.by_addr.remove(&WorkerKey(address.clone()))?;
        self.by_id.remove(&worker.id());
        Some(worker)
    }

    fn get_by_id(&self, worker_id: WorkerId) -> Option<Arc<Worker>> {
        self.by_id.get(&worker_id).map(|e| e.value().clone())
    }

    fn get_by_addr(&self, address: &HostAddress) -> Option<Arc<Worker>> {
        self.by_addr
            .get(&WorkerKey(address.clone()))
            .map(|e| e.value().clone())
    }

    fn contains_id(&self, worker_id: WorkerId) -> bool {
        self.by_id.contains_key(&worker_id)
    }

    fn len(&self) -> usize {
        self.by_id.len()
    }

    fn workers(&self) -> Vec<Arc<Worker>> {
        self.by_id.iter().map(|e| e.value().clone()).collect_vec()
    }
}

/// The worker registry. A worker id is minted into `temp`, promoted to
/// `active` on registration, demoted to `lost` on timeout and revived from
/// there if the worker returns; records are never destroyed. Lookups read
/// the indexes directly; cross-set moves serialize on `membership` so the
/// sets stay disjoint.
pub struct ClusterManager {
    active: WorkerSet,
    lost: WorkerSet,
    temp: WorkerSet,
    membership: parking_lot::Mutex<()>,
}

impl Default for ClusterManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ClusterManager {
    pub fn new() -> Self {
        Self {
            active: WorkerSet::new(),
            lost: WorkerSet::new(),
            temp: WorkerSet::new(),
            membership: parking_lot::Mutex::new(()),
        }
    }

    /// Resolve an address to a worker id, minting a fresh one if the address
    /// has never been seen. Registration spans two calls (`get_worker_id`
    /// then `register_worker`); a freshly minted id parks in `temp` so
    /// concurrent lookups find a record while the worker is not yet active.
    pub fn get_worker_id(&self, address: HostAddress) -> WorkerId {
        let _guard = self.membership.lock();
        if let Some(worker) = self.active.get_by_addr(&address) {
            return worker.id();
        }
        if let Some(worker) = self.temp.remove_by_addr(&address) {
            worker.touch();
            self.active.insert(worker.clone());
            return worker.id();
        }
        if let Some(worker) = self.lost.remove_by_addr(&address) {
            worker.touch();
            tracing::info!("worker {} at {} has returned", worker.id(), address);
            self.active.insert(worker.clone());
            return worker.id();
        }

        let worker_id = self.mint_id();
        tracing::info!("assigned worker id {} to {}", worker_id, address);
        self.temp.insert(Arc::new(Worker::new(worker_id, address)));
        worker_id
    }

    fn mint_id(&self) -> WorkerId {
        let mut rng = rand::thread_rng();
        loop {
            let candidate = rng.gen_range(0..i64::MAX) as WorkerId;
            if !self.active.contains_id(candidate)
                && !self.lost.contains_id(candidate)
                && !self.temp.contains_id(candidate)
            {
                return candidate;
            }
        }
    }

    /// Install the worker's tier layout and resident blocks. Blocks the
    /// worker no longer reports are treated as a removal batch; reported
    /// blocks the registry does not know are scheduled for reclamation.
    pub async fn register_worker(
        &self,
        blocks: &BlockManager,
        worker_id: WorkerId,
        tiers: Vec<String>,
        capacity_by_tier: HashMap<String, u64>,
        used_by_tier: HashMap<String, u64>,
        blocks_by_tier: HashMap<String, Vec<BlockId>>,
    ) -> MetaResult<()> {
        let worker = match self.active.get_by_id(worker_id) {
            Some(worker) => {
                tracing::warn!("worker {} registered again", worker_id);
                worker
            }
            None => {
                let _guard = self.membership.lock();
                // Re-check under the membership lock: a concurrent
                // `get_worker_id` may have promoted the record already.
                match self.active.get_by_id(worker_id) {
                    Some(worker) => worker,
                    None => {
                        let worker = self
                            .temp
                            .remove(worker_id)
                            .ok_or(MetaError::NoWorker(worker_id))?;
                        self.active.insert(worker.clone());
                        worker
                    }
                }
            }
        };
        worker.touch();

        for alias in capacity_by_tier.keys() {
            if !tiers.contains(alias) {
                tracing::warn!(
                    "worker {} reported capacity on undeclared tier {}",
                    worker_id,
                    alias
                );
            }
        }

        let mut meta = worker.lock().await;
        meta.capacity_by_tier = capacity_by_tier.into_iter().collect();
        meta.used_by_tier = used_by_tier.into_iter().collect();

        let reported: HashSet<BlockId> = blocks_by_tier.values().flatten().copied().collect();
        let removed = meta.blocks.difference(&reported).copied().collect_vec();
        for block_id in removed {
            meta.blocks.remove(&block_id);
            blocks.remove_location(block_id, worker_id).await;
        }
        for (tier, block_ids) in &blocks_by_tier {
            for &block_id in block_ids {
                if blocks.add_location(block_id, worker_id, tier).await {
                    meta.blocks.insert(block_id);
                } else {
                    tracing::warn!(
                        "worker {} reported unknown block {}, scheduling removal",
                        worker_id,
                        block_id
                    );
                    meta.pending_free.push(block_id);
                }
            }
        }
        tracing::info!(
            "worker {} registered with {} blocks on {} tiers",
            worker_id,
            meta.blocks.len(),
            meta.capacity_by_tier.len()
        );
        Ok(())
    }

    /// Apply a heartbeat. An id the active set does not know is answered
    /// with `Register` rather than an error; everything else updates the
    /// worker's usage and block deltas and drains its pending frees.
    pub async fn heartbeat(
        &self,
        blocks: &BlockManager,
        worker_id: WorkerId,
        used_by_tier: HashMap<String, u64>,
        removed_blocks: Vec<BlockId>,
        added_blocks_by_tier: HashMap<String, Vec<BlockId>>,
    ) -> Command {
        tracing::trace!(target: "events::meta::worker_heartbeat", worker_id, "receive heartbeat");
        let Some(worker) = self.active.get_by_id(worker_id) else {
            return Command::Register;
        };
        worker.touch();

        let mut meta = worker.lock().await;
        for block_id in removed_blocks {
            meta.blocks.remove(&block_id);
            blocks.remove_location(block_id, worker_id).await;
        }
        for (tier, block_ids) in &added_blocks_by_tier {
            for &block_id in block_ids {
                if blocks.add_location(block_id, worker_id, tier).await {
                    meta.blocks.insert(block_id);
                } else {
                    tracing::warn!(
                        "worker {} added unknown block {}, scheduling removal",
                        worker_id,
                        block_id
                    );
                    meta.pending_free.push(block_id);
                }
            }
        }
        meta.used_by_tier = used_by_tier.into_iter().collect();

        if meta.pending_free.is_empty() {
            Command::Nothing
        } else {
            Command::Free(std::mem::take(&mut meta.pending_free))
        }
    }

    /// Demote an active worker and strip its replica locations, which may
    /// push blocks into the lost set. The record survives for revival.
    pub async fn mark_lost(&self, blocks: &BlockManager, worker: &Arc<Worker>) {
        {
            let _guard = self.membership.lock();
            match self.active.remove(worker.id()) {
                Some(worker) => self.lost.insert(worker),
                // Already moved by a concurrent sweep.
                None => return,
            }
        }
        let meta = worker.lock().await;
        for &block_id in &meta.blocks {
            blocks.remove_location(block_id, worker.id()).await;
        }
    }

    /// One detector sweep: demote every active worker whose last heartbeat
    /// is older than `timeout_ms`. Returns the demoted workers.
    pub async fn detect_lost_workers(
        &self,
        blocks: &BlockManager,
        timeout_ms: i64,
        now_ms: i64,
    ) -> Vec<Arc<Worker>> {
        let mut newly_lost = Vec::new();
        for worker in self.active.workers() {
            let silent_ms = now_ms - worker.last_heartbeat_ms();
            if silent_ms > timeout_ms {
                tracing::warn!(
                    "worker {} at {} has not heartbeated for {}ms, marking lost",
                    worker.id(),
                    worker.address(),
                    silent_ms
                );
                self.mark_lost(blocks, &worker).await;
                newly_lost.push(worker);
            }
        }
        newly_lost
    }

    pub fn get_active(&self, worker_id: WorkerId) -> Option<Arc<Worker>> {
        self.active.get_by_id(worker_id)
    }

    pub fn active_workers(&self) -> Vec<Arc<Worker>> {
        self.active.workers()
    }

    pub fn lost_workers(&self) -> Vec<Arc<Worker>> {
        self.lost.workers()
    }

    pub fn active_worker_count(&self) -> usize {
        self.active.len()
    }

    pub fn lost_worker_count(&self) -> usize {
        self.lost.len()
    }

    pub fn temp_worker_count(&self) -> usize {
        self.temp.len()
    }
}

#[cfg(test)]
mod tests {
    use tierfs_common::util::tier::TierAssoc;

    use super::*;
    use crate::storage::JournalBatch;

    fn block_manager() -> BlockManager {
        BlockManager::new(TierAssoc::new(&["MEM".into(), "SSD".into(), "HDD".into()]))
    }

    fn addr(port: u16) -> HostAddress {
        HostAddress::new("127.0.0.1", port)
    }

    #[tokio::test]
    async fn test_worker_sets_stay_disjoint() {
        let cluster = ClusterManager::new();
        let blocks = block_manager();

        let worker_id = cluster.get_worker_id(addr(5000));
        assert_eq!(
            (1, 0, 0),
            (
                cluster.temp_worker_count(),
                cluster.active_worker_count(),
                cluster.lost_worker_count()
            )
        );

        cluster
            .register_worker(
                &blocks,
                worker_id,
                vec!["MEM".into()],
                HashMap::from([("MEM".into(), 1 << 30)]),
                HashMap::new(),
                HashMap::new(),
            )
            .await
            .unwrap();
        assert_eq!(
            (0, 1, 0),
            (
                cluster.temp_worker_count(),
                cluster.active_worker_count(),
                cluster.lost_worker_count()
            )
        );

        let worker = cluster.get_active(worker_id).unwrap();
        cluster.mark_lost(&blocks, &worker).await;
        assert_eq!(
            (0, 0, 1),
            (
                cluster.temp_worker_count(),
                cluster.active_worker_count(),
                cluster.lost_worker_count()
            )
        );

        // A returning worker keeps its id and address.
        assert_eq!(cluster.get_worker_id(addr(5000)), worker_id);
        assert_eq!(cluster.lost_worker_count(), 0);
        assert_eq!(cluster.active_worker_count(), 1);
    }

    #[tokio::test]
    async fn test_register_unknown_worker_fails() {
        let cluster = ClusterManager::new();
        let blocks = block_manager();
        let err = cluster
            .register_worker(
                &blocks,
                12345,
                vec![],
                HashMap::new(),
                HashMap::new(),
                HashMap::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, MetaError::NoWorker(12345)));
    }

    #[tokio::test]
    async fn test_heartbeat_from_unknown_worker_commands_register() {
        let cluster = ClusterManager::new();
        let blocks = block_manager();
        let command = cluster
            .heartbeat(&blocks, 777, HashMap::new(), vec![], HashMap::new())
            .await;
        assert_eq!(command, Command::Register);
    }

    #[tokio::test]
    async fn test_reregistration_diffs_resident_blocks() {
        let cluster = ClusterManager::new();
        let blocks = block_manager();
        let mut batch = JournalBatch::default();
        blocks.commit_known(1, 100, &mut batch).await;
        blocks.commit_known(2, 100, &mut batch).await;

        let worker_id = cluster.get_worker_id(addr(5000));
        cluster
            .register_worker(
                &blocks,
                worker_id,
                vec!["MEM".into()],
                HashMap::from([("MEM".into(), 1 << 30)]),
                HashMap::new(),
                HashMap::from([("MEM".into(), vec![1, 2])]),
            )
            .await
            .unwrap();
        assert!(!blocks.is_lost(1));
        assert!(!blocks.is_lost(2));

        // The worker comes back holding only block 2: block 1 is a removal.
        cluster
            .register_worker(
                &blocks,
                worker_id,
                vec!["MEM".into()],
                HashMap::from([("MEM".into(), 1 << 30)]),
                HashMap::new(),
                HashMap::from([("MEM".into(), vec![2])]),
            )
            .await
            .unwrap();
        assert!(blocks.is_lost(1));
        assert!(!blocks.is_lost(2));
    }

    #[tokio::test]
    async fn test_orphan_block_is_scheduled_for_removal() {
        let cluster = ClusterManager::new();
        let blocks = block_manager();

        let worker_id = cluster.get_worker_id(addr(5000));
        cluster
            .register_worker(
                &blocks,
                worker_id,
                vec!["MEM".into()],
                HashMap::from([("MEM".into(), 1 << 30)]),
                HashMap::new(),
                HashMap::from([("MEM".into(), vec![99])]),
            )
            .await
            .unwrap();

        // The orphan comes back as a free command on the next heartbeat.
        let command = cluster
            .heartbeat(&blocks, worker_id, HashMap::new(), vec![], HashMap::new())
            .await;
        assert_eq!(command, Command::Free(vec![99]));
        let command = cluster
            .heartbeat(&blocks, worker_id, HashMap::new(), vec![], HashMap::new())
            .await;
        assert_eq!(command, Command::Nothing);
    }

    #[tokio::test]
    async fn test_detector_demotes_silent_workers() {
        let cluster = ClusterManager::new();
        let blocks = block_manager();

        let worker_id = cluster.get_worker_id(addr(5000));
        cluster
            .register_worker(
                &blocks,
                worker_id,
                vec!["MEM".into()],
                HashMap::from([("MEM".into(), 1 << 30)]),
                HashMap::new(),
                HashMap::new(),
            )
            .await
            .unwrap();

        let now = crate::model::current_time_millis();
        // Still within the timeout: nothing happens.
        assert!(cluster
            .detect_lost_workers(&blocks, 10_000, now)
            .await
            .is_empty());
        // Far in the future: the worker is silent for too long.
        let lost = cluster
            .detect_lost_workers(&blocks, 10_000, now + 60_000)
            .await;
        assert_eq!(lost.len(), 1);
        assert_eq!(lost[0].id(), worker_id);
        assert_eq!(cluster.active_worker_count(), 0);
        assert_eq!(cluster.lost_worker_count(), 1);
    }
}
