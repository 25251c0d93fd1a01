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

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::SystemTime;

use tierfs_common::util::addr::HostAddress;
use tokio::sync::{Mutex, MutexGuard};

use super::{BlockId, WorkerId};

/// A worker registry record. Id and address are the immutable keys. The
/// heartbeat clock is an atomic so liveness refresh and the detector's scan
/// never contend with block bookkeeping under the worker lock.
pub struct Worker {
    id: WorkerId,
    address: HostAddress,
    last_heartbeat_ms: AtomicI64,
    inner: Mutex<WorkerMeta>,
}

#[derive(Debug, Default)]
pub struct WorkerMeta {
    pub capacity_by_tier: BTreeMap<String, u64>,
    pub used_by_tier: BTreeMap<String, u64>,
    /// Blocks this worker reported as resident.
    pub blocks: HashSet<BlockId>,
    /// Blocks the master wants this worker to drop, delivered piggyback on
    /// the next heartbeat.
    pub pending_free: Vec<BlockId>,
}

impl Worker {
    pub fn new(id: WorkerId, address: HostAddress) -> Self {
        Self {
            id,
            address,
            last_heartbeat_ms: AtomicI64::new(current_time_millis()),
            inner: Mutex::new(WorkerMeta::default()),
        }
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    pub fn address(&self) -> &HostAddress {
        &self.address
    }

    pub async fn lock(&self) -> MutexGuard<'_, WorkerMeta> {
        self.inner.lock().await
    }

    /// Record contact from the worker.
    pub fn touch(&self) {
        self.last_heartbeat_ms
            .store(current_time_millis(), Ordering::Relaxed);
    }

    pub fn last_heartbeat_ms(&self) -> i64 {
        self.last_heartbeat_ms.load(Ordering::Relaxed)
    }

    pub async fn view(&self) -> WorkerView {
        let meta = self.lock().await;
        let last_contact_secs =
            (current_time_millis() - self.last_heartbeat_ms()).max(0) / 1000;
        WorkerView {
            id: self.id,
            address: self.address.clone(),
            capacity_bytes: meta.capacity_bytes(),
            used_bytes: meta.used_bytes(),
            capacity_by_tier: meta.capacity_by_tier.clone(),
            used_by_tier: meta.used_by_tier.clone(),
            block_count: meta.blocks.len(),
            last_contact_secs,
        }
    }
}

impl WorkerMeta {
    pub fn capacity_bytes(&self) -> u64 {
        self.capacity_by_tier.values().sum()
    }

    pub fn used_bytes(&self) -> u64 {
        self.used_by_tier.values().sum()
    }
}

/// What the master asks a worker to do in the heartbeat response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Carry on.
    Nothing,
    /// The master does not consider this worker active; it must re-register.
    Register,
    /// Drop these blocks.
    Free(Vec<BlockId>),
}

/// Client-facing snapshot of a worker.
#[derive(Debug, Clone)]
pub struct WorkerView {
    pub id: WorkerId,
    pub address: HostAddress,
    pub capacity_bytes: u64,
    pub used_bytes: u64,
    pub capacity_by_tier: BTreeMap<String, u64>,
    pub used_by_tier: BTreeMap<String, u64>,
    pub block_count: usize,
    pub last_contact_secs: i64,
}

pub fn current_time_millis() -> i64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .expect("Clock may have gone backwards")
        .as_millis() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_worker_view_totals() {
        let worker = Worker::new(7, HostAddress::new("127.0.0.1", 29999));
        {
            let mut meta = worker.lock().await;
            meta.capacity_by_tier = BTreeMap::from([
                ("MEM".to_string(), 1 << 30),
                ("HDD".to_string(), 4 << 30),
            ]);
            meta.used_by_tier = BTreeMap::from([("MEM".to_string(), 1 << 20)]);
            meta.blocks.extend([1, 2, 3]);
        }
        let view = worker.view().await;
        assert_eq!(view.capacity_bytes, 5 << 30);
        assert_eq!(view.used_bytes, 1 << 20);
        assert_eq!(view.block_count, 3);
    }
}
