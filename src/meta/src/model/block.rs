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

use std::collections::BTreeMap;

use tierfs_common::util::addr::HostAddress;
use tokio::sync::{Mutex, MutexGuard};

use super::{BlockId, WorkerId};

/// Sentinel for a block whose byte length is not yet known. A block may be
/// created with this length (e.g. by an under-filesystem commit) and upgraded
/// exactly once when a worker commits the concrete length.
pub const UNKNOWN_BLOCK_LENGTH: u64 = u64::MAX;

/// A block registry record. The id is the immutable key; everything else is
/// guarded by the record's own lock.
pub struct Block {
    id: BlockId,
    inner: Mutex<BlockMeta>,
}

#[derive(Debug, Default)]
pub struct BlockMeta {
    /// Byte length, or [`UNKNOWN_BLOCK_LENGTH`]. Once concrete it is frozen.
    pub length: u64,
    /// Worker replicas holding this block: worker id → tier alias.
    pub locations: BTreeMap<WorkerId, String>,
}

impl Block {
    pub fn new(id: BlockId, length: u64) -> Self {
        Self {
            id,
            inner: Mutex::new(BlockMeta {
                length,
                locations: BTreeMap::new(),
            }),
        }
    }

    pub fn id(&self) -> BlockId {
        self.id
    }

    pub async fn lock(&self) -> MutexGuard<'_, BlockMeta> {
        self.inner.lock().await
    }
}

impl BlockMeta {
    /// Upgrade the length from unknown to `length`. Returns whether the
    /// record changed; a commit repeating the frozen length is a no-op and a
    /// mismatching one is the caller's to warn about.
    pub fn try_set_length(&mut self, length: u64) -> bool {
        if self.length == UNKNOWN_BLOCK_LENGTH && length != UNKNOWN_BLOCK_LENGTH {
            self.length = length;
            return true;
        }
        false
    }
}

/// Client-facing snapshot of a block, with locations joined against the
/// worker registry and ordered fastest tier first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockInfo {
    pub block_id: BlockId,
    pub length: u64,
    pub locations: Vec<BlockLocation>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockLocation {
    pub worker_id: WorkerId,
    pub address: HostAddress,
    pub tier_alias: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_length_upgrade_is_one_shot() {
        let mut meta = BlockMeta {
            length: UNKNOWN_BLOCK_LENGTH,
            locations: BTreeMap::new(),
        };
        assert!(meta.try_set_length(1024));
        assert_eq!(meta.length, 1024);
        // Frozen: neither a repeat nor a different value changes it.
        assert!(!meta.try_set_length(1024));
        assert!(!meta.try_set_length(2048));
        assert_eq!(meta.length, 1024);
    }

    #[test]
    fn test_unknown_does_not_overwrite() {
        let mut meta = BlockMeta {
            length: 512,
            locations: BTreeMap::new(),
        };
        assert!(!meta.try_set_length(UNKNOWN_BLOCK_LENGTH));
        assert_eq!(meta.length, 512);
    }
}
