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

use tokio::sync::Mutex;

use crate::error::MetaResult;
use crate::storage::{ContainerIdEntry, JournalBatch, JournalStore};

/// How many container ids one journal entry reserves. A crash burns at most
/// this many ids of the 64-bit space.
pub const CONTAINER_ID_RESERVATION_SIZE: u64 = 1000;

/// Monotonic source of container ids (the high bits of block ids). Ids below
/// `journaled_next` are already reserved in the journal and cost no I/O to
/// hand out; crossing the reservation boundary journals the next batch
/// before the id is returned.
pub struct ContainerIdGenerator<S: JournalStore> {
    journal: Arc<S>,
    core: Mutex<ContainerIdCore>,
}

#[derive(Debug, Default)]
struct ContainerIdCore {
    next_id: u64,
    journaled_next: u64,
}

impl<S: JournalStore> ContainerIdGenerator<S> {
    pub fn new(journal: Arc<S>) -> Self {
        Self {
            journal,
            core: Mutex::new(ContainerIdCore::default()),
        }
    }

    pub async fn new_container_id(&self) -> MetaResult<u64> {
        let mut core = self.core.lock().await;
        let id = core.next_id;
        core.next_id += 1;
        if id >= core.journaled_next {
            let reserved = id + CONTAINER_ID_RESERVATION_SIZE;
            let mut batch = JournalBatch::default();
            batch.append(ContainerIdEntry {
                next_container_id: reserved,
            });
            // The generator lock stays held across the append: id handout is
            // serialized, other handlers are not. On failure `next_id` is not
            // rewound, since the id is already consumed.
            self.journal.write(batch).await?;
            core.journaled_next = reserved;
        }
        Ok(id)
    }

    /// Apply a replayed reservation entry.
    pub async fn apply(&self, entry: &ContainerIdEntry) {
        let mut core = self.core.lock().await;
        core.next_id = core.next_id.max(entry.next_container_id);
        core.journaled_next = entry.next_container_id;
    }

    /// The current reservation bound, for snapshot export.
    pub async fn journaled_next(&self) -> u64 {
        self.core.lock().await.journaled_next
    }
}
