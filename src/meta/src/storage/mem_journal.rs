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

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{JournalBatch, JournalEntry, JournalStore};
use crate::error::{MetaError, MetaResult};

/// An in-memory journal. Used in tests and by embedders that accept losing
/// metadata on restart.
#[derive(Default)]
pub struct MemJournal {
    log: Mutex<Vec<JournalEntry>>,
    fail_writes: AtomicBool,
}

impl MemJournal {
    pub fn entry_count(&self) -> usize {
        self.log.lock().len()
    }

    /// Make subsequent writes fail, to exercise journal-unavailable paths.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Relaxed);
    }
}

#[async_trait]
impl JournalStore for MemJournal {
    async fn write(&self, batch: JournalBatch) -> MetaResult<()> {
        if self.fail_writes.load(Ordering::Relaxed) {
            return Err(MetaError::unavailable("journal refused the write"));
        }
        self.log.lock().extend(batch.into_entries());
        Ok(())
    }

    async fn entries(&self) -> MetaResult<Vec<JournalEntry>> {
        Ok(self.log.lock().clone())
    }
}
