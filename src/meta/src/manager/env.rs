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
use std::sync::Arc;
use std::time::Duration;

use tierfs_common::config::MasterConfig;

use crate::metrics::MetaMetrics;
use crate::storage::JournalStore;

/// Options read by the master at startup.
#[derive(Clone, Debug)]
pub struct MasterOpts {
    /// A worker silent for longer than this is declared lost.
    pub worker_timeout: Duration,
    /// Period of the lost-worker detector.
    pub heartbeat_interval: Duration,
    /// Tier aliases in speed order, defining the global tier ordinals.
    pub tier_aliases: Vec<String>,
}

impl MasterOpts {
    pub fn from_config(config: &MasterConfig) -> Self {
        Self {
            worker_timeout: Duration::from_millis(config.worker_timeout_ms),
            heartbeat_interval: Duration::from_millis(config.heartbeat_interval_ms),
            tier_aliases: config.tier_aliases.clone(),
        }
    }

    /// Default opts for testing.
    pub fn test() -> Self {
        Self {
            worker_timeout: Duration::from_secs(10),
            heartbeat_interval: Duration::from_millis(100),
            tier_aliases: vec!["MEM".to_string(), "SSD".to_string(), "HDD".to_string()],
        }
    }
}

/// The shared environment of the master: journal store, options, metrics and
/// the safe-mode flag. Cheap to clone; all fields are shared.
pub struct MasterEnv<S> {
    journal: Arc<S>,
    opts: Arc<MasterOpts>,
    metrics: Arc<MetaMetrics>,
    safe_mode: Arc<AtomicBool>,
}

impl<S> Clone for MasterEnv<S> {
    fn clone(&self) -> Self {
        Self {
            journal: self.journal.clone(),
            opts: self.opts.clone(),
            metrics: self.metrics.clone(),
            safe_mode: self.safe_mode.clone(),
        }
    }
}

impl<S: JournalStore> MasterEnv<S> {
    pub fn new(journal: Arc<S>, opts: MasterOpts) -> Self {
        Self {
            journal,
            opts: Arc::new(opts),
            metrics: Arc::new(MetaMetrics::new()),
            safe_mode: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn journal(&self) -> &S {
        &self.journal
    }

    pub fn journal_ref(&self) -> Arc<S> {
        self.journal.clone()
    }

    pub fn opts(&self) -> &MasterOpts {
        &self.opts
    }

    pub fn metrics(&self) -> &MetaMetrics {
        &self.metrics
    }

    /// Raised while the cluster has too little of its data registered to
    /// serve lookups. The flag is flipped by the embedder; lookup handlers
    /// consult it.
    pub fn is_in_safe_mode(&self) -> bool {
        self.safe_mode.load(Ordering::Relaxed)
    }

    pub fn set_safe_mode(&self, on: bool) {
        self.safe_mode.store(on, Ordering::Relaxed);
    }
}

#[cfg(any(test, feature = "test"))]
impl MasterEnv<crate::storage::MemJournal> {
    // Instance for test.
    pub fn for_test() -> Self {
        Self::new(
            Arc::new(crate::storage::MemJournal::default()),
            MasterOpts::test(),
        )
    }
}
