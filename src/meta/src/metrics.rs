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

use prometheus::{
    register_int_counter_with_registry, register_int_gauge_vec_with_registry,
    register_int_gauge_with_registry, IntCounter, IntGauge, IntGaugeVec, Registry,
};

pub struct MetaMetrics {
    registry: Registry,

    /// The number of workers per lifecycle state.
    pub worker_num: IntGaugeVec,
    /// The number of blocks the registry knows.
    pub block_num: IntGauge,
    /// The number of blocks with no live replica.
    pub lost_block_num: IntGauge,
    /// Journal entries written since startup.
    pub journal_entry_count: IntCounter,
}

impl MetaMetrics {
    pub fn new() -> Self {
        let registry = Registry::new();
        let worker_num = register_int_gauge_vec_with_registry!(
            "block_master_worker_num",
            "The number of workers per lifecycle state",
            &["state"],
            registry
        )
        .unwrap();
        let block_num = register_int_gauge_with_registry!(
            "block_master_block_num",
            "The number of blocks in the registry",
            registry
        )
        .unwrap();
        let lost_block_num = register_int_gauge_with_registry!(
            "block_master_lost_block_num",
            "The number of blocks with no live replica",
            registry
        )
        .unwrap();
        let journal_entry_count = register_int_counter_with_registry!(
            "block_master_journal_entry_count",
            "Journal entries written since startup",
            registry
        )
        .unwrap();

        Self {
            registry,
            worker_num,
            block_num,
            lost_block_num,
            journal_entry_count,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

impl Default for MetaMetrics {
    fn default() -> Self {
        Self::new()
    }
}
