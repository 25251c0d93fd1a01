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

mod error;
pub mod manager;
pub mod metrics;
pub mod model;
pub mod storage;

use std::sync::Arc;

use clap::Parser;
pub use error::{MetaError, MetaResult};
use tierfs_common::config::load_config;
use tokio::sync::oneshot::Sender;
use tokio::task::JoinHandle;

use crate::manager::{BlockMaster, BlockMasterRef, MasterEnv, MasterOpts};
use crate::storage::FileJournal;

#[derive(Debug, Clone, Parser)]
pub struct MasterNodeOpts {
    /// Path of the journal log file.
    #[clap(long, env = "TIERFS_JOURNAL_PATH", default_value = "tierfs.journal")]
    journal_path: String,

    /// The path of `tierfs.toml` configuration file.
    ///
    /// If empty, default configuration values will be used.
    #[clap(long, env = "TIERFS_CONFIG_PATH", default_value = "")]
    config_path: String,
}

/// Bring up a block master backed by a file journal: open the log, replay
/// it, and start the lost-worker detector. The caller wires the returned
/// master into its transport and uses the sender to stop the detector.
pub async fn start(
    opts: MasterNodeOpts,
) -> MetaResult<(BlockMasterRef<FileJournal>, JoinHandle<()>, Sender<()>)> {
    tracing::info!("Starting block master with options {:?}", opts);
    let config = load_config(&opts.config_path);
    let journal = Arc::new(FileJournal::open(&opts.journal_path).await?);
    let env = MasterEnv::new(journal, MasterOpts::from_config(&config.master));
    let check_interval = env.opts().heartbeat_interval;

    let master = Arc::new(BlockMaster::new(env));
    master.replay().await?;
    let (join_handle, shutdown_tx) =
        BlockMaster::start_lost_worker_checker(master.clone(), check_interval).await;
    Ok((master, join_handle, shutdown_tx))
}
