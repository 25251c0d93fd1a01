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

use thiserror::Error;

use crate::model::{BlockId, WorkerId};

pub type MetaResult<T> = std::result::Result<T, MetaError>;

#[derive(Error, Debug)]
pub enum MetaError {
    /// Lookup of an unknown block id.
    #[error("block {0} not found")]
    BlockNotFound(BlockId),

    /// The operation names a worker id the master does not know.
    #[error("worker {0} is not registered")]
    NoWorker(WorkerId),

    /// Safe mode, or the journal refused a write.
    #[error("service unavailable: {0}")]
    Unavailable(String),

    /// Replay encountered an entry the master cannot interpret.
    #[error("unexpected journal entry: {0}")]
    UnexpectedJournalEntry(String),

    /// Invariant violation. Should never surface in production.
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl MetaError {
    pub fn unavailable(msg: impl Into<String>) -> Self {
        MetaError::Unavailable(msg.into())
    }
}

impl From<prost::DecodeError> for MetaError {
    fn from(e: prost::DecodeError) -> Self {
        MetaError::UnexpectedJournalEntry(format!("undecodable entry: {}", e))
    }
}
