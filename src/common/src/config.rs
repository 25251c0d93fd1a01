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

use std::fs;

use serde::{Deserialize, Serialize};

/// Root configuration, deserialized from a TOML file.
///
/// All fields carry serde defaults so a partial (or empty) file is valid.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TierfsConfig {
    #[serde(default)]
    pub master: MasterConfig,
}

/// The section read by the block master.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MasterConfig {
    /// A worker whose last heartbeat is older than this is declared lost.
    #[serde(default = "default::master::worker_timeout_ms")]
    pub worker_timeout_ms: u64,

    /// Period of the lost-worker detector.
    #[serde(default = "default::master::heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,

    /// Storage tier aliases in speed order, fastest first. Defines the
    /// global tier ordinals used to sort block locations.
    #[serde(default = "default::master::tier_aliases")]
    pub tier_aliases: Vec<String>,
}

impl Default for MasterConfig {
    fn default() -> Self {
        toml::from_str("").unwrap()
    }
}

mod default {
    pub mod master {
        pub fn worker_timeout_ms() -> u64 {
            300_000
        }

        pub fn heartbeat_interval_ms() -> u64 {
            10_000
        }

        pub fn tier_aliases() -> Vec<String> {
            vec!["MEM".to_string(), "SSD".to_string(), "HDD".to_string()]
        }
    }
}

/// Load config from `path`. If the path is empty, default values are used.
pub fn load_config(path: &str) -> TierfsConfig {
    if path.is_empty() {
        tracing::warn!("tierfs.toml not found, using default config.");
        return TierfsConfig::default();
    }
    let config_str = fs::read_to_string(path)
        .unwrap_or_else(|e| panic!("failed to open config file '{}': {}", path, e));
    toml::from_str(config_str.as_str())
        .unwrap_or_else(|e| panic!("failed to parse config file '{}': {}", path, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TierfsConfig::default();
        assert_eq!(config.master.worker_timeout_ms, 300_000);
        assert_eq!(config.master.heartbeat_interval_ms, 10_000);
        assert_eq!(config.master.tier_aliases, ["MEM", "SSD", "HDD"]);
    }

    #[test]
    fn test_partial_override() {
        let config: TierfsConfig = toml::from_str(
            r#"
            [master]
            worker_timeout_ms = 1000
            "#,
        )
        .unwrap();
        assert_eq!(config.master.worker_timeout_ms, 1000);
        assert_eq!(config.master.heartbeat_interval_ms, 10_000);
    }
}
