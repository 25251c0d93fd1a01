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

use std::collections::HashMap;

/// Maps tier aliases (e.g. `MEM`, `SSD`, `HDD`) to their global ordinal.
/// Lower ordinal means faster tier; block locations are reported fastest
/// tier first. Aliases not present in the configured list sort after all
/// known tiers.
#[derive(Debug, Clone)]
pub struct TierAssoc {
    ordinals: HashMap<String, usize>,
}

impl TierAssoc {
    pub fn new(aliases: &[String]) -> Self {
        let ordinals = aliases
            .iter()
            .enumerate()
            .map(|(ordinal, alias)| (alias.clone(), ordinal))
            .collect();
        Self { ordinals }
    }

    pub fn ordinal(&self, alias: &str) -> usize {
        self.ordinals
            .get(alias)
            .copied()
            .unwrap_or(self.ordinals.len())
    }

    pub fn len(&self) -> usize {
        self.ordinals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordinals.is_empty()
    }
}
