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

use std::fmt;
use std::net::{SocketAddr, ToSocketAddrs};
use std::str::FromStr;

use anyhow::{anyhow, Context};

/// The network identity a worker registers under. Uniquely identifies a
/// worker across restarts, so a returning worker is recognized by address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HostAddress {
    pub host: String,
    pub port: u16,
}

impl HostAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Resolve to a socket address, e.g. for dialing the worker's data port.
    pub fn to_socket_addr(&self) -> anyhow::Result<SocketAddr> {
        (self.host.as_str(), self.port)
            .to_socket_addrs()
            .with_context(|| format!("failed to resolve address: {}", self))?
            .next()
            .ok_or_else(|| anyhow!("no socket address found for: {}", self))
    }
}

impl fmt::Display for HostAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for HostAddress {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| anyhow!("invalid address, expected host:port: {}", s))?;
        if host.is_empty() {
            return Err(anyhow!("invalid address, empty host: {}", s));
        }
        let port = port
            .parse()
            .with_context(|| format!("invalid port in address: {}", s))?;
        Ok(Self {
            host: host.to_string(),
            port,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        let addr: HostAddress = "worker-0.storage:29999".parse().unwrap();
        assert_eq!(addr.host, "worker-0.storage");
        assert_eq!(addr.port, 29999);
        assert_eq!(addr.to_string(), "worker-0.storage:29999");

        assert!("no-port".parse::<HostAddress>().is_err());
        assert!(":1234".parse::<HostAddress>().is_err());
        assert!("host:not-a-port".parse::<HostAddress>().is_err());
    }

    #[test]
    fn test_to_socket_addr() {
        let addr = HostAddress::new("127.0.0.1", 29999);
        assert_eq!(
            addr.to_socket_addr().unwrap(),
            "127.0.0.1:29999".parse().unwrap()
        );
    }
}
