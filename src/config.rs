// Copyright 2022 The Engula Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::time::Duration;

use crate::error::{Error, Result};

pub const DEFAULT_ZK_ADDRS: &str = "127.0.0.1:2181";
pub const DEFAULT_BASE_PATH: &str = "/cc/services";
pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(60);

const ENV_ZK_ADDRS: &str = "CC_ZK_ADDRS";
const ENV_SESSION_TIMEOUT: &str = "CC_ZK_SESSION_TIMEOUT_SECS";
const ENV_BASE_PATH: &str = "CC_SERV_BASEPATH";

/// Settings shared by the register/discover engine and the services
/// embedding it.
#[derive(Clone, Debug)]
pub struct DiscoverConfig {
    /// Comma separated `host:port` list of the coordination store.
    pub zk_addrs: String,
    pub session_timeout: Duration,
    pub base_path: String,

    /// Backoff before re-creating a registration node.
    pub register_retry: Duration,
    /// Backoff when a discovered path does not exist yet.
    pub no_node_retry: Duration,
    /// Backoff for every other discovery failure.
    pub discover_retry: Duration,
}

impl Default for DiscoverConfig {
    fn default() -> Self {
        Self {
            zk_addrs: DEFAULT_ZK_ADDRS.to_owned(),
            session_timeout: DEFAULT_SESSION_TIMEOUT,
            base_path: DEFAULT_BASE_PATH.to_owned(),
            register_retry: Duration::from_secs(5),
            no_node_retry: Duration::from_secs(5),
            discover_retry: Duration::from_secs(10),
        }
    }
}

impl DiscoverConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();
        if let Some(addrs) = lookup(ENV_ZK_ADDRS) {
            cfg.zk_addrs = addrs;
        }
        if let Some(secs) = lookup(ENV_SESSION_TIMEOUT) {
            let secs = secs.trim().parse::<u64>().map_err(|e| {
                Error::Config(format!("{} '{}': {}", ENV_SESSION_TIMEOUT, secs, e))
            })?;
            cfg.session_timeout = Duration::from_secs(secs);
        }
        if let Some(base) = lookup(ENV_BASE_PATH) {
            cfg.base_path = base.trim_end_matches('/').to_owned();
        }
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.addrs().is_empty() {
            return Err(Error::Config("empty coordination store address list".to_owned()));
        }
        if !self.base_path.starts_with('/') {
            return Err(Error::Config(format!(
                "base path '{}' must be absolute",
                self.base_path
            )));
        }
        Ok(())
    }

    pub fn addrs(&self) -> Vec<String> {
        self.zk_addrs
            .split(',')
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .map(str::to_owned)
            .collect()
    }

    pub fn with_session_timeout(mut self, timeout: Duration) -> Self {
        self.session_timeout = timeout;
        self
    }

    pub fn with_base_path(mut self, base_path: &str) -> Self {
        self.base_path = base_path.to_owned();
        self
    }

    pub fn with_retry(mut self, register: Duration, no_node: Duration, other: Duration) -> Self {
        self.register_retry = register;
        self.no_node_retry = no_node;
        self.discover_retry = other;
        self
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k: &str| vars.get(k).cloned()
    }

    #[test]
    fn defaults() -> Result<()> {
        let cfg = DiscoverConfig::from_lookup(lookup(&[]))?;
        assert_eq!(cfg.addrs(), vec!["127.0.0.1:2181".to_owned()]);
        assert_eq!(cfg.session_timeout, Duration::from_secs(60));
        assert_eq!(cfg.base_path, "/cc/services");
        assert_eq!(cfg.register_retry, Duration::from_secs(5));
        assert_eq!(cfg.discover_retry, Duration::from_secs(10));
        Ok(())
    }

    #[test]
    fn env_overrides() -> Result<()> {
        let cfg = DiscoverConfig::from_lookup(lookup(&[
            ("CC_ZK_ADDRS", "10.0.0.1:2181, 10.0.0.2:2181,,"),
            ("CC_ZK_SESSION_TIMEOUT_SECS", "15"),
            ("CC_SERV_BASEPATH", "/bk/services/"),
        ]))?;
        assert_eq!(cfg.addrs(), vec!["10.0.0.1:2181", "10.0.0.2:2181"]);
        assert_eq!(cfg.session_timeout, Duration::from_secs(15));
        assert_eq!(cfg.base_path, "/bk/services");
        Ok(())
    }

    #[test]
    fn builders() -> Result<()> {
        let cfg = DiscoverConfig::default()
            .with_base_path("/test/services")
            .with_session_timeout(Duration::from_secs(3))
            .with_retry(
                Duration::from_millis(10),
                Duration::from_millis(20),
                Duration::from_millis(30),
            );
        cfg.validate()?;
        assert_eq!(cfg.base_path, "/test/services");
        assert_eq!(cfg.session_timeout, Duration::from_secs(3));
        assert_eq!(cfg.no_node_retry, Duration::from_millis(20));
        Ok(())
    }

    #[test]
    fn rejects_bad_values() {
        let r = DiscoverConfig::from_lookup(lookup(&[("CC_ZK_SESSION_TIMEOUT_SECS", "soon")]));
        assert!(matches!(r, Err(Error::Config(_))));
        let r = DiscoverConfig::from_lookup(lookup(&[("CC_ZK_ADDRS", " , ")]));
        assert!(matches!(r, Err(Error::Config(_))));
        let r = DiscoverConfig::from_lookup(lookup(&[("CC_SERV_BASEPATH", "cc/services")]));
        assert!(matches!(r, Err(Error::Config(_))));
    }
}
