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

use std::collections::HashMap;

use rand::Rng;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::{
    discover::{DiscoverEvent, ServiceEndpoint, ServiceType},
    error::{Error, Result},
};

/// Live endpoints of every peer service type a service talks to. Each
/// type has its own lock and its list is only ever replaced as a whole.
pub struct PeerAddressCache {
    slots: HashMap<ServiceType, RwLock<Vec<ServiceEndpoint>>>,
}

impl PeerAddressCache {
    pub fn new(peers: &[ServiceType]) -> Self {
        Self {
            slots: peers
                .iter()
                .map(|t| (*t, RwLock::new(Vec::new())))
                .collect(),
        }
    }

    pub async fn on_event(&self, ev: DiscoverEvent) {
        let svc_type = match ev.service_type.parse::<ServiceType>() {
            Ok(t) => t,
            Err(e) => {
                warn!(error = %e, "ignore discover event");
                return;
            }
        };
        let slot = match self.slots.get(&svc_type) {
            Some(slot) => slot,
            None => {
                warn!(service = %svc_type, "ignore discover event for untracked service");
                return;
            }
        };
        if let Some(err) = ev.err {
            warn!(service = %svc_type, error = %err, "discover failed, keep cached servers");
            return;
        }

        let mut endpoints = Vec::with_capacity(ev.servers.len());
        for payload in &ev.servers {
            match ServiceEndpoint::decode(payload) {
                Ok(ep) => endpoints.push(ep),
                Err(e) => warn!(service = %svc_type, payload = %payload, error = %e, "decode server info"),
            }
        }
        debug!(service = %svc_type, servers = endpoints.len(), "update servers");
        *slot.write().await = endpoints;
    }

    /// Picks a random live endpoint of `svc_type`, as `scheme://ip:port`.
    pub async fn get_server(&self, svc_type: ServiceType) -> Result<String> {
        let slot = self
            .slots
            .get(&svc_type)
            .ok_or_else(|| Error::NoServerAvailable(svc_type.to_string()))?;
        let endpoints = slot.read().await;
        if endpoints.is_empty() {
            return Err(Error::NoServerAvailable(svc_type.to_string()));
        }
        let i = rand::thread_rng().gen_range(0..endpoints.len());
        Ok(endpoints[i].address())
    }

    pub async fn endpoints(&self, svc_type: ServiceType) -> Vec<ServiceEndpoint> {
        match self.slots.get(&svc_type) {
            Some(slot) => slot.read().await.clone(),
            None => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashSet, sync::Arc};

    use super::*;

    fn payload(ip: &str, port: u16) -> String {
        String::from_utf8(ServiceEndpoint::new(ip, port, false).encode().unwrap()).unwrap()
    }

    fn event(svc_type: ServiceType, servers: Vec<String>) -> DiscoverEvent {
        DiscoverEvent {
            service_type: svc_type.to_string(),
            nodes: Vec::new(),
            servers,
            err: None,
        }
    }

    #[tokio::test]
    async fn empty_cache() {
        let cache = PeerAddressCache::new(&[ServiceType::HostController]);
        let r = cache.get_server(ServiceType::HostController).await;
        assert!(matches!(r, Err(Error::NoServerAvailable(_))));
        let r = cache.get_server(ServiceType::ApiServer).await;
        assert!(matches!(r, Err(Error::NoServerAvailable(_))));
    }

    #[tokio::test]
    async fn keeps_valid_payloads() -> Result<()> {
        let cache = PeerAddressCache::new(&[ServiceType::ObjectController]);
        cache
            .on_event(event(
                ServiceType::ObjectController,
                vec![
                    payload("10.0.0.1", 1),
                    "{not json".to_owned(),
                    payload("10.0.0.2", 2),
                ],
            ))
            .await;

        let eps = cache.endpoints(ServiceType::ObjectController).await;
        assert_eq!(eps.len(), 2);
        let mut seen = HashSet::new();
        for _ in 0..64 {
            seen.insert(cache.get_server(ServiceType::ObjectController).await?);
        }
        let want: HashSet<String> = ["http://10.0.0.1:1", "http://10.0.0.2:2"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert!(seen.is_subset(&want));
        assert!(!seen.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn failed_event_keeps_servers() -> Result<()> {
        let cache = PeerAddressCache::new(&[ServiceType::AuditController]);
        cache
            .on_event(event(ServiceType::AuditController, vec![payload("10.0.0.1", 1)]))
            .await;

        let mut failed = event(ServiceType::AuditController, Vec::new());
        failed.err = Some(Error::ConnectionClosed);
        cache.on_event(failed).await;
        assert_eq!(
            cache.get_server(ServiceType::AuditController).await?,
            "http://10.0.0.1:1"
        );

        // Events for services the cache does not track change nothing.
        cache
            .on_event(event(ServiceType::WebServer, vec![payload("10.0.0.5", 5)]))
            .await;
        assert!(cache.endpoints(ServiceType::WebServer).await.is_empty());

        cache
            .on_event(event(ServiceType::AuditController, Vec::new()))
            .await;
        assert!(matches!(
            cache.get_server(ServiceType::AuditController).await,
            Err(Error::NoServerAvailable(_))
        ));
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn readers_see_whole_lists() {
        let cache = Arc::new(PeerAddressCache::new(&[ServiceType::ProcController]));
        let generation = |port: u16| {
            (0..5)
                .map(|i| payload(&format!("10.0.1.{}", i), port))
                .collect::<Vec<_>>()
        };

        let writer = {
            let cache = cache.clone();
            tokio::spawn(async move {
                for round in 0..200u16 {
                    let servers = generation(1000 + round % 2);
                    cache
                        .on_event(event(ServiceType::ProcController, servers))
                        .await;
                    tokio::task::yield_now().await;
                }
            })
        };

        let mut readers = Vec::new();
        for _ in 0..4 {
            let cache = cache.clone();
            readers.push(tokio::spawn(async move {
                for _ in 0..200 {
                    let eps = cache.endpoints(ServiceType::ProcController).await;
                    if let Some(first) = eps.first() {
                        assert_eq!(eps.len(), 5);
                        assert!(eps.iter().all(|ep| ep.port == first.port));
                    }
                    tokio::task::yield_now().await;
                }
            }));
        }

        writer.await.unwrap();
        for r in readers {
            r.await.unwrap();
        }
    }
}
