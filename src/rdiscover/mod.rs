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

mod cache;

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

pub use cache::PeerAddressCache;
use tokio_stream::{wrappers::ReceiverStream, StreamExt, StreamMap};
use tokio_util::sync::CancellationToken;
use tonic::transport::{Channel, Endpoint};
use tracing::{debug, info};

use crate::{
    config::DiscoverConfig,
    coordinator::Coordinator,
    discover::{
        registration_path, service_path, DiscoverEvent, RegDiscover, ServiceEndpoint, ServiceType,
    },
    error::{Error, Result},
};

/// Registration and peer resolution for one service process: publishes
/// its own endpoint and keeps the endpoints of the services it calls.
pub struct ServiceDiscover<C>
where
    C: Coordinator,
{
    rd: RegDiscover<C>,
    base_path: String,
    svc_type: ServiceType,
    endpoint: ServiceEndpoint,
    peers: Vec<ServiceType>,
    cache: Arc<PeerAddressCache>,
    started: AtomicBool,
}

impl<C> ServiceDiscover<C>
where
    C: Coordinator,
{
    pub fn new(
        client: C,
        config: DiscoverConfig,
        svc_type: ServiceType,
        endpoint: ServiceEndpoint,
        peers: &[ServiceType],
    ) -> Self {
        let base_path = config.base_path.clone();
        Self {
            rd: RegDiscover::new(client, config),
            base_path,
            svc_type,
            endpoint,
            peers: peers.to_vec(),
            cache: Arc::new(PeerAddressCache::new(peers)),
            started: AtomicBool::new(false),
        }
    }

    /// Fails with `InvalidArgument` when called more than once.
    pub async fn start(&self) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(Error::InvalidArgument(
                "service discover already started".to_owned(),
            ));
        }
        self.rd.start().await?;

        let path = registration_path(&self.base_path, self.svc_type, &self.endpoint.ip);
        self.rd
            .register_and_watch_service(&path, self.endpoint.encode()?)?;

        let mut events = StreamMap::new();
        for peer in &self.peers {
            let rx = self
                .rd
                .discover_service(&service_path(&self.base_path, *peer))?;
            events.insert(*peer, ReceiverStream::new(rx));
        }
        let cache = self.cache.clone();
        let cancel = self.rd.cancel_token();
        tokio::spawn(async move { watch_peers(events, cache, cancel).await });

        info!(
            service = %self.svc_type,
            address = %self.endpoint.address(),
            peers = ?self.peers,
            "service discover started"
        );
        Ok(())
    }

    pub async fn stop(&self) {
        self.rd.stop().await;
    }

    pub async fn ping(&self) -> Result<()> {
        self.rd.ping().await
    }

    pub async fn get_server(&self, svc_type: ServiceType) -> Result<String> {
        self.cache.get_server(svc_type).await
    }

    /// Connects to a random live instance of `svc_type`.
    pub async fn get_channel(&self, svc_type: ServiceType) -> Result<Channel> {
        let addr = self.cache.get_server(svc_type).await?;
        let channel = Endpoint::from_shared(addr)?.connect().await?;
        Ok(channel)
    }

    pub fn cache(&self) -> Arc<PeerAddressCache> {
        self.cache.clone()
    }

    pub fn reg_discover(&self) -> &RegDiscover<C> {
        &self.rd
    }
}

async fn watch_peers(
    mut events: StreamMap<ServiceType, ReceiverStream<DiscoverEvent>>,
    cache: Arc<PeerAddressCache>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            item = events.next() => match item {
                Some((peer, ev)) => {
                    debug!(peer = %peer, nodes = ?ev.nodes, "peer servers changed");
                    cache.on_event(ev).await;
                }
                None => break,
            },
        }
    }
    debug!("stop watching peers");
}
