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

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{DiscoverEvent, ZkRegDiscover};
use crate::{config::DiscoverConfig, coordinator::Coordinator, error::Result};

/// Entry point embedded by every service: owns the root cancellation
/// token and hides the coordination client behind the engine.
pub struct RegDiscover<C>
where
    C: Coordinator,
{
    engine: ZkRegDiscover<C>,
    cancel: CancellationToken,
}

impl<C> RegDiscover<C>
where
    C: Coordinator,
{
    pub fn new(client: C, config: DiscoverConfig) -> Self {
        let cancel = CancellationToken::new();
        let engine = ZkRegDiscover::new(Arc::new(client), config, cancel.clone());
        Self { engine, cancel }
    }

    pub async fn start(&self) -> Result<()> {
        self.engine.start().await
    }

    pub async fn stop(&self) {
        self.engine.stop().await;
    }

    pub async fn ping(&self) -> Result<()> {
        self.engine.ping().await
    }

    pub fn register_and_watch_service(&self, path: &str, data: Vec<u8>) -> Result<()> {
        self.engine.register_and_watch(path, data)
    }

    pub fn discover_service(&self, path: &str) -> Result<mpsc::Receiver<DiscoverEvent>> {
        self.engine.discover(path)
    }

    pub async fn get_serv_nodes(&self, path: &str) -> Result<Vec<String>> {
        self.engine.get_serv_nodes(path).await
    }

    /// Cancelled by [`RegDiscover::stop`]; tasks started on behalf of this
    /// instance should exit on it.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::sleep;

    use super::*;
    use crate::{
        coordinator::{MemCoordinator, MemStore},
        error::Error,
    };

    #[tokio::test(start_paused = true)]
    async fn lifecycle() -> Result<()> {
        let store = MemStore::new();
        let rd = RegDiscover::new(MemCoordinator::new(store), DiscoverConfig::default());
        assert!(matches!(rd.ping().await, Err(Error::ConnectionClosed)));

        rd.start().await?;
        rd.ping().await?;
        rd.register_and_watch_service("/cc/services/topo-server/10.0.0.9", b"t".to_vec())?;
        let mut rx = rd.discover_service("/cc/services/topo-server")?;

        let ev = rx.recv().await.unwrap();
        assert_eq!(ev.service_type, "topo-server");
        assert_eq!(ev.servers, vec!["t"]);
        assert_eq!(
            rd.get_serv_nodes("/cc/services/topo-server").await?,
            vec!["10.0.0.90000000000"]
        );

        let token = rd.cancel_token();
        rd.stop().await;
        assert!(token.is_cancelled());
        assert!(matches!(rd.ping().await, Err(Error::ConnectionClosed)));
        sleep(Duration::from_millis(10)).await;
        assert!(rx.recv().await.is_none());

        // A second stop is a no-op.
        rd.stop().await;
        assert!(matches!(rd.ping().await, Err(Error::ConnectionClosed)));
        Ok(())
    }
}
