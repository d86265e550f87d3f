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

use tokio::{
    sync::{mpsc, Mutex},
    time::sleep,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{sort_nodes, DiscoverEvent};
use crate::{
    config::DiscoverConfig,
    coordinator::Coordinator,
    error::{Error, Result},
};

/// Registers ephemeral nodes and watches sibling groups on a
/// coordination store, re-registering whenever a node goes away.
pub struct ZkRegDiscover<C>
where
    C: Coordinator,
{
    client: Arc<C>,
    config: DiscoverConfig,
    cancel: CancellationToken,
    // Serializes session open/close so nothing reconnects after stop.
    session: Arc<Mutex<()>>,
}

impl<C> Clone for ZkRegDiscover<C>
where
    C: Coordinator,
{
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            config: self.config.clone(),
            cancel: self.cancel.clone(),
            session: self.session.clone(),
        }
    }
}

impl<C> ZkRegDiscover<C>
where
    C: Coordinator,
{
    pub fn new(client: Arc<C>, config: DiscoverConfig, cancel: CancellationToken) -> Self {
        Self {
            client,
            config,
            cancel,
            session: Arc::new(Mutex::new(())),
        }
    }

    pub async fn start(&self) -> Result<()> {
        let _session = self.session.lock().await;
        self.client.connect(self.config.session_timeout).await?;
        info!(addrs = %self.config.zk_addrs, "coordination session started");
        Ok(())
    }

    pub async fn stop(&self) {
        self.cancel.cancel();
        let _session = self.session.lock().await;
        self.client.close().await;
        info!("coordination session stopped");
    }

    pub async fn ping(&self) -> Result<()> {
        self.client.ping().await
    }

    pub async fn get_serv_nodes(&self, path: &str) -> Result<Vec<String>> {
        self.client.get_children(path).await
    }

    /// Keeps an ephemeral sequential node at `path` alive in the
    /// background. Failures are only logged; the call itself never waits
    /// for the node to exist.
    pub fn register_and_watch(&self, path: &str, data: Vec<u8>) -> Result<()> {
        let engine = self.clone();
        let path = path.to_owned();
        tokio::spawn(async move { engine.register_loop(path, data).await });
        Ok(())
    }

    /// Streams a snapshot of `path`'s children every time they change.
    /// At most one snapshot is buffered; a slow reader holds the watcher.
    pub fn discover(&self, path: &str) -> Result<mpsc::Receiver<DiscoverEvent>> {
        let (tx, rx) = mpsc::channel(1);
        let engine = self.clone();
        let path = path.to_owned();
        tokio::spawn(async move { engine.discover_loop(path, tx).await });
        Ok(rx)
    }

    async fn register_loop(&self, path: String, data: Vec<u8>) {
        let retry = self.config.register_retry;
        loop {
            if self.cancel.is_cancelled() {
                return;
            }

            let node = match self
                .client
                .create_ephemeral_sequential(&path, data.clone())
                .await
            {
                Ok(node) => node,
                Err(e) => {
                    warn!(path = %path, error = %e, "create registration node");
                    self.recover(&e).await;
                    sleep(retry).await;
                    continue;
                }
            };

            let watch = match self.client.exists_watch(&node).await {
                Ok((true, _, watch)) => watch,
                Ok((false, _, _)) => {
                    warn!(node = %node, "registration node vanished before watch");
                    sleep(retry).await;
                    continue;
                }
                Err(e) => {
                    warn!(node = %node, error = %e, "watch registration node");
                    let _ = self.client.delete(&node, -1).await;
                    self.recover(&e).await;
                    sleep(retry).await;
                    continue;
                }
            };
            info!(node = %node, "service registered");

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return,
                ev = watch => {
                    match ev {
                        Ok(ev) => info!(node = %node, kind = ?ev.kind, "registration node changed, re-registering"),
                        Err(_) => info!(node = %node, "registration watch dropped, re-registering"),
                    }
                    // The old session may be gone with the node.
                    if self.client.ping().await.is_err() {
                        self.reconnect().await;
                    }
                }
            }
        }
    }

    async fn discover_loop(&self, path: String, tx: mpsc::Sender<DiscoverEvent>) {
        loop {
            if self.cancel.is_cancelled() {
                return;
            }

            let watch = match self.client.watch_children(&path).await {
                Ok((_, watch)) => watch,
                Err(Error::NoNode(_)) => {
                    debug!(path = %path, "discover path does not exist yet");
                    sleep(self.config.no_node_retry).await;
                    continue;
                }
                Err(e) => {
                    warn!(path = %path, error = %e, "watch children");
                    self.recover(&e).await;
                    sleep(self.config.discover_retry).await;
                    continue;
                }
            };

            let event = match self.server_info_by_path(&path).await {
                Some(event) => event,
                None => return,
            };
            debug!(path = %path, nodes = ?event.nodes, "discovered");

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return,
                r = tx.send(event) => {
                    if r.is_err() {
                        debug!(path = %path, "discover receiver dropped");
                        return;
                    }
                }
            }

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return,
                _ = watch => {}
            }
        }
    }

    /// Reads every child payload under `path`. Returns `None` only when
    /// cancelled while retrying.
    async fn server_info_by_path(&self, path: &str) -> Option<DiscoverEvent> {
        let mut event = DiscoverEvent::new(path);
        let children = match self.client.get_children(path).await {
            Ok(children) => children,
            Err(e) => {
                warn!(path = %path, error = %e, "list service nodes");
                event.err = Some(e);
                return Some(event);
            }
        };

        for child in sort_nodes(&children) {
            let child_path = format!("{}/{}", path, child);
            loop {
                if self.cancel.is_cancelled() {
                    return None;
                }
                match self.client.get(&child_path).await {
                    Ok(data) => {
                        event.nodes.push(child.clone());
                        event.servers.push(data);
                        break;
                    }
                    Err(Error::NoNode(_)) => {
                        debug!(node = %child_path, "service node went away");
                        break;
                    }
                    Err(Error::ConnectionClosed) => {
                        if !self.reconnect().await {
                            sleep(self.config.discover_retry).await;
                        }
                    }
                    Err(e) => {
                        warn!(node = %child_path, error = %e, "get service node");
                        sleep(self.config.discover_retry).await;
                    }
                }
            }
        }
        Some(event)
    }

    async fn recover(&self, err: &Error) {
        if err.is_connection_lost() {
            self.reconnect().await;
        }
    }

    async fn reconnect(&self) -> bool {
        let _session = self.session.lock().await;
        if self.cancel.is_cancelled() {
            return false;
        }
        match self.client.connect(self.config.session_timeout).await {
            Ok(()) => {
                info!("coordination session re-established");
                true
            }
            Err(e) => {
                warn!(error = %e, "reconnect coordination store");
                false
            }
        }
    }
}
