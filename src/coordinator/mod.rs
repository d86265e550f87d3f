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

mod mem;

use std::time::Duration;

use async_trait::async_trait;
pub use mem::{MemCoordinator, MemStore};
use tokio::sync::oneshot;

use crate::error::Result;

/// One-shot watch registration. It resolves once and must be re-armed;
/// a dropped sender counts as fired.
pub type Watch = oneshot::Receiver<WatchEvent>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WatchEventKind {
    NodeCreated,
    NodeDeleted,
    /// Only produced by bindings that support setting node data;
    /// `MemStore` never emits it.
    NodeDataChanged,
    NodeChildrenChanged,
    SessionExpired,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WatchEvent {
    pub kind: WatchEventKind,
    pub path: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Stat {
    pub version: i32,
    pub ephemeral_owner: u64,
    pub num_children: usize,
}

/// Hierarchical coordination store client, ZooKeeper style.
///
/// A handle owns at most one session at a time. Ephemeral nodes it
/// creates disappear together with that session.
#[async_trait]
pub trait Coordinator: Send + Sync + 'static {
    /// Opens a session, or replaces one that has been lost.
    async fn connect(&self, session_timeout: Duration) -> Result<()>;

    async fn close(&self);

    async fn ping(&self) -> Result<()>;

    /// Creates an ephemeral node named `path` plus a store assigned
    /// 10-digit sequence suffix and returns the actual path.
    async fn create_ephemeral_sequential(&self, path: &str, data: Vec<u8>) -> Result<String>;

    async fn get(&self, path: &str) -> Result<String>;

    async fn get_children(&self, path: &str) -> Result<Vec<String>>;

    async fn exists_watch(&self, path: &str) -> Result<(bool, Option<Stat>, Watch)>;

    /// Fails with `NoNode` when `path` does not exist.
    async fn watch_children(&self, path: &str) -> Result<(Vec<String>, Watch)>;

    /// `version == -1` matches any version.
    async fn delete(&self, path: &str, version: i32) -> Result<()>;
}
