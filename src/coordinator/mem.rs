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

use std::{
    collections::{BTreeSet, HashMap, HashSet},
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use tokio::sync::{oneshot, Mutex};
use tracing::debug;

use super::{Coordinator, Stat, Watch, WatchEvent, WatchEventKind};
use crate::error::{Error, Result};

const ROOT: &str = "/";

struct Node {
    data: Vec<u8>,
    version: i32,
    // 0 for persistent nodes.
    ephemeral_owner: u64,
    children: BTreeSet<String>,
    next_sequence: u64,
}

impl Node {
    fn new(data: Vec<u8>, ephemeral_owner: u64) -> Self {
        Self {
            data,
            version: 0,
            ephemeral_owner,
            children: BTreeSet::new(),
            next_sequence: 0,
        }
    }

    fn stat(&self) -> Stat {
        Stat {
            version: self.version,
            ephemeral_owner: self.ephemeral_owner,
            num_children: self.children.len(),
        }
    }
}

struct Watcher {
    session: u64,
    tx: oneshot::Sender<WatchEvent>,
}

struct Inner {
    nodes: HashMap<String, Node>,
    sessions: HashSet<u64>,
    last_session: u64,
    exist_watches: HashMap<String, Vec<Watcher>>,
    child_watches: HashMap<String, Vec<Watcher>>,
}

impl Default for Inner {
    fn default() -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(ROOT.to_owned(), Node::new(Vec::new(), 0));
        Self {
            nodes,
            sessions: HashSet::new(),
            last_session: 0,
            exist_watches: HashMap::new(),
            child_watches: HashMap::new(),
        }
    }
}

fn check_path(path: &str) -> Result<()> {
    if path == ROOT {
        return Ok(());
    }
    if !path.starts_with('/') || path.ends_with('/') || path[1..].split('/').any(str::is_empty)
    {
        return Err(Error::InvalidArgument(format!("invalid path '{}'", path)));
    }
    Ok(())
}

fn split_parent(path: &str) -> Option<(&str, &str)> {
    match path.rsplit_once('/') {
        Some((_, "")) | None => None,
        Some(("", name)) => Some((ROOT, name)),
        Some((parent, name)) => Some((parent, name)),
    }
}

fn join(parent: &str, name: &str) -> String {
    if parent == ROOT {
        format!("/{}", name)
    } else {
        format!("{}/{}", parent, name)
    }
}

impl Inner {
    fn check_session(&self, session: u64) -> Result<()> {
        if self.sessions.contains(&session) {
            Ok(())
        } else {
            Err(Error::ConnectionClosed)
        }
    }

    fn node(&self, path: &str) -> Result<&Node> {
        self.nodes
            .get(path)
            .ok_or_else(|| Error::NoNode(path.to_owned()))
    }

    fn fire_exists(&mut self, path: &str, kind: WatchEventKind) {
        if let Some(watchers) = self.exist_watches.remove(path) {
            notify(watchers, path, kind);
        }
    }

    fn fire_children(&mut self, path: &str, kind: WatchEventKind) {
        if let Some(watchers) = self.child_watches.remove(path) {
            notify(watchers, path, kind);
        }
    }

    fn insert_node(&mut self, path: String, node: Node) -> Result<()> {
        let (parent, name) = split_parent(&path)
            .ok_or_else(|| Error::InvalidArgument(format!("invalid path '{}'", path)))?;
        let parent = parent.to_owned();
        let name = name.to_owned();
        match self.nodes.get_mut(&parent) {
            Some(p) if p.ephemeral_owner != 0 => {
                return Err(Error::InvalidArgument(format!(
                    "ephemeral node '{}' cannot have children",
                    parent
                )))
            }
            Some(p) => {
                p.children.insert(name);
            }
            None => return Err(Error::NoNode(parent)),
        }
        self.nodes.insert(path.clone(), node);
        self.fire_exists(&path, WatchEventKind::NodeCreated);
        self.fire_children(&parent, WatchEventKind::NodeChildrenChanged);
        Ok(())
    }

    fn ensure_persistent(&mut self, path: &str) -> Result<()> {
        let mut missing = Vec::new();
        let mut cur = path;
        while !self.nodes.contains_key(cur) {
            missing.push(cur.to_owned());
            match split_parent(cur) {
                Some((parent, _)) => cur = parent,
                None => break,
            }
        }
        for p in missing.into_iter().rev() {
            self.insert_node(p, Node::new(Vec::new(), 0))?;
        }
        Ok(())
    }

    fn create_ephemeral_sequential(
        &mut self,
        session: u64,
        path: &str,
        data: Vec<u8>,
    ) -> Result<String> {
        self.check_session(session)?;
        check_path(path)?;
        let (parent, name) = split_parent(path)
            .ok_or_else(|| Error::InvalidArgument(format!("invalid path '{}'", path)))?;
        self.ensure_persistent(parent)?;
        let seq = match self.nodes.get_mut(parent) {
            Some(p) => {
                let seq = p.next_sequence;
                p.next_sequence += 1;
                seq
            }
            None => return Err(Error::NoNode(parent.to_owned())),
        };
        let actual = join(parent, &format!("{}{:010}", name, seq));
        if self.nodes.contains_key(&actual) {
            return Err(Error::NodeExists(actual));
        }
        self.insert_node(actual.clone(), Node::new(data, session))?;
        Ok(actual)
    }

    fn remove_node(&mut self, path: &str) {
        if self.nodes.remove(path).is_none() {
            return;
        }
        if let Some((parent, name)) = split_parent(path) {
            if let Some(p) = self.nodes.get_mut(parent) {
                p.children.remove(name);
            }
            self.fire_children(parent, WatchEventKind::NodeChildrenChanged);
        }
        self.fire_exists(path, WatchEventKind::NodeDeleted);
        self.fire_children(path, WatchEventKind::NodeDeleted);
    }

    fn delete(&mut self, session: u64, path: &str, version: i32) -> Result<()> {
        self.check_session(session)?;
        check_path(path)?;
        if path == ROOT {
            return Err(Error::InvalidArgument("cannot delete root".to_owned()));
        }
        let node = self.node(path)?;
        if version != -1 && node.version != version {
            return Err(Error::BadVersion(path.to_owned()));
        }
        if !node.children.is_empty() {
            return Err(Error::NotEmpty(path.to_owned()));
        }
        self.remove_node(path);
        Ok(())
    }

    fn end_session(&mut self, session: u64, expired: bool) {
        if !self.sessions.remove(&session) {
            return;
        }
        for watches in [&mut self.exist_watches, &mut self.child_watches] {
            for (path, watchers) in watches.iter_mut() {
                let (mine, others): (Vec<_>, Vec<_>) =
                    watchers.drain(..).partition(|w| w.session == session);
                *watchers = others;
                if expired {
                    notify(mine, path, WatchEventKind::SessionExpired);
                }
            }
            watches.retain(|_, w| !w.is_empty());
        }
        let owned = self
            .nodes
            .iter()
            .filter(|(_, n)| n.ephemeral_owner == session)
            .map(|(p, _)| p.to_owned())
            .collect::<Vec<_>>();
        for path in owned {
            self.remove_node(&path);
        }
    }
}

fn notify(watchers: Vec<Watcher>, path: &str, kind: WatchEventKind) {
    for w in watchers {
        let _ = w.tx.send(WatchEvent {
            kind,
            path: path.to_owned(),
        });
    }
}

/// In process hierarchical store with ZooKeeper style sessions,
/// ephemeral sequential nodes and one-shot watches. Clones share state.
#[derive(Clone, Default)]
pub struct MemStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn open_session(&self) -> u64 {
        let mut inner = self.inner.lock().await;
        inner.last_session += 1;
        let id = inner.last_session;
        inner.sessions.insert(id);
        id
    }

    async fn is_alive(&self, session: u64) -> bool {
        self.inner.lock().await.sessions.contains(&session)
    }

    async fn end_session(&self, session: u64, expired: bool) {
        self.inner.lock().await.end_session(session, expired);
    }
}

/// A single client handle over a [`MemStore`].
pub struct MemCoordinator {
    store: MemStore,
    // 0 when no session has been opened.
    session: Mutex<u64>,
}

impl MemCoordinator {
    pub fn new(store: MemStore) -> Self {
        Self {
            store,
            session: Mutex::new(0),
        }
    }

    /// Drops the session on the store side, as a server would after a
    /// missed session timeout. The handle notices on its next call.
    pub async fn expire_session(&self) {
        let session = *self.session.lock().await;
        if session != 0 {
            self.store.end_session(session, true).await;
        }
    }

    async fn session(&self) -> Result<u64> {
        match *self.session.lock().await {
            0 => Err(Error::ConnectionClosed),
            id => Ok(id),
        }
    }
}

#[async_trait]
impl Coordinator for MemCoordinator {
    async fn connect(&self, session_timeout: Duration) -> Result<()> {
        let mut session = self.session.lock().await;
        if *session != 0 && self.store.is_alive(*session).await {
            return Ok(());
        }
        *session = self.store.open_session().await;
        debug!(session = *session, timeout = ?session_timeout, "session opened");
        Ok(())
    }

    async fn close(&self) {
        let mut session = self.session.lock().await;
        if *session != 0 {
            self.store.end_session(*session, false).await;
            *session = 0;
        }
    }

    async fn ping(&self) -> Result<()> {
        let session = self.session().await?;
        if self.store.is_alive(session).await {
            Ok(())
        } else {
            Err(Error::ConnectionClosed)
        }
    }

    async fn create_ephemeral_sequential(&self, path: &str, data: Vec<u8>) -> Result<String> {
        let session = self.session().await?;
        let mut inner = self.store.inner.lock().await;
        inner.create_ephemeral_sequential(session, path, data)
    }

    async fn get(&self, path: &str) -> Result<String> {
        let session = self.session().await?;
        let inner = self.store.inner.lock().await;
        inner.check_session(session)?;
        check_path(path)?;
        let node = inner.node(path)?;
        Ok(String::from_utf8_lossy(&node.data).into_owned())
    }

    async fn get_children(&self, path: &str) -> Result<Vec<String>> {
        let session = self.session().await?;
        let inner = self.store.inner.lock().await;
        inner.check_session(session)?;
        check_path(path)?;
        Ok(inner.node(path)?.children.iter().cloned().collect())
    }

    async fn exists_watch(&self, path: &str) -> Result<(bool, Option<Stat>, Watch)> {
        let session = self.session().await?;
        let mut inner = self.store.inner.lock().await;
        inner.check_session(session)?;
        check_path(path)?;
        let stat = inner.nodes.get(path).map(Node::stat);
        let (tx, rx) = oneshot::channel();
        inner
            .exist_watches
            .entry(path.to_owned())
            .or_default()
            .push(Watcher { session, tx });
        Ok((stat.is_some(), stat, rx))
    }

    async fn watch_children(&self, path: &str) -> Result<(Vec<String>, Watch)> {
        let session = self.session().await?;
        let mut inner = self.store.inner.lock().await;
        inner.check_session(session)?;
        check_path(path)?;
        let children = inner.node(path)?.children.iter().cloned().collect();
        let (tx, rx) = oneshot::channel();
        inner
            .child_watches
            .entry(path.to_owned())
            .or_default()
            .push(Watcher { session, tx });
        Ok((children, rx))
    }

    async fn delete(&self, path: &str, version: i32) -> Result<()> {
        let session = self.session().await?;
        let mut inner = self.store.inner.lock().await;
        inner.delete(session, path, version)
    }
}
