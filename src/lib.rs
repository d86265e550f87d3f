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

//! Service registration and discovery on top of a ZooKeeper style
//! coordination store.
//!
//! Every service process embeds a [`ServiceDiscover`]: it keeps the
//! process's own endpoint registered as an ephemeral sequential node under
//! `<base>/<service type>/<ip>`, watches the groups of the services it
//! calls, and answers "give me a server of type X" from a local cache.

pub mod config;
pub mod coordinator;
pub mod discover;
pub mod error;
pub mod rdiscover;

pub use config::DiscoverConfig;
pub use coordinator::{Coordinator, MemCoordinator, MemStore};
pub use discover::{
    registration_path, service_path, sort_nodes, DiscoverEvent, RegDiscover, Scheme,
    ServiceEndpoint, ServiceType, ZkRegDiscover,
};
pub use error::{Error, Result};
pub use rdiscover::{PeerAddressCache, ServiceDiscover};
