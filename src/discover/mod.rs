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

mod engine;
mod facade;
mod sorter;

use std::{fmt, str::FromStr};

pub use engine::ZkRegDiscover;
pub use facade::RegDiscover;
use serde::{Deserialize, Serialize};
pub use sorter::sort_nodes;

use crate::error::{Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ServiceType {
    ApiServer,
    WebServer,
    HostServer,
    TopoServer,
    ProcServer,
    EventServer,
    DataCollection,
    HostController,
    ObjectController,
    AuditController,
    ProcController,
}

impl ServiceType {
    pub const ALL: [ServiceType; 11] = [
        ServiceType::ApiServer,
        ServiceType::WebServer,
        ServiceType::HostServer,
        ServiceType::TopoServer,
        ServiceType::ProcServer,
        ServiceType::EventServer,
        ServiceType::DataCollection,
        ServiceType::HostController,
        ServiceType::ObjectController,
        ServiceType::AuditController,
        ServiceType::ProcController,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceType::ApiServer => "api-server",
            ServiceType::WebServer => "web-server",
            ServiceType::HostServer => "host-server",
            ServiceType::TopoServer => "topo-server",
            ServiceType::ProcServer => "proc-server",
            ServiceType::EventServer => "event-server",
            ServiceType::DataCollection => "data-collection",
            ServiceType::HostController => "host-controller",
            ServiceType::ObjectController => "object-controller",
            ServiceType::AuditController => "audit-controller",
            ServiceType::ProcController => "proc-controller",
        }
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        ServiceType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| Error::InvalidArgument(format!("unknown service type '{}'", s)))
    }
}

/// `<base>/<service type>`: the parent under which all instances of a
/// service type register.
pub fn service_path(base: &str, svc_type: ServiceType) -> String {
    format!("{}/{}", base.trim_end_matches('/'), svc_type)
}

/// `<base>/<service type>/<ip>`: the registration key of one instance.
pub fn registration_path(base: &str, svc_type: ServiceType, ip: &str) -> String {
    format!("{}/{}", service_path(base, svc_type), ip)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }
}

/// One live instance of a service, stored as JSON in its ephemeral node.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceEndpoint {
    #[serde(alias = "Scheme")]
    pub scheme: Scheme,
    #[serde(alias = "IP", alias = "Ip")]
    pub ip: String,
    #[serde(alias = "Port")]
    pub port: u16,
    #[serde(alias = "Version", default)]
    pub version: String,
    #[serde(alias = "Pid", default)]
    pub pid: u32,
}

impl ServiceEndpoint {
    pub fn new(ip: &str, port: u16, tls: bool) -> Self {
        Self {
            scheme: if tls { Scheme::Https } else { Scheme::Http },
            ip: ip.to_owned(),
            port,
            version: env!("CARGO_PKG_VERSION").to_owned(),
            pid: std::process::id(),
        }
    }

    pub fn address(&self) -> String {
        format!("{}://{}:{}", self.scheme.as_str(), self.ip, self.port)
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(payload: &str) -> Result<Self> {
        Ok(serde_json::from_str(payload)?)
    }
}

/// Snapshot of the live instances under one service path.
#[derive(Debug)]
pub struct DiscoverEvent {
    /// Last segment of the discovered path.
    pub service_type: String,
    /// Child node names, in sequence order.
    pub nodes: Vec<String>,
    /// Raw payloads of the children that could be read.
    pub servers: Vec<String>,
    pub err: Option<Error>,
}

impl DiscoverEvent {
    fn new(path: &str) -> Self {
        Self {
            service_type: path.rsplit('/').next().unwrap_or_default().to_owned(),
            nodes: Vec::new(),
            servers: Vec::new(),
            err: None,
        }
    }
}
