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

use thiserror::Error;
use tonic::codegen::http::uri::InvalidUri;

#[derive(Error, Debug)]
pub enum Error {
    #[error("node '{0}' does not exist")]
    NoNode(String),
    #[error("node '{0}' already exists")]
    NodeExists(String),
    #[error("node '{0}' has children")]
    NotEmpty(String),
    #[error("version mismatch on node '{0}'")]
    BadVersion(String),
    #[error("connection closed")]
    ConnectionClosed,
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("no servers available for '{0}'")]
    NoServerAvailable(String),
    #[error("config: {0}")]
    Config(String),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Transport(#[from] tonic::transport::Error),
    #[error(transparent)]
    InvalidUri(#[from] InvalidUri),
}

impl Error {
    /// Errors that mean the coordination session is gone and must be
    /// re-established before retrying.
    pub fn is_connection_lost(&self) -> bool {
        matches!(self, Error::ConnectionClosed)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
