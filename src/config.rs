// meshstore - coordination core for a small distributed file-storage cluster
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::MeshResult;

/// One peer's identity and addresses.
///
/// `private_address` is the peer-to-peer bind address the Message Hub dials;
/// `public_address` is what's handed back to HTTP clients for upload/download.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct NodeInfo {
    pub name: String,
    pub public_address: String,
    pub private_address: String,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct Config {
    pub this: NodeInfo,

    pub nodes: Vec<NodeInfo>,

    pub upload_dir: String,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> MeshResult<Self> {
        let raw = std::fs::read(path)?;

        let config: Config = serde_json::from_slice(&raw)?;

        Ok(config)
    }
}
