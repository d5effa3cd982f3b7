// meshstore - coordination core for a small distributed file-storage cluster
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MeshError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Encode/decode error: {0}")]
    Codec(#[from] bincode::Error),

    #[error("Config parse error: {0}")]
    Config(#[from] serde_json::Error),

    #[error("Bad query.")]
    BadQuery,

    #[error("File already exists.")]
    FileAlreadyExists,

    #[error("File does not exist.")]
    FileDoesNotExist,

    #[error("Path is locked.")]
    PathIsLocked,

    #[error("Resource is locked locally.")]
    ResourceLockedLocally,

    #[error("Token does not exist.")]
    TokenDoesNotExist,

    #[error("Failed to request token from remote node.")]
    FailedToRequestToken,

    #[error("Unknown node: {0}")]
    UnknownNode(String),
}

pub type MeshResult<T> = std::result::Result<T, MeshError>;
