// meshstore - coordination core for a small distributed file-storage cluster
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

//! Typed message envelope and payload structs for the peer wire protocol.
//!
//! Every frame on a peer connection is one bincode-encoded `Message`. The
//! envelope carries a `kind` tag and the stamped `source_node`; `payload` is
//! opaque bytes whose shape is determined by `kind` (see the table in
//! SPEC_FULL.md §6) and is itself bincode-encoded separately so a handler
//! only decodes the payload types it understands.

pub mod hub;

use serde::{Deserialize, Serialize};

use crate::error::MeshResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageKind {
    Status = 0,
    RequestUploadToken = 1,
    RequestDownloadToken = 2,
    UploadToken = 3,
    DownloadToken = 4,
    RequestLock = 5,
    GrantLockPermission = 6,
    LockPath = 7,
    PathLocked = 8,
    UnlockPath = 9,
    File = 10,
    FileReceived = 11,
}

/// The message envelope stamped and dispatched by the Message Hub.
///
/// `source_node` is set by `MessageHub::send`/`broadcast`, never by the
/// caller constructing the message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub kind: MessageKind,
    pub source_node: String,
    pub payload: Vec<u8>,
}

impl Message {
    /// Build a message of `kind` carrying `payload`, with an empty
    /// `source_node` — the hub fills it in on send.
    pub fn new<T: Serialize>(kind: MessageKind, payload: &T) -> MeshResult<Self> {
        Ok(Self {
            kind,
            source_node: String::new(),
            payload: bincode::serialize(payload)?,
        })
    }

    pub fn decode<'a, T: Deserialize<'a>>(&'a self) -> MeshResult<T> {
        Ok(bincode::deserialize(&self.payload)?)
    }

    pub fn to_bytes(&self) -> MeshResult<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> MeshResult<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

/// `Status` payload: local request load and token count.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusPayload {
    pub requests_per_minute: i64,
    pub token_count: i64,
    pub request_counter: i64,
}

/// Shared payload shape for every message kind that carries only a path:
/// `RequestUploadToken`, `RequestDownloadToken`, `LockPath`, `PathLocked`,
/// `UnlockPath`, `FileReceived`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathPayload {
    pub path: String,
}

/// `UploadToken` / `DownloadToken` payload. An empty `token` encodes
/// failure on the peer that was asked to issue it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenPayload {
    pub path: String,
    pub token: String,
}

/// `RequestLock` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockRequestPayload {
    pub resource: String,
    pub timestamp: i64,
}

/// `GrantLockPermission` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockResourcePayload {
    pub resource: String,
}

/// `File` payload: replicated file bytes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilePayload {
    pub path: String,
    pub file_data: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_round_trips_through_bytes() {
        let payload = StatusPayload {
            requests_per_minute: 12,
            token_count: 3,
            request_counter: 2,
        };

        let mut msg = Message::new(MessageKind::Status, &payload).unwrap();
        msg.source_node = "node-a".into();

        let bytes = msg.to_bytes().unwrap();
        let decoded = Message::from_bytes(&bytes).unwrap();

        assert_eq!(decoded.kind, MessageKind::Status);
        assert_eq!(decoded.source_node, "node-a");

        let decoded_payload: StatusPayload = decoded.decode().unwrap();
        assert_eq!(decoded_payload.requests_per_minute, 12);
        assert_eq!(decoded_payload.token_count, 3);
        assert_eq!(decoded_payload.request_counter, 2);
    }

    #[test]
    fn path_payload_round_trips() {
        let payload = PathPayload {
            path: "photos/cat.jpg".into(),
        };

        let msg = Message::new(MessageKind::LockPath, &payload).unwrap();
        let decoded: PathPayload = msg.decode().unwrap();

        assert_eq!(decoded.path, "photos/cat.jpg");
    }

    #[test]
    fn file_payload_carries_bytes() {
        let payload = FilePayload {
            path: "photos/cat.jpg".into(),
            file_data: b"xyz".to_vec(),
        };

        let msg = Message::new(MessageKind::File, &payload).unwrap();
        let decoded: FilePayload = msg.decode().unwrap();

        assert_eq!(decoded.file_data, b"xyz");
    }
}
