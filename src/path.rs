// meshstore - coordination core for a small distributed file-storage cluster
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

//! Two-phase path announcement: a lightweight coordination layer used
//! *inside* a held Lock Manager resource lock to assert that a concrete
//! upload path is in-use cluster-wide. Unlike the Lock Manager, this has
//! no ordering or Lamport arbitration, and is only safe when callers have
//! already serialized access via a covering resource name.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{oneshot, Mutex};

use crate::error::{MeshError, MeshResult};
use crate::message::hub::{MessageHandler, MessageHub};
use crate::message::{Message, MessageKind, PathPayload};
use crate::node::NodeRegistry;

/// Present for a locally-originated lock; `None` (a sentinel) marks a
/// remote-origin entry we're merely tracking on behalf of a peer.
struct PathEntry {
    peer_ack_count: usize,
    wait_tx: Option<oneshot::Sender<()>>,
}

pub struct PathManager {
    registry: Arc<NodeRegistry>,
    hub: Arc<MessageHub>,
    inner: Mutex<HashMap<String, Option<PathEntry>>>,
}

impl PathManager {
    pub fn new(registry: Arc<NodeRegistry>, hub: Arc<MessageHub>) -> Arc<Self> {
        Arc::new(Self {
            registry,
            hub,
            inner: Mutex::new(HashMap::new()),
        })
    }

    pub async fn listen(self: &Arc<Self>) {
        self.hub
            .subscribe(
                self.clone(),
                &[MessageKind::LockPath, MessageKind::PathLocked, MessageKind::UnlockPath],
            )
            .await;
    }

    pub async fn is_locked(&self, path: &str) -> bool {
        self.inner.lock().await.contains_key(path)
    }

    /// Announces `path` as in-use and blocks until every peer has
    /// acknowledged with `PathLocked`. The check-then-insert happens under
    /// a single critical section (the original Go source races here; this
    /// is the fix called for in its own re-architecture notes).
    pub async fn lock_path(&self, path: &str) -> MeshResult<()> {
        let rx = {
            let mut inner = self.inner.lock().await;

            if inner.contains_key(path) {
                return Err(MeshError::PathIsLocked);
            }

            let (tx, rx) = oneshot::channel();

            inner.insert(
                path.to_string(),
                Some(PathEntry {
                    peer_ack_count: self.registry.len(),
                    wait_tx: Some(tx),
                }),
            );

            rx
        };

        let payload = PathPayload { path: path.to_string() };
        let msg = Message::new(MessageKind::LockPath, &payload)?;
        self.hub.broadcast(msg).await;

        let _ = rx.await;

        Ok(())
    }

    pub async fn unlock_path(&self, path: &str) {
        self.inner.lock().await.remove(path);

        let payload = PathPayload { path: path.to_string() };
        match Message::new(MessageKind::UnlockPath, &payload) {
            Ok(msg) => self.hub.broadcast(msg).await,
            Err(e) => warn!("Failed to encode UnlockPath for '{}': {}", path, e),
        }
    }

    async fn handle_lock_path(&self, msg: &Message) {
        let Ok(payload) = msg.decode::<PathPayload>() else {
            warn!("Malformed LockPath payload from '{}'", msg.source_node);
            return;
        };

        self.inner.lock().await.insert(payload.path.clone(), None);

        let reply_payload = PathPayload { path: payload.path };
        match Message::new(MessageKind::PathLocked, &reply_payload) {
            Ok(reply) => self.hub.send(reply, &msg.source_node).await,
            Err(e) => warn!("Failed to encode PathLocked: {}", e),
        }
    }

    async fn handle_path_locked(&self, msg: &Message) {
        let Ok(payload) = msg.decode::<PathPayload>() else {
            warn!("Malformed PathLocked payload from '{}'", msg.source_node);
            return;
        };

        let mut inner = self.inner.lock().await;

        if let Some(Some(entry)) = inner.get_mut(&payload.path) {
            if entry.peer_ack_count > 0 {
                entry.peer_ack_count -= 1;
            }
            if entry.peer_ack_count == 0 {
                if let Some(tx) = entry.wait_tx.take() {
                    let _ = tx.send(());
                }
            }
        }
    }

    async fn handle_unlock_path(&self, msg: &Message) {
        let Ok(payload) = msg.decode::<PathPayload>() else {
            warn!("Malformed UnlockPath payload from '{}'", msg.source_node);
            return;
        };

        self.inner.lock().await.remove(&payload.path);
    }
}

#[async_trait]
impl MessageHandler for PathManager {
    async fn handle_message(&self, msg: Message) {
        match msg.kind {
            MessageKind::LockPath => self.handle_lock_path(&msg).await,
            MessageKind::PathLocked => self.handle_path_locked(&msg).await,
            MessageKind::UnlockPath => self.handle_unlock_path(&msg).await,
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, NodeInfo};

    fn registry() -> Arc<NodeRegistry> {
        let config = Config {
            this: NodeInfo {
                name: "a".into(),
                public_address: "http://a".into(),
                private_address: "127.0.0.1:19101".into(),
            },
            nodes: vec![
                NodeInfo {
                    name: "a".into(),
                    public_address: "http://a".into(),
                    private_address: "127.0.0.1:19101".into(),
                },
                NodeInfo {
                    name: "b".into(),
                    public_address: "http://b".into(),
                    private_address: "127.0.0.1:19102".into(),
                },
            ],
            upload_dir: "uploads".into(),
        };
        Arc::new(NodeRegistry::from_config(&config))
    }

    #[tokio::test]
    async fn quorum_signals_exactly_once() {
        let registry = registry();
        let hub = MessageHub::new(registry.clone());
        let path_manager = PathManager::new(registry, hub);

        {
            let mut inner = path_manager.inner.lock().await;
            let (tx, mut rx) = oneshot::channel();
            inner.insert(
                "photos/cat.jpg".into(),
                Some(PathEntry {
                    peer_ack_count: 2,
                    wait_tx: Some(tx),
                }),
            );
            drop(inner);

            let mut ack = Message::new(MessageKind::PathLocked, &PathPayload { path: "photos/cat.jpg".into() }).unwrap();
            ack.source_node = "a".into();
            path_manager.handle_path_locked(&ack).await;
            assert!(rx.try_recv().is_err());

            path_manager.handle_path_locked(&ack).await;
            assert!(rx.try_recv().is_ok());
        }
    }

    #[tokio::test]
    async fn remote_lock_path_inserts_sentinel() {
        let registry = registry();
        let hub = MessageHub::new(registry.clone());
        let path_manager = PathManager::new(registry, hub);

        let mut msg = Message::new(MessageKind::LockPath, &PathPayload { path: "x/y".into() }).unwrap();
        msg.source_node = "b".into();

        path_manager.handle_lock_path(&msg).await;

        assert!(path_manager.is_locked("x/y").await);
    }
}
