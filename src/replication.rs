// meshstore - coordination core for a small distributed file-storage cluster
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

//! Ships a freshly uploaded file's bytes to every peer and waits for a
//! quorum of acknowledgments. Uses fresh connections per send since file
//! payloads are large and would otherwise head-of-line-block the cached
//! connection used for small coordination messages.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::fs;
use tokio::sync::{oneshot, Mutex};

use crate::message::hub::{MessageHandler, MessageHub};
use crate::message::{FilePayload, Message, MessageKind, PathPayload};
use crate::node::NodeRegistry;

struct ReplicationEntry {
    pending_acks: usize,
    wait_tx: Option<oneshot::Sender<()>>,
}

pub struct ReplicationManager {
    registry: Arc<NodeRegistry>,
    hub: Arc<MessageHub>,
    upload_dir: PathBuf,
    inner: Mutex<HashMap<String, ReplicationEntry>>,
}

impl ReplicationManager {
    pub fn new(registry: Arc<NodeRegistry>, hub: Arc<MessageHub>, upload_dir: PathBuf) -> Arc<Self> {
        Arc::new(Self {
            registry,
            hub,
            upload_dir,
            inner: Mutex::new(HashMap::new()),
        })
    }

    pub async fn listen(self: &Arc<Self>) {
        self.hub
            .subscribe(self.clone(), &[MessageKind::File, MessageKind::FileReceived])
            .await;
    }

    /// Reads `path` from the upload directory and ships it to every peer,
    /// blocking until all have acknowledged receipt. A read failure is
    /// logged and the call returns without replicating.
    pub async fn replicate_file(&self, path: &str) {
        let full_path = self.upload_dir.join(path);

        let file_data = match fs::read(&full_path).await {
            Ok(data) => data,
            Err(e) => {
                error!("Failed to read '{}' for replication: {}", full_path.display(), e);
                return;
            }
        };

        let rx = {
            let mut inner = self.inner.lock().await;
            let (tx, rx) = oneshot::channel();

            inner.insert(
                path.to_string(),
                ReplicationEntry {
                    pending_acks: self.registry.len(),
                    wait_tx: Some(tx),
                },
            );

            rx
        };

        let payload = FilePayload {
            path: path.to_string(),
            file_data,
        };

        match Message::new(MessageKind::File, &payload) {
            Ok(msg) => self.hub.broadcast_in_new_connection(msg).await,
            Err(e) => {
                warn!("Failed to encode File message for '{}': {}", path, e);
                self.inner.lock().await.remove(path);
                return;
            }
        }

        let _ = rx.await;
    }

    async fn handle_file(&self, msg: &Message) {
        let Ok(payload) = msg.decode::<FilePayload>() else {
            warn!("Malformed File payload from '{}'", msg.source_node);
            return;
        };

        let full_path = self.upload_dir.join(&payload.path);

        if let Some(parent) = full_path.parent() {
            if let Err(e) = fs::create_dir_all(parent).await {
                error!("Failed to create directory for '{}': {}", payload.path, e);
                return;
            }
        }

        if let Err(e) = fs::write(&full_path, &payload.file_data).await {
            error!("Failed to write replicated file '{}': {}", payload.path, e);
            let _ = fs::remove_file(&full_path).await;
            return;
        }

        let reply_payload = PathPayload { path: payload.path.clone() };
        match Message::new(MessageKind::FileReceived, &reply_payload) {
            Ok(reply) => self.hub.send(reply, &msg.source_node).await,
            Err(e) => warn!("Failed to encode FileReceived for '{}': {}", payload.path, e),
        }
    }

    async fn handle_file_received(&self, msg: &Message) {
        let Ok(payload) = msg.decode::<PathPayload>() else {
            warn!("Malformed FileReceived payload from '{}'", msg.source_node);
            return;
        };

        let mut inner = self.inner.lock().await;

        if let Some(entry) = inner.get_mut(&payload.path) {
            if entry.pending_acks > 0 {
                entry.pending_acks -= 1;
            }
            if entry.pending_acks == 0 {
                if let Some(tx) = entry.wait_tx.take() {
                    let _ = tx.send(());
                }
                inner.remove(&payload.path);
            }
        }
    }
}

#[async_trait]
impl MessageHandler for ReplicationManager {
    async fn handle_message(&self, msg: Message) {
        match msg.kind {
            MessageKind::File => self.handle_file(&msg).await,
            MessageKind::FileReceived => self.handle_file_received(&msg).await,
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
                private_address: "127.0.0.1:19401".into(),
            },
            nodes: vec![
                NodeInfo {
                    name: "a".into(),
                    public_address: "http://a".into(),
                    private_address: "127.0.0.1:19401".into(),
                },
                NodeInfo {
                    name: "b".into(),
                    public_address: "http://b".into(),
                    private_address: "127.0.0.1:19402".into(),
                },
            ],
            upload_dir: "uploads".into(),
        };
        Arc::new(NodeRegistry::from_config(&config))
    }

    #[tokio::test]
    async fn inbound_file_is_written_and_acked() {
        let registry = registry();
        let hub = MessageHub::new(registry.clone());
        let dir = tempfile::tempdir().unwrap();
        let replication_manager = ReplicationManager::new(registry, hub, dir.path().to_path_buf());

        let payload = FilePayload {
            path: "photos/cat.jpg".into(),
            file_data: b"xyz".to_vec(),
        };
        let mut msg = Message::new(MessageKind::File, &payload).unwrap();
        msg.source_node = "b".into();

        replication_manager.handle_file(&msg).await;

        let written = std::fs::read(dir.path().join("photos/cat.jpg")).unwrap();
        assert_eq!(written, b"xyz");
    }

    #[tokio::test]
    async fn quorum_acks_signal_exactly_once() {
        let registry = registry();
        let hub = MessageHub::new(registry.clone());
        let dir = tempfile::tempdir().unwrap();
        let replication_manager = ReplicationManager::new(registry, hub, dir.path().to_path_buf());

        let (tx, mut rx) = oneshot::channel();
        replication_manager.inner.lock().await.insert(
            "photos/cat.jpg".into(),
            ReplicationEntry {
                pending_acks: 2,
                wait_tx: Some(tx),
            },
        );

        let mut ack = Message::new(MessageKind::FileReceived, &PathPayload { path: "photos/cat.jpg".into() }).unwrap();
        ack.source_node = "a".into();

        replication_manager.handle_file_received(&ack).await;
        assert!(rx.try_recv().is_err());

        replication_manager.handle_file_received(&ack).await;
        assert!(rx.try_recv().is_ok());
    }
}
