// meshstore - coordination core for a small distributed file-storage cluster
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

//! Lamport's distributed mutual exclusion over arbitrary string resource
//! names. The `path:` prefix is used by the HTTP façade for per-upload-path
//! locks, but the scheme itself is domain-agnostic.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{oneshot, Mutex};

use crate::error::{MeshError, MeshResult};
use crate::message::hub::{MessageHandler, MessageHub};
use crate::message::{LockRequestPayload, LockResourcePayload, Message, MessageKind};
use crate::node::NodeRegistry;

struct LockEntry {
    timestamp: i64,
    granted_count: usize,
    grant_on_release: Vec<String>,
    wait_tx: Option<oneshot::Sender<()>>,
}

struct Inner {
    clock: i64,
    entries: HashMap<String, LockEntry>,
}

pub struct LockManager {
    registry: Arc<NodeRegistry>,
    hub: Arc<MessageHub>,
    inner: Mutex<Inner>,
}

impl LockManager {
    pub fn new(registry: Arc<NodeRegistry>, hub: Arc<MessageHub>) -> Arc<Self> {
        Arc::new(Self {
            registry,
            hub,
            inner: Mutex::new(Inner {
                clock: 0,
                entries: HashMap::new(),
            }),
        })
    }

    pub async fn listen(self: &Arc<Self>) {
        self.hub
            .subscribe(
                self.clone(),
                &[MessageKind::RequestLock, MessageKind::GrantLockPermission],
            )
            .await;
    }

    /// Acquires the distributed mutex on `resource`. Not reentrant: a
    /// second call on this node while the first is outstanding fails with
    /// `ResourceLockedLocally` rather than queueing.
    pub async fn lock_resource(&self, resource: &str) -> MeshResult<()> {
        let (rx, timestamp) = {
            let mut inner = self.inner.lock().await;

            if inner.entries.contains_key(resource) {
                return Err(MeshError::ResourceLockedLocally);
            }

            let (tx, rx) = oneshot::channel();
            let timestamp = inner.clock;

            inner.entries.insert(
                resource.to_string(),
                LockEntry {
                    timestamp,
                    granted_count: self.registry.len(),
                    grant_on_release: Vec::new(),
                    wait_tx: Some(tx),
                },
            );

            (rx, timestamp)
        };

        let payload = LockRequestPayload {
            resource: resource.to_string(),
            timestamp,
        };
        let msg = Message::new(MessageKind::RequestLock, &payload)?;
        self.hub.broadcast(msg).await;

        let _ = rx.await;

        Ok(())
    }

    /// Releases `resource`, granting every node that was deferred while
    /// this node held it.
    pub async fn unlock_resource(&self, resource: &str) {
        let grant_on_release = {
            let mut inner = self.inner.lock().await;
            inner.entries.remove(resource).map(|e| e.grant_on_release)
        };

        let Some(nodes) = grant_on_release else {
            return;
        };

        for node in nodes {
            let payload = LockResourcePayload {
                resource: resource.to_string(),
            };
            match Message::new(MessageKind::GrantLockPermission, &payload) {
                Ok(msg) => self.hub.send(msg, &node).await,
                Err(e) => warn!("Failed to encode grant for '{}': {}", resource, e),
            }
        }
    }

    async fn handle_request_lock(&self, msg: &Message) {
        let Ok(request) = msg.decode::<LockRequestPayload>() else {
            warn!("Malformed RequestLock payload from '{}'", msg.source_node);
            return;
        };

        let mut inner = self.inner.lock().await;

        let grant_now = match inner.entries.get(&request.resource) {
            None => true,
            Some(entry) if entry.granted_count == 0 => false,
            Some(entry) => {
                if entry.timestamp > request.timestamp {
                    true
                } else if entry.timestamp < request.timestamp {
                    false
                } else {
                    self.registry.this_name() >= msg.source_node.as_str()
                }
            }
        };

        if !grant_now {
            if let Some(entry) = inner.entries.get_mut(&request.resource) {
                entry.grant_on_release.push(msg.source_node.clone());
            }
        }

        inner.clock = inner.clock.max(request.timestamp) + 1;
        drop(inner);

        if grant_now {
            let payload = LockResourcePayload {
                resource: request.resource.clone(),
            };
            match Message::new(MessageKind::GrantLockPermission, &payload) {
                Ok(reply) => self.hub.send(reply, &msg.source_node).await,
                Err(e) => warn!("Failed to encode grant for '{}': {}", request.resource, e),
            }
        }
    }

    async fn handle_grant_lock_permission(&self, msg: &Message) {
        let Ok(grant) = msg.decode::<LockResourcePayload>() else {
            warn!("Malformed GrantLockPermission payload from '{}'", msg.source_node);
            return;
        };

        let mut inner = self.inner.lock().await;

        if let Some(entry) = inner.entries.get_mut(&grant.resource) {
            if entry.granted_count > 0 {
                entry.granted_count -= 1;
            }
            if entry.granted_count == 0 {
                if let Some(tx) = entry.wait_tx.take() {
                    let _ = tx.send(());
                }
            }
        }
    }
}

#[async_trait]
impl MessageHandler for LockManager {
    async fn handle_message(&self, msg: Message) {
        match msg.kind {
            MessageKind::RequestLock => self.handle_request_lock(&msg).await,
            MessageKind::GrantLockPermission => self.handle_grant_lock_permission(&msg).await,
            _ => {}
        }
    }
}
