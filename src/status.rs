// meshstore - coordination core for a small distributed file-storage cluster
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

//! Tracks local request load and token count, periodically broadcasts its
//! status, collects peer statuses, and exposes the node-selection policy
//! used to decide which peer handles an upload or download.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::seq::SliceRandom;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time;

use crate::message::hub::{MessageHandler, MessageHub};
use crate::message::{Message, MessageKind, StatusPayload};
use crate::node::NodeRegistry;

const BROADCAST_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct NodeStatus {
    pub requests_per_minute: i64,
    pub request_counter: i64,
    pub token_count: i64,
}

struct Inner {
    this: NodeStatus,
    statuses: HashMap<String, NodeStatus>,
}

pub struct StatusManager {
    registry: Arc<NodeRegistry>,
    hub: Arc<MessageHub>,
    inner: Mutex<Inner>,
}

impl StatusManager {
    pub fn new(registry: Arc<NodeRegistry>, hub: Arc<MessageHub>) -> Arc<Self> {
        Arc::new(Self {
            registry,
            hub,
            inner: Mutex::new(Inner {
                this: NodeStatus::default(),
                statuses: HashMap::new(),
            }),
        })
    }

    pub async fn listen(self: &Arc<Self>) {
        self.hub.subscribe(self.clone(), &[MessageKind::Status]).await;

        let status_manager = self.clone();
        tokio::spawn(async move {
            let mut ticker = time::interval(BROADCAST_INTERVAL);
            loop {
                ticker.tick().await;
                status_manager.broadcast_status().await;
            }
        });
    }

    async fn broadcast_status(&self) {
        let payload = {
            let mut inner = self.inner.lock().await;

            inner.this.requests_per_minute = inner.this.request_counter * 6;
            inner.this.request_counter = 0;

            let this_name = self.registry.this_name().to_string();
            inner.statuses.insert(this_name, inner.this);

            StatusPayload {
                requests_per_minute: inner.this.requests_per_minute,
                token_count: inner.this.token_count,
                request_counter: inner.this.request_counter,
            }
        };

        match Message::new(MessageKind::Status, &payload) {
            Ok(msg) => self.hub.broadcast(msg).await,
            Err(e) => warn!("Failed to encode status broadcast: {}", e),
        }
    }

    pub async fn count_request(&self) {
        self.inner.lock().await.this.request_counter += 1;
    }

    pub async fn token_added(&self) {
        self.inner.lock().await.this.token_count += 1;
    }

    pub async fn token_deleted(&self) {
        self.inner.lock().await.this.token_count -= 1;
    }

    pub async fn status(&self) -> HashMap<String, NodeStatus> {
        self.inner.lock().await.statuses.clone()
    }

    /// Uniformly random pick over the full node-name list, including self.
    pub fn choose_node_for_upload(&self) -> Option<String> {
        self.registry.node_names().choose(&mut rand::thread_rng()).cloned()
    }

    pub fn choose_node_for_download(&self) -> Option<String> {
        self.registry.node_names().choose(&mut rand::thread_rng()).cloned()
    }
}

#[async_trait]
impl MessageHandler for StatusManager {
    async fn handle_message(&self, msg: Message) {
        let Ok(payload) = msg.decode::<StatusPayload>() else {
            warn!("Malformed Status payload from '{}'", msg.source_node);
            return;
        };

        let status = NodeStatus {
            requests_per_minute: payload.requests_per_minute,
            request_counter: payload.request_counter,
            token_count: payload.token_count,
        };

        self.inner.lock().await.statuses.insert(msg.source_node, status);
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
                private_address: "127.0.0.1:19201".into(),
            },
            nodes: vec![
                NodeInfo {
                    name: "a".into(),
                    public_address: "http://a".into(),
                    private_address: "127.0.0.1:19201".into(),
                },
                NodeInfo {
                    name: "b".into(),
                    public_address: "http://b".into(),
                    private_address: "127.0.0.1:19202".into(),
                },
            ],
            upload_dir: "uploads".into(),
        };
        Arc::new(NodeRegistry::from_config(&config))
    }

    #[tokio::test]
    async fn requests_per_minute_scales_and_resets() {
        let registry = registry();
        let hub = MessageHub::new(registry.clone());
        let status_manager = StatusManager::new(registry, hub);

        for _ in 0..5 {
            status_manager.count_request().await;
        }

        status_manager.broadcast_status().await;

        let this_status = status_manager.status().await.get("a").cloned().unwrap();
        assert_eq!(this_status.requests_per_minute, 30);
        assert_eq!(this_status.request_counter, 0);
    }

    #[tokio::test]
    async fn choose_node_picks_from_registry() {
        let registry = registry();
        let hub = MessageHub::new(registry.clone());
        let status_manager = StatusManager::new(registry, hub);

        for _ in 0..10 {
            let chosen = status_manager.choose_node_for_upload().unwrap();
            assert!(chosen == "a" || chosen == "b");
        }
    }

    #[tokio::test]
    async fn token_counters_move_up_and_down() {
        let registry = registry();
        let hub = MessageHub::new(registry.clone());
        let status_manager = StatusManager::new(registry, hub);

        status_manager.token_added().await;
        status_manager.token_added().await;
        status_manager.token_deleted().await;

        status_manager.broadcast_status().await;
        let this_status = status_manager.status().await.get("a").cloned().unwrap();
        assert_eq!(this_status.token_count, 1);
    }
}
