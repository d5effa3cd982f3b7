// meshstore - coordination core for a small distributed file-storage cluster
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

//! Bundles the coordination core's managers behind one handle so the HTTP
//! façade can share them across `actix-web` workers via `web::Data`.

use std::path::PathBuf;
use std::sync::Arc;

use crate::config::Config;
use crate::error::MeshResult;
use crate::lock::LockManager;
use crate::message::hub::MessageHub;
use crate::node::NodeRegistry;
use crate::path::PathManager;
use crate::replication::ReplicationManager;
use crate::status::StatusManager;
use crate::token::TokenManager;

pub struct MeshServer {
    pub registry: Arc<NodeRegistry>,
    pub hub: Arc<MessageHub>,
    pub lock_manager: Arc<LockManager>,
    pub path_manager: Arc<PathManager>,
    pub status_manager: Arc<StatusManager>,
    pub token_manager: Arc<TokenManager>,
    pub replication_manager: Arc<ReplicationManager>,
    pub upload_dir: PathBuf,
}

impl MeshServer {
    pub fn new(config: &Config) -> Arc<Self> {
        let registry = Arc::new(NodeRegistry::from_config(config));
        let hub = MessageHub::new(registry.clone());
        let upload_dir = PathBuf::from(&config.upload_dir);

        let lock_manager = LockManager::new(registry.clone(), hub.clone());
        let path_manager = PathManager::new(registry.clone(), hub.clone());
        let status_manager = StatusManager::new(registry.clone(), hub.clone());
        let token_manager = TokenManager::new(
            registry.clone(),
            hub.clone(),
            status_manager.clone(),
            path_manager.clone(),
            upload_dir.clone(),
        );
        let replication_manager = ReplicationManager::new(registry.clone(), hub.clone(), upload_dir.clone());

        Arc::new(Self {
            registry,
            hub,
            lock_manager,
            path_manager,
            status_manager,
            token_manager,
            replication_manager,
            upload_dir,
        })
    }

    /// Starts the peer listener and every manager's background task.
    /// Call once at startup, before the HTTP server begins accepting.
    pub async fn listen(self: &Arc<Self>, bind_address: &str) -> MeshResult<()> {
        self.hub.clone().listen(bind_address).await?;

        self.lock_manager.listen().await;
        self.path_manager.listen().await;
        self.status_manager.listen().await;
        self.token_manager.listen().await;
        self.replication_manager.listen().await;

        Ok(())
    }
}
