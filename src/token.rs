// meshstore - coordination core for a small distributed file-storage cluster
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

//! Issues time-limited upload/download tokens; forwards requests to
//! whichever peer the Status Manager chose and rendezvous the response
//! back to the originating request via a one-shot channel.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{oneshot, Mutex};
use tokio::time;
use uuid::Uuid;

use crate::error::{MeshError, MeshResult};
use crate::message::hub::{MessageHandler, MessageHub};
use crate::message::{Message, MessageKind, PathPayload, TokenPayload};
use crate::node::NodeRegistry;
use crate::path::PathManager;
use crate::status::StatusManager;

const TOKEN_TTL: Duration = Duration::from_secs(120);
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Upload,
    Download,
}

struct TokenInfo {
    path: String,
    expire_time: Instant,
}

struct Inner {
    upload_tokens: HashMap<String, TokenInfo>,
    download_tokens: HashMap<String, TokenInfo>,
    pending_upload: HashMap<String, oneshot::Sender<String>>,
    pending_download: HashMap<String, oneshot::Sender<String>>,
}

pub struct TokenManager {
    registry: Arc<NodeRegistry>,
    hub: Arc<MessageHub>,
    status: Arc<StatusManager>,
    path_manager: Arc<PathManager>,
    upload_dir: PathBuf,
    inner: Mutex<Inner>,
}

impl TokenManager {
    pub fn new(
        registry: Arc<NodeRegistry>,
        hub: Arc<MessageHub>,
        status: Arc<StatusManager>,
        path_manager: Arc<PathManager>,
        upload_dir: PathBuf,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry,
            hub,
            status,
            path_manager,
            upload_dir,
            inner: Mutex::new(Inner {
                upload_tokens: HashMap::new(),
                download_tokens: HashMap::new(),
                pending_upload: HashMap::new(),
                pending_download: HashMap::new(),
            }),
        })
    }

    pub async fn listen(self: &Arc<Self>) {
        self.hub
            .subscribe(
                self.clone(),
                &[
                    MessageKind::UploadToken,
                    MessageKind::DownloadToken,
                    MessageKind::RequestUploadToken,
                    MessageKind::RequestDownloadToken,
                ],
            )
            .await;

        let token_manager = self.clone();
        tokio::spawn(async move {
            let mut ticker = time::interval(SWEEP_INTERVAL);
            loop {
                ticker.tick().await;
                token_manager.sweep_expired().await;
            }
        });
    }

    /// Called by the HTTP façade after the Status Manager has picked
    /// `chosen_node`. If `chosen_node` is self, issues a token locally;
    /// otherwise forwards the request and awaits the peer's reply.
    pub async fn request_token(&self, path: &str, chosen_node: &str, kind: TokenKind) -> MeshResult<String> {
        if chosen_node == self.registry.this_name() {
            return self.create_local_token(path, kind).await;
        }

        let rx = {
            let mut inner = self.inner.lock().await;
            let (tx, rx) = oneshot::channel();

            match kind {
                TokenKind::Upload => inner.pending_upload.insert(path.to_string(), tx),
                TokenKind::Download => inner.pending_download.insert(path.to_string(), tx),
            };

            rx
        };

        let request_kind = match kind {
            TokenKind::Upload => MessageKind::RequestUploadToken,
            TokenKind::Download => MessageKind::RequestDownloadToken,
        };
        let payload = PathPayload { path: path.to_string() };
        let msg = Message::new(request_kind, &payload)?;
        self.hub.send(msg, chosen_node).await;

        let token = rx.await.unwrap_or_default();

        if token.is_empty() {
            return Err(MeshError::FailedToRequestToken);
        }

        Ok(token)
    }

    async fn create_local_token(&self, path: &str, kind: TokenKind) -> MeshResult<String> {
        let check_path = self.upload_dir.join(path);

        match kind {
            TokenKind::Upload => {
                if check_path.exists() {
                    return Err(MeshError::FileAlreadyExists);
                }
            }
            TokenKind::Download => {
                if !check_path.exists() {
                    return Err(MeshError::FileDoesNotExist);
                }
            }
        }

        let token = Uuid::new_v4().to_string();
        let info = TokenInfo {
            path: path.to_string(),
            expire_time: Instant::now() + TOKEN_TTL,
        };

        let mut inner = self.inner.lock().await;
        match kind {
            TokenKind::Upload => {
                inner.upload_tokens.insert(token.clone(), info);
            }
            TokenKind::Download => {
                inner.download_tokens.insert(token.clone(), info);
            }
        }
        drop(inner);

        self.status.token_added().await;

        Ok(token)
    }

    /// Pops the entry for `token`, or `TokenDoesNotExist` if it's bad,
    /// expired, or already consumed. Tokens are single-use.
    pub async fn get_path_by_token(&self, token: &str, kind: TokenKind) -> MeshResult<String> {
        let path = {
            let mut inner = self.inner.lock().await;
            let map = match kind {
                TokenKind::Upload => &mut inner.upload_tokens,
                TokenKind::Download => &mut inner.download_tokens,
            };
            map.remove(token).map(|info| info.path)
        };

        match path {
            Some(path) => {
                self.status.token_deleted().await;
                Ok(path)
            }
            None => Err(MeshError::TokenDoesNotExist),
        }
    }

    async fn sweep_expired(&self) {
        let now = Instant::now();
        let mut expired_upload_paths = Vec::new();

        {
            let mut inner = self.inner.lock().await;

            let expired: Vec<String> = inner
                .upload_tokens
                .iter()
                .filter(|(_, info)| info.expire_time < now)
                .map(|(token, _)| token.clone())
                .collect();

            for token in expired {
                if let Some(info) = inner.upload_tokens.remove(&token) {
                    expired_upload_paths.push(info.path);
                }
            }

            let expired: Vec<String> = inner
                .download_tokens
                .iter()
                .filter(|(_, info)| info.expire_time < now)
                .map(|(token, _)| token.clone())
                .collect();

            for token in expired {
                inner.download_tokens.remove(&token);
                self.status.token_deleted().await;
            }
        }

        for path in expired_upload_paths {
            self.path_manager.unlock_path(&path).await;
            self.status.token_deleted().await;
        }
    }

    async fn handle_request_token(&self, msg: &Message, kind: TokenKind) {
        let Ok(request) = msg.decode::<PathPayload>() else {
            warn!("Malformed token request payload from '{}'", msg.source_node);
            return;
        };

        let token = self
            .create_local_token(&request.path, kind)
            .await
            .unwrap_or_default();

        let reply_kind = match kind {
            TokenKind::Upload => MessageKind::UploadToken,
            TokenKind::Download => MessageKind::DownloadToken,
        };
        let payload = TokenPayload {
            path: request.path,
            token,
        };

        match Message::new(reply_kind, &payload) {
            Ok(reply) => self.hub.send(reply, &msg.source_node).await,
            Err(e) => warn!("Failed to encode token reply: {}", e),
        }
    }

    async fn handle_token_reply(&self, msg: &Message, kind: TokenKind) {
        let Ok(response) = msg.decode::<TokenPayload>() else {
            warn!("Malformed token reply from '{}'", msg.source_node);
            return;
        };

        let mut inner = self.inner.lock().await;
        let pending = match kind {
            TokenKind::Upload => &mut inner.pending_upload,
            TokenKind::Download => &mut inner.pending_download,
        };

        if let Some(tx) = pending.remove(&response.path) {
            let _ = tx.send(response.token);
        }
    }
}

#[async_trait]
impl MessageHandler for TokenManager {
    async fn handle_message(&self, msg: Message) {
        match msg.kind {
            MessageKind::RequestUploadToken => self.handle_request_token(&msg, TokenKind::Upload).await,
            MessageKind::RequestDownloadToken => self.handle_request_token(&msg, TokenKind::Download).await,
            MessageKind::UploadToken => self.handle_token_reply(&msg, TokenKind::Upload).await,
            MessageKind::DownloadToken => self.handle_token_reply(&msg, TokenKind::Download).await,
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, NodeInfo};

    fn setup() -> (Arc<NodeRegistry>, Arc<MessageHub>, Arc<StatusManager>, Arc<PathManager>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            this: NodeInfo {
                name: "a".into(),
                public_address: "http://a".into(),
                private_address: "127.0.0.1:19301".into(),
            },
            nodes: vec![NodeInfo {
                name: "a".into(),
                public_address: "http://a".into(),
                private_address: "127.0.0.1:19301".into(),
            }],
            upload_dir: dir.path().to_string_lossy().to_string(),
        };
        let registry = Arc::new(NodeRegistry::from_config(&config));
        let hub = MessageHub::new(registry.clone());
        let status = StatusManager::new(registry.clone(), hub.clone());
        let path_manager = PathManager::new(registry.clone(), hub.clone());

        (registry, hub, status, path_manager, dir)
    }

    #[tokio::test]
    async fn upload_token_rejects_existing_file() {
        let (registry, hub, status, path_manager, dir) = setup();
        let token_manager = TokenManager::new(registry, hub, status, path_manager, dir.path().to_path_buf());

        std::fs::write(dir.path().join("cat.jpg"), b"existing").unwrap();

        let result = token_manager.create_local_token("cat.jpg", TokenKind::Upload).await;
        assert!(matches!(result, Err(MeshError::FileAlreadyExists)));
    }

    #[tokio::test]
    async fn download_token_rejects_missing_file() {
        let (registry, hub, status, path_manager, dir) = setup();
        let token_manager = TokenManager::new(registry, hub, status, path_manager, dir.path().to_path_buf());

        let result = token_manager.create_local_token("missing.jpg", TokenKind::Download).await;
        assert!(matches!(result, Err(MeshError::FileDoesNotExist)));
    }

    #[tokio::test]
    async fn token_is_single_use() {
        let (registry, hub, status, path_manager, dir) = setup();
        let token_manager = TokenManager::new(registry, hub, status, path_manager, dir.path().to_path_buf());

        let token = token_manager.create_local_token("cat.jpg", TokenKind::Upload).await.unwrap();

        let path = token_manager.get_path_by_token(&token, TokenKind::Upload).await.unwrap();
        assert_eq!(path, "cat.jpg");

        let second = token_manager.get_path_by_token(&token, TokenKind::Upload).await;
        assert!(matches!(second, Err(MeshError::TokenDoesNotExist)));
    }
}
