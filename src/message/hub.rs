// meshstore - coordination core for a small distributed file-storage cluster
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::SinkExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio_stream::StreamExt;
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use crate::error::MeshResult;
use crate::message::{Message, MessageKind};
use crate::node::NodeRegistry;

/// Registered for one or more `MessageKind`s; invoked once per inbound
/// message of a kind it's subscribed to, in registration order.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle_message(&self, msg: Message);
}

type PeerConnection = Framed<TcpStream, LengthDelimitedCodec>;

/// Typed, connection-oriented message bus between peers.
///
/// Owns the inbound listener (spawned by `listen`) and an outbound
/// connection cache keyed by peer private address. Dispatches inbound
/// messages to subscribed handlers by message kind.
pub struct MessageHub {
    registry: Arc<NodeRegistry>,
    handlers: Mutex<HashMap<MessageKind, Vec<Arc<dyn MessageHandler>>>>,
    connections: Mutex<HashMap<String, PeerConnection>>,
}

impl MessageHub {
    pub fn new(registry: Arc<NodeRegistry>) -> Arc<Self> {
        Arc::new(Self {
            registry,
            handlers: Mutex::new(HashMap::new()),
            connections: Mutex::new(HashMap::new()),
        })
    }

    /// Registers `handler` for each of `kinds`. Order of delivery to
    /// subscribers of the same kind is the registration order.
    pub async fn subscribe(&self, handler: Arc<dyn MessageHandler>, kinds: &[MessageKind]) {
        let mut handlers = self.handlers.lock().await;

        for kind in kinds {
            handlers.entry(*kind).or_insert_with(Vec::new).push(handler.clone());
        }
    }

    /// Binds a stream listener on `bind_address`; for each accepted
    /// connection spawns a reader task that repeatedly decodes
    /// length-delimited typed messages and dispatches each to every
    /// handler subscribed to its kind. Decode failures terminate the
    /// reader for that connection.
    pub async fn listen(self: Arc<Self>, bind_address: &str) -> MeshResult<()> {
        let listener = TcpListener::bind(bind_address).await?;

        info!("Message hub listening (addr = {})", bind_address);

        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, addr)) => {
                        debug!("Peer connected (addr = {})", addr);
                        let hub = self.clone();
                        tokio::spawn(async move {
                            hub.process_connection(stream).await;
                        });
                    }
                    Err(e) => {
                        warn!("Failed to accept peer connection: {}", e);
                    }
                }
            }
        });

        Ok(())
    }

    async fn process_connection(&self, stream: TcpStream) {
        let mut frame = Framed::new(stream, LengthDelimitedCodec::new());

        while let Some(next) = frame.next().await {
            let bytes = match next {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!("Peer connection read error: {}", e);
                    return;
                }
            };

            let msg = match Message::from_bytes(&bytes) {
                Ok(msg) => msg,
                Err(e) => {
                    warn!("Failed to decode peer message, dropping connection: {}", e);
                    return;
                }
            };

            self.dispatch(msg).await;
        }
    }

    async fn dispatch(&self, msg: Message) {
        let subscribers = {
            let handlers = self.handlers.lock().await;
            handlers.get(&msg.kind).cloned().unwrap_or_default()
        };

        for handler in subscribers {
            handler.handle_message(msg.clone()).await;
        }
    }

    /// Stamps `msg.source_node = self`, looks up the peer's private
    /// address, reuses a cached outbound connection (dialing one on first
    /// use), and encodes the message. Fire-and-forget: transport failures
    /// are logged and swallowed, never surfaced to the caller.
    pub async fn send(&self, mut msg: Message, node_name: &str) {
        msg.source_node = self.registry.this_name().to_string();

        let addr = match self.registry.lookup(node_name) {
            Some(node) => node.private_address.clone(),
            None => {
                warn!("Send to unknown node '{}' dropped", node_name);
                return;
            }
        };

        let bytes = match msg.to_bytes() {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Failed to encode message for '{}': {}", node_name, e);
                return;
            }
        };

        let mut connections = self.connections.lock().await;

        if let Some(conn) = connections.get_mut(&addr) {
            if conn.send(Bytes::from(bytes.clone())).await.is_ok() {
                return;
            }
            // Cached connection is dead; evict and fall through to redial.
            connections.remove(&addr);
        }

        match TcpStream::connect(&addr).await {
            Ok(stream) => {
                let mut conn = Framed::new(stream, LengthDelimitedCodec::new());
                if let Err(e) = conn.send(Bytes::from(bytes)).await {
                    warn!("Failed to send message to '{}' ({}): {}", node_name, addr, e);
                    return;
                }
                connections.insert(addr, conn);
            }
            Err(e) => {
                warn!("Failed to dial node '{}' ({}): {}", node_name, addr, e);
            }
        }
    }

    /// Identical to `send`, but opens a fresh connection rather than
    /// reusing the cache. Used for large payloads (file replication) where
    /// head-of-line blocking on the cached connection is undesirable.
    pub async fn send_in_new_connection(&self, mut msg: Message, node_name: &str) {
        msg.source_node = self.registry.this_name().to_string();

        let addr = match self.registry.lookup(node_name) {
            Some(node) => node.private_address.clone(),
            None => {
                warn!("Send to unknown node '{}' dropped", node_name);
                return;
            }
        };

        let bytes = match msg.to_bytes() {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Failed to encode message for '{}': {}", node_name, e);
                return;
            }
        };

        match TcpStream::connect(&addr).await {
            Ok(stream) => {
                let mut conn = Framed::new(stream, LengthDelimitedCodec::new());
                if let Err(e) = conn.send(Bytes::from(bytes)).await {
                    warn!("Failed to send message to '{}' ({}): {}", node_name, addr, e);
                }
            }
            Err(e) => {
                warn!("Failed to dial node '{}' ({}): {}", node_name, addr, e);
            }
        }
    }

    /// Sends `msg` to every peer in the registry, including self when the
    /// registry lists self (load-bearing for quorum counts of N including
    /// self's own acknowledgment of its own request).
    pub async fn broadcast(&self, msg: Message) {
        for name in self.registry.node_names().to_vec() {
            self.send(msg.clone(), &name).await;
        }
    }

    /// `broadcast`, but via `send_in_new_connection` per peer.
    pub async fn broadcast_in_new_connection(&self, msg: Message) {
        for name in self.registry.node_names().to_vec() {
            self.send_in_new_connection(msg.clone(), &name).await;
        }
    }
}
