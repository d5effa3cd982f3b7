// meshstore - coordination core for a small distributed file-storage cluster
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

use std::collections::HashMap;

use crate::config::{Config, NodeInfo};

/// Static directory of peers, loaded once from configuration.
///
/// Identifies "self" and provides lookup by name plus an ordered list of
/// peer names (including self, which is load-bearing for the Lock/Path/
/// Replication managers' quorum counts).
pub struct NodeRegistry {
    this: NodeInfo,
    nodes: HashMap<String, NodeInfo>,
    node_names: Vec<String>,
}

impl NodeRegistry {
    pub fn from_config(config: &Config) -> Self {
        let mut nodes = HashMap::new();
        let mut node_names = Vec::new();

        for node in &config.nodes {
            if !nodes.contains_key(&node.name) {
                node_names.push(node.name.clone());
            }
            nodes.insert(node.name.clone(), node.clone());
        }

        Self {
            this: config.this.clone(),
            nodes,
            node_names,
        }
    }

    /// This node's own identity.
    pub fn this(&self) -> &NodeInfo {
        &self.this
    }

    pub fn this_name(&self) -> &str {
        &self.this.name
    }

    /// Look up a peer by name. Returns `None` if unknown (callers that
    /// expect the name to exist, e.g. from a message's `source_node`,
    /// should prefer `Self::node` and surface `MeshError::UnknownNode`).
    pub fn lookup(&self, name: &str) -> Option<&NodeInfo> {
        if name == self.this.name {
            Some(&self.this)
        } else {
            self.nodes.get(name)
        }
    }

    /// Ordered list of all node names, including self.
    pub fn node_names(&self) -> &[String] {
        &self.node_names
    }

    /// Total registered node count, including self. This is the `N` used
    /// as the quorum size by the Lock, Path, and Replication managers.
    pub fn len(&self) -> usize {
        self.node_names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.node_names.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config() -> Config {
        Config {
            this: NodeInfo {
                name: "a".into(),
                public_address: "http://a".into(),
                private_address: "127.0.0.1:9001".into(),
            },
            nodes: vec![
                NodeInfo {
                    name: "a".into(),
                    public_address: "http://a".into(),
                    private_address: "127.0.0.1:9001".into(),
                },
                NodeInfo {
                    name: "b".into(),
                    public_address: "http://b".into(),
                    private_address: "127.0.0.1:9002".into(),
                },
            ],
            upload_dir: "uploads".into(),
        }
    }

    #[test]
    fn includes_self_in_node_names() {
        let registry = NodeRegistry::from_config(&sample_config());

        assert_eq!(registry.len(), 2);
        assert!(registry.node_names().contains(&"a".to_string()));
        assert!(registry.node_names().contains(&"b".to_string()));
    }

    #[test]
    fn lookup_resolves_self_and_peers() {
        let registry = NodeRegistry::from_config(&sample_config());

        assert_eq!(registry.lookup("a").unwrap().name, "a");
        assert_eq!(registry.lookup("b").unwrap().private_address, "127.0.0.1:9002");
        assert!(registry.lookup("c").is_none());
    }
}
