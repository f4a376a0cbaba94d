// Snode: storage node identity and RPC surface
//
// A snode is addressed by scheme+host and port. Two records pointing at the
// same network location are the same node for caching purposes, whatever key
// set they carry.

pub mod directory;
pub mod parse;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

pub use directory::{SnodeDirectory, SnodeRpc};
pub use parse::{parse_service_node_states, parse_snodes};

/// Placeholder address reported by nodes that have not announced a public IP
pub const PLACEHOLDER_ADDRESS: &str = "0.0.0.0";

/// Public keys of a snode, hex encoded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnodeKeySet {
    /// Ed25519 identity key, used as the routing identity inside onion layers
    pub ed25519_key: String,
    /// X25519 key, used to encrypt the onion layer addressed to this node
    pub x25519_key: String,
}

/// A storage node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snode {
    /// Scheme and host, e.g. `https://203.0.113.7`
    pub address: String,
    pub port: u16,
    pub key_set: Option<SnodeKeySet>,
}

impl Snode {
    pub fn new(address: impl Into<String>, port: u16, key_set: Option<SnodeKeySet>) -> Self {
        Self {
            address: address.into(),
            port,
            key_set,
        }
    }

    /// Build a node from a bare IP as reported by the network (`https://` is implied)
    pub fn from_ip(ip: &str, port: u16, key_set: SnodeKeySet) -> Self {
        Self::new(format!("https://{}", ip), port, Some(key_set))
    }

    /// Full URL for an endpoint on this node
    pub fn url(&self, endpoint: &str) -> String {
        format!("{}:{}/{}", self.address, self.port, endpoint)
    }

    /// Key set, or `None` when this record was stored without full metadata
    pub fn keys(&self) -> Option<&SnodeKeySet> {
        self.key_set.as_ref()
    }
}

impl PartialEq for Snode {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address && self.port == other.port
    }
}

impl Eq for Snode {}

impl Hash for Snode {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.address.hash(state);
        self.port.hash(state);
    }
}

impl fmt::Display for Snode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

/// Storage RPC methods (`storage_rpc/v1`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcMethod {
    GetSwarm,
    GetMessages,
    SendMessage,
}

impl RpcMethod {
    /// Method name as understood by storage nodes
    pub fn as_str(&self) -> &'static str {
        match self {
            RpcMethod::GetSwarm => "get_snodes_for_pubkey",
            RpcMethod::GetMessages => "retrieve",
            RpcMethod::SendMessage => "store",
        }
    }
}

impl fmt::Display for RpcMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
pub(crate) fn test_snode(i: u16) -> Snode {
    Snode::new(
        format!("https://10.0.{}.{}", i / 256, i % 256),
        22021,
        Some(SnodeKeySet {
            ed25519_key: format!("{:064x}", i),
            x25519_key: format!("{:064x}", i),
        }),
    )
}
