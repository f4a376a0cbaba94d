// Persistent caches used by the snode client
//
// Every value is replaced whole; there are no partial updates. Read failures
// degrade to "nothing cached" and write failures are logged, since each of
// these caches can be rebuilt from the network.

use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashSet;
use tracing::warn;

use super::backend::{StorageBackend, StoreError};
use crate::snode::Snode;

const SNODE_POOL_KEY: &[u8] = b"snode_pool";
const SWARM_PREFIX: &str = "swarm:";
const LAST_HASH_PREFIX: &str = "last_hash:";
const RECEIVED_HASHES_KEY: &[u8] = b"received_hashes";
const ONION_PATHS_KEY: &[u8] = b"onion_paths";

/// Storage interface for the snode pool, swarms, polling cursors,
/// deduplication hashes and onion paths
pub trait SnodeDatabase: Send + Sync {
    fn snode_pool(&self) -> HashSet<Snode>;
    fn set_snode_pool(&self, pool: &HashSet<Snode>);

    fn swarm(&self, public_key: &str) -> Option<HashSet<Snode>>;
    fn set_swarm(&self, public_key: &str, swarm: &HashSet<Snode>);
    /// Public keys that have a cached swarm
    fn swarm_owners(&self) -> Vec<String>;

    fn last_message_hash(&self, node: &Snode) -> Option<String>;
    fn set_last_message_hash(&self, node: &Snode, hash: &str);

    /// Received message hashes, oldest first
    fn received_message_hashes(&self) -> Vec<String>;
    fn set_received_message_hashes(&self, hashes: &[String]);

    fn onion_paths(&self) -> Vec<Vec<Snode>>;
    fn set_onion_paths(&self, paths: &[Vec<Snode>]);
}

/// `SnodeDatabase` over any key-value backend, values encoded with bincode
pub struct KvDatabase<B: StorageBackend> {
    backend: B,
}

impl<B: StorageBackend> KvDatabase<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    fn load<T: DeserializeOwned>(&self, key: &[u8]) -> Option<T> {
        let result = self.backend.get(key).and_then(|value| {
            value
                .map(|bytes| {
                    bincode::deserialize(&bytes)
                        .map_err(|e| StoreError::Serialization(e.to_string()))
                })
                .transpose()
        });
        match result {
            Ok(value) => value,
            Err(e) => {
                warn!("Failed to load {}: {}", String::from_utf8_lossy(key), e);
                None
            }
        }
    }

    fn save<T: Serialize + ?Sized>(&self, key: &[u8], value: &T) {
        let result = bincode::serialize(value)
            .map_err(|e| StoreError::Serialization(e.to_string()))
            .and_then(|bytes| self.backend.put(key, &bytes));
        if let Err(e) = result {
            warn!("Failed to save {}: {}", String::from_utf8_lossy(key), e);
        }
    }
}

fn swarm_key(public_key: &str) -> Vec<u8> {
    format!("{}{}", SWARM_PREFIX, public_key).into_bytes()
}

fn last_hash_key(node: &Snode) -> Vec<u8> {
    format!("{}{}:{}", LAST_HASH_PREFIX, node.address, node.port).into_bytes()
}

impl<B: StorageBackend> SnodeDatabase for KvDatabase<B> {
    fn snode_pool(&self) -> HashSet<Snode> {
        self.load::<Vec<Snode>>(SNODE_POOL_KEY)
            .map(|nodes| nodes.into_iter().collect())
            .unwrap_or_default()
    }

    fn set_snode_pool(&self, pool: &HashSet<Snode>) {
        let nodes: Vec<&Snode> = pool.iter().collect();
        self.save(SNODE_POOL_KEY, &nodes);
    }

    fn swarm(&self, public_key: &str) -> Option<HashSet<Snode>> {
        self.load::<Vec<Snode>>(&swarm_key(public_key))
            .map(|nodes| nodes.into_iter().collect())
    }

    fn set_swarm(&self, public_key: &str, swarm: &HashSet<Snode>) {
        let nodes: Vec<&Snode> = swarm.iter().collect();
        self.save(&swarm_key(public_key), &nodes);
    }

    fn swarm_owners(&self) -> Vec<String> {
        match self.backend.scan_prefix(SWARM_PREFIX.as_bytes()) {
            Ok(entries) => entries
                .into_iter()
                .filter_map(|(key, _)| {
                    String::from_utf8(key[SWARM_PREFIX.len()..].to_vec()).ok()
                })
                .collect(),
            Err(e) => {
                warn!("Failed to list cached swarms: {}", e);
                Vec::new()
            }
        }
    }

    fn last_message_hash(&self, node: &Snode) -> Option<String> {
        self.load(&last_hash_key(node))
    }

    fn set_last_message_hash(&self, node: &Snode, hash: &str) {
        self.save(&last_hash_key(node), hash);
    }

    fn received_message_hashes(&self) -> Vec<String> {
        self.load(RECEIVED_HASHES_KEY).unwrap_or_default()
    }

    fn set_received_message_hashes(&self, hashes: &[String]) {
        self.save(RECEIVED_HASHES_KEY, hashes);
    }

    fn onion_paths(&self) -> Vec<Vec<Snode>> {
        self.load(ONION_PATHS_KEY).unwrap_or_default()
    }

    fn set_onion_paths(&self, paths: &[Vec<Snode>]) {
        self.save(ONION_PATHS_KEY, paths);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snode::test_snode;
    use crate::store::backend::MemoryStorage;

    fn db() -> KvDatabase<MemoryStorage> {
        KvDatabase::new(MemoryStorage::new())
    }

    #[test]
    fn test_pool_round_trip_keeps_keys() {
        let db = db();
        assert!(db.snode_pool().is_empty());

        let pool: HashSet<_> = (0..5).map(test_snode).collect();
        db.set_snode_pool(&pool);

        let loaded = db.snode_pool();
        assert_eq!(loaded, pool);
        assert!(loaded.iter().all(|n| n.key_set.is_some()));
    }

    #[test]
    fn test_swarms_are_per_key() {
        let db = db();
        assert!(db.swarm("alice").is_none());

        let swarm: HashSet<_> = (0..3).map(test_snode).collect();
        db.set_swarm("alice", &swarm);
        db.set_swarm("bob", &HashSet::new());

        assert_eq!(db.swarm("alice").unwrap().len(), 3);
        assert_eq!(db.swarm("bob").unwrap().len(), 0);

        let mut owners = db.swarm_owners();
        owners.sort();
        assert_eq!(owners, vec!["alice".to_string(), "bob".to_string()]);
    }

    #[test]
    fn test_last_hash_per_node() {
        let db = db();
        let a = test_snode(1);
        let b = test_snode(2);
        db.set_last_message_hash(&a, "hash-a");
        assert_eq!(db.last_message_hash(&a).as_deref(), Some("hash-a"));
        assert_eq!(db.last_message_hash(&b), None);
    }

    #[test]
    fn test_received_hashes_keep_order() {
        let db = db();
        let hashes = vec!["c".to_string(), "a".to_string(), "b".to_string()];
        db.set_received_message_hashes(&hashes);
        assert_eq!(db.received_message_hashes(), hashes);
    }

    #[test]
    fn test_paths_replaced_whole() {
        let db = db();
        db.set_onion_paths(&[vec![test_snode(1), test_snode(2)]]);
        db.set_onion_paths(&[vec![test_snode(3)], vec![test_snode(4)]]);
        let paths = db.onion_paths();
        assert_eq!(paths.len(), 2);
        assert_eq!(paths[0][0], test_snode(3));
    }

    #[test]
    fn test_corrupt_value_reads_as_empty() {
        let db = db();
        db.backend().put(SNODE_POOL_KEY, b"\xff\xff").unwrap();
        assert!(db.snode_pool().is_empty());
    }
}
