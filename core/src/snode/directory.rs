// Snode directory: global pool, per-user swarms and failure bookkeeping
//
// The pool and failure counts live in memory; the pool and swarms are written
// through to the database. Every mutation replaces a whole collection so
// readers only ever see a consistent snapshot.
//
// Eviction happens in exactly one place: `report_failure` reaching the
// threshold. There is no background health check.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{parse_service_node_states, parse_snodes, RpcMethod, Snode};
use crate::config::NetworkConfig;
use crate::error::{ApiError, Result};
use crate::store::SnodeDatabase;
use crate::transport::http::{HttpClient, Verb};
use crate::util::random::{random_element, random_from_set, shuffled};
use crate::util::retry::{retry_if_needed, RetryPolicy};

/// Issues storage RPCs against a node on behalf of a user.
///
/// Implemented by the message transport; the directory uses it to look up
/// swarms so those lookups take the same route (onion or direct) as every
/// other storage call.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SnodeRpc: Send + Sync {
    async fn invoke(
        &self,
        method: RpcMethod,
        node: &Snode,
        public_key: &str,
        params: Value,
    ) -> Result<Value>;
}

pub struct SnodeDirectory {
    config: NetworkConfig,
    http: Arc<dyn HttpClient>,
    database: Arc<dyn SnodeDatabase>,
    pool: RwLock<HashSet<Snode>>,
    failure_counts: RwLock<HashMap<Snode, u32>>,
}

impl SnodeDirectory {
    pub fn new(
        config: NetworkConfig,
        http: Arc<dyn HttpClient>,
        database: Arc<dyn SnodeDatabase>,
    ) -> Self {
        let pool = database.snode_pool();
        debug!("Loaded snode pool with {} nodes", pool.len());
        Self {
            config,
            http,
            database,
            pool: RwLock::new(pool),
            failure_counts: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    /// Snapshot of the global pool
    pub fn snode_pool(&self) -> HashSet<Snode> {
        self.pool.read().clone()
    }

    /// Pool members with no recorded failures
    pub fn reliable_snode_pool(&self) -> HashSet<Snode> {
        let counts = self.failure_counts.read();
        self.pool
            .read()
            .iter()
            .filter(|node| counts.get(*node).copied().unwrap_or(0) == 0)
            .cloned()
            .collect()
    }

    pub fn failure_count(&self, node: &Snode) -> u32 {
        self.failure_counts.read().get(node).copied().unwrap_or(0)
    }

    fn set_snode_pool(&self, pool: HashSet<Snode>) {
        self.database.set_snode_pool(&pool);
        *self.pool.write() = pool;
    }

    /// A random pool member, refreshing the pool from a seed node first when
    /// it holds fewer than `minimum_snode_pool_count` entries
    pub async fn get_random_node(&self) -> Result<Snode> {
        let pool = self.snode_pool();
        if pool.len() >= self.config.minimum_snode_pool_count {
            return random_from_set(&pool)
                .cloned()
                .ok_or(ApiError::NoNodesAvailable);
        }

        let pool = self.refresh_snode_pool().await?;
        random_from_set(&pool)
            .cloned()
            .ok_or(ApiError::NoNodesAvailable)
    }

    /// Replace the pool with a fresh list from a seed node, whatever its size.
    /// The current pool is kept if every seed attempt fails.
    pub async fn refresh_snode_pool(&self) -> Result<HashSet<Snode>> {
        let policy = RetryPolicy::new(self.config.max_retry_count, self.config.retry_interval());
        let nodes = retry_if_needed(policy, || self.fetch_from_seed()).await?;

        let pool: HashSet<Snode> = nodes.into_iter().collect();
        info!("Persisting snode pool with {} nodes", pool.len());
        self.set_snode_pool(pool.clone());
        Ok(pool)
    }

    async fn fetch_from_seed(&self) -> Result<Vec<Snode>> {
        let seed = random_element(&self.config.seed_nodes).ok_or(ApiError::NoNodesAvailable)?;
        info!("Populating snode pool using seed node: {}", seed);

        let body = json!({
            "method": "get_n_service_nodes",
            "params": {
                "active_only": true,
                "fields": {
                    "public_ip": true,
                    "storage_port": true,
                    "pubkey_x25519": true,
                    "pubkey_ed25519": true,
                },
            },
        });
        let response = self
            .http
            .execute(Verb::Post, &format!("{}/json_rpc", seed), Some(body))
            .await?;

        let nodes = parse_service_node_states(&response)?;
        if nodes.is_empty() {
            warn!("Seed node {} returned no usable snodes", seed);
            return Err(ApiError::NoNodesAvailable);
        }
        Ok(nodes)
    }

    /// The swarm serving `public_key`, from cache when it is big enough
    pub async fn get_swarm(&self, public_key: &str, rpc: &dyn SnodeRpc) -> Result<HashSet<Snode>> {
        if let Some(swarm) = self.database.swarm(public_key) {
            if swarm.len() >= self.config.minimum_swarm_snode_count {
                return Ok(swarm);
            }
        }

        let node = self.get_random_node().await?;
        debug!("Fetching swarm for {} from {}", public_key, node);
        let response = rpc
            .invoke(
                RpcMethod::GetSwarm,
                &node,
                public_key,
                json!({ "pubKey": public_key }),
            )
            .await?;

        let swarm: HashSet<Snode> = parse_snodes(&response)?.into_iter().collect();
        if swarm.is_empty() {
            return Err(ApiError::NoNodesAvailable);
        }
        self.database.set_swarm(public_key, &swarm);
        Ok(swarm)
    }

    /// The cached swarm for `public_key` without touching the network
    pub fn cached_swarm(&self, public_key: &str) -> HashSet<Snode> {
        self.database.swarm(public_key).unwrap_or_default()
    }

    /// One random swarm node, used for polling
    pub async fn get_single_target_node(
        &self,
        public_key: &str,
        rpc: &dyn SnodeRpc,
    ) -> Result<Snode> {
        let swarm = self.get_swarm(public_key, rpc).await?;
        random_from_set(&swarm)
            .cloned()
            .ok_or(ApiError::NoNodesAvailable)
    }

    /// Up to `count` distinct swarm nodes in random order, used for sending
    pub async fn get_target_nodes(
        &self,
        public_key: &str,
        count: usize,
        rpc: &dyn SnodeRpc,
    ) -> Result<Vec<Snode>> {
        let swarm = self.get_swarm(public_key, rpc).await?;
        let mut nodes = shuffled(swarm.into_iter().collect());
        nodes.truncate(count);
        Ok(nodes)
    }

    /// Count a failure against `node`; at the threshold the node is evicted
    /// from the pool and from every cached swarm, and its count starts over
    pub fn report_failure(&self, node: &Snode, public_key: &str) {
        let count = {
            let mut counts = self.failure_counts.write();
            let count = counts.entry(node.clone()).or_insert(0);
            *count += 1;
            let reached = *count;
            if reached >= self.config.failure_threshold {
                counts.remove(node);
            }
            reached
        };

        if count < self.config.failure_threshold {
            debug!("Snode {} failure count: {}", node, count);
            return;
        }

        warn!("Failure threshold reached for: {}; dropping it", node);
        self.drop_from_swarm(node, public_key);
        for owner in self.database.swarm_owners() {
            if owner != public_key {
                self.drop_from_swarm(node, &owner);
            }
        }

        let mut pool = self.snode_pool();
        if pool.remove(node) {
            self.set_snode_pool(pool);
        }
    }

    /// Remove `node` from one user's cached swarm; the pool is untouched
    pub fn drop_from_swarm(&self, node: &Snode, public_key: &str) {
        if let Some(mut swarm) = self.database.swarm(public_key) {
            if swarm.remove(node) {
                debug!("Dropping {} from swarm of {}", node, public_key);
                self.database.set_swarm(public_key, &swarm);
            }
        }
    }
}
