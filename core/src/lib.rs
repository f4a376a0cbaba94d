// Swarmnet Core: snode swarm client
//
// Keeps track of which storage nodes exist and which of them hold a user's
// mailbox, routes storage requests through onion paths, and sends and polls
// messages with deduplication, retries and proof of work.

pub mod config;
pub mod crypto;
pub mod error;
pub mod events;
pub mod privacy;
pub mod snode;
pub mod store;
pub mod transport;
pub mod util;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

pub use config::{ConfigError, NetworkConfig};
pub use error::ApiError;
pub use events::{
    Broadcaster, ChannelBroadcaster, DeliveryAcknowledger, EnvelopeDecoder, Event,
    PassthroughDecoder, TracingBroadcaster,
};
pub use privacy::{Destination, OnionPaths};
pub use snode::{RpcMethod, Snode, SnodeDirectory, SnodeKeySet, SnodeRpc};
pub use store::{KvDatabase, MemoryStorage, SledStorage, SnodeDatabase, StoreError};
pub use transport::{
    HttpClient, OutgoingMessage, Poller, ReceivedEnvelope, ReqwestClient, SendReport, SnodeApi,
};

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
    #[error("HTTP client error: {0}")]
    Http(#[from] transport::HttpError),
}

// ============================================================================
// CLIENT
// ============================================================================

/// Everything needed to talk to the swarm on behalf of one user, wired to
/// the reqwest HTTP client
pub struct SwarmClient {
    api: Arc<SnodeApi>,
    directory: Arc<SnodeDirectory>,
    paths: Arc<OnionPaths>,
    database: Arc<dyn SnodeDatabase>,
}

impl SwarmClient {
    /// Client with in-memory caches
    pub fn new(
        user_public_key: &str,
        config: NetworkConfig,
        broadcaster: Arc<dyn Broadcaster>,
    ) -> Result<Self, ClientError> {
        let database = Arc::new(KvDatabase::new(MemoryStorage::new()));
        Self::init(user_public_key, config, broadcaster, database)
    }

    /// Client with caches persisted in a sled database at `storage_path`
    pub fn with_storage(
        user_public_key: &str,
        config: NetworkConfig,
        broadcaster: Arc<dyn Broadcaster>,
        storage_path: &str,
    ) -> Result<Self, ClientError> {
        let database = Arc::new(KvDatabase::new(SledStorage::open(storage_path)?));
        Self::init(user_public_key, config, broadcaster, database)
    }

    fn init(
        user_public_key: &str,
        config: NetworkConfig,
        broadcaster: Arc<dyn Broadcaster>,
        database: Arc<dyn SnodeDatabase>,
    ) -> Result<Self, ClientError> {
        config.validate()?;
        let http: Arc<dyn HttpClient> = Arc::new(ReqwestClient::new(config.request_timeout())?);

        let directory = Arc::new(SnodeDirectory::new(
            config.clone(),
            http.clone(),
            database.clone(),
        ));
        let paths = Arc::new(OnionPaths::new(
            directory.clone(),
            http.clone(),
            database.clone(),
            broadcaster.clone(),
        ));
        let api = Arc::new(SnodeApi::new(
            user_public_key,
            config,
            directory.clone(),
            paths.clone(),
            http,
            database.clone(),
            broadcaster,
        ));

        tracing::info!(
            "Swarm client ready for {} ({} snodes cached)",
            user_public_key,
            directory.snode_pool().len()
        );
        Ok(Self {
            api,
            directory,
            paths,
            database,
        })
    }

    pub fn api(&self) -> &Arc<SnodeApi> {
        &self.api
    }

    pub fn directory(&self) -> &Arc<SnodeDirectory> {
        &self.directory
    }

    pub fn paths(&self) -> &Arc<OnionPaths> {
        &self.paths
    }

    pub fn database(&self) -> &Arc<dyn SnodeDatabase> {
        &self.database
    }

    /// Start the background poller; must be called inside a tokio runtime
    pub fn start_polling(&self, buffer: usize) -> (Poller, mpsc::Receiver<Vec<ReceivedEnvelope>>) {
        Poller::start(self.api.clone(), buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_in_memory_client() {
        let client = SwarmClient::new(
            "05alice",
            NetworkConfig::default(),
            Arc::new(TracingBroadcaster),
        )
        .unwrap();
        assert_eq!(client.api().user_public_key(), "05alice");
        assert!(client.directory().snode_pool().is_empty());
        assert!(client.paths().paths().is_empty());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = NetworkConfig {
            path_count: 0,
            ..Default::default()
        };
        assert!(matches!(
            SwarmClient::new("05alice", config, Arc::new(TracingBroadcaster)),
            Err(ClientError::Config(_))
        ));
    }

    #[test]
    fn test_storage_client_reloads_pool() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("swarm").to_string_lossy().to_string();
        let node = Snode::new("https://203.0.113.9", 22021, None);

        {
            let client = SwarmClient::with_storage(
                "05alice",
                NetworkConfig::default(),
                Arc::new(TracingBroadcaster),
                &path,
            )
            .unwrap();
            client
                .database()
                .set_snode_pool(&[node.clone()].into_iter().collect());
        }

        let reopened = SwarmClient::with_storage(
            "05alice",
            NetworkConfig::default(),
            Arc::new(TracingBroadcaster),
            &path,
        )
        .unwrap();
        assert!(reopened.directory().snode_pool().contains(&node));
    }
}
