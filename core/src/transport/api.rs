// Message API: storage RPCs, polling and sending on top of the snode network
//
// Requests go through onion paths unless `use_onion_requests` is off, in
// which case they are posted straight to the node. Either way a node's status
// code is mapped to a typed error here, and the failure bookkeeping in the
// directory is fed from the same place.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use futures::future::join_all;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

use crate::config::NetworkConfig;
use crate::crypto::ProofOfWork;
use crate::error::{ApiError, Result};
use crate::events::{
    Broadcaster, DeliveryAcknowledger, EnvelopeDecoder, Event, PassthroughDecoder,
};
use crate::privacy::OnionPaths;
use crate::snode::directory::SnodeRpc;
use crate::snode::{RpcMethod, Snode, SnodeDirectory};
use crate::store::{SeenHashes, SnodeDatabase};
use crate::transport::http::{HttpClient, HttpError, Verb};
use crate::transport::onion_request::OnionRequestApi;
use crate::util::retry::{retry_if_needed, RetryPolicy};

/// A message to be stored in the recipient's swarm
#[derive(Debug, Clone)]
pub struct OutgoingMessage {
    /// Recipient public key, hex
    pub recipient: String,
    /// Opaque envelope bytes
    pub data: Vec<u8>,
    pub ttl_ms: u64,
    pub timestamp_ms: u64,
}

impl OutgoingMessage {
    /// Message stamped with the current time
    pub fn new(recipient: impl Into<String>, data: Vec<u8>, ttl_ms: u64) -> Self {
        Self {
            recipient: recipient.into(),
            data,
            ttl_ms,
            timestamp_ms: now_ms(),
        }
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// A message pulled from a swarm node, unwrapped by the envelope decoder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedEnvelope {
    pub hash: String,
    pub expiration: Option<u64>,
    pub content: Vec<u8>,
}

/// Outcome of one send attempt: one entry per target node
#[derive(Debug)]
pub struct SendReport {
    pub results: Vec<(Snode, Result<()>)>,
}

impl SendReport {
    /// Number of nodes that stored the message
    pub fn accepted(&self) -> usize {
        self.results.iter().filter(|(_, r)| r.is_ok()).count()
    }

    pub fn is_success(&self) -> bool {
        self.accepted() > 0
    }

    fn into_last_error(self) -> ApiError {
        self.results
            .into_iter()
            .rev()
            .find_map(|(_, result)| result.err())
            .unwrap_or(ApiError::NoNodesAvailable)
    }
}

pub struct SnodeApi {
    user_public_key: String,
    config: NetworkConfig,
    directory: Arc<SnodeDirectory>,
    onion: OnionRequestApi,
    http: Arc<dyn HttpClient>,
    database: Arc<dyn SnodeDatabase>,
    broadcaster: Arc<dyn Broadcaster>,
    pow_difficulty: AtomicU32,
    seen: Mutex<SeenHashes>,
    acknowledger: Option<Arc<dyn DeliveryAcknowledger>>,
    decoder: Arc<dyn EnvelopeDecoder>,
}

impl SnodeApi {
    pub fn new(
        user_public_key: impl Into<String>,
        config: NetworkConfig,
        directory: Arc<SnodeDirectory>,
        paths: Arc<OnionPaths>,
        http: Arc<dyn HttpClient>,
        database: Arc<dyn SnodeDatabase>,
        broadcaster: Arc<dyn Broadcaster>,
    ) -> Self {
        let seen = SeenHashes::from_persisted(
            database.received_message_hashes(),
            config.max_seen_hashes,
        );
        Self {
            user_public_key: user_public_key.into(),
            pow_difficulty: AtomicU32::new(config.initial_pow_difficulty.max(1)),
            config,
            directory,
            onion: OnionRequestApi::new(paths, http.clone()),
            http,
            database,
            broadcaster,
            seen: Mutex::new(seen),
            acknowledger: None,
            decoder: Arc::new(PassthroughDecoder),
        }
    }

    pub fn with_decoder(mut self, decoder: Arc<dyn EnvelopeDecoder>) -> Self {
        self.decoder = decoder;
        self
    }

    pub fn with_acknowledger(mut self, acknowledger: Arc<dyn DeliveryAcknowledger>) -> Self {
        self.acknowledger = Some(acknowledger);
        self
    }

    pub fn user_public_key(&self) -> &str {
        &self.user_public_key
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    pub fn directory(&self) -> &Arc<SnodeDirectory> {
        &self.directory
    }

    pub fn onion(&self) -> &OnionRequestApi {
        &self.onion
    }

    /// Current process-wide proof-of-work difficulty
    pub fn pow_difficulty(&self) -> u32 {
        self.pow_difficulty.load(Ordering::SeqCst)
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.config.max_retry_count, self.config.retry_interval())
    }

    // ------------------------------------------------------------------
    // RPC
    // ------------------------------------------------------------------

    /// Run `method` against `node` on behalf of `public_key`
    pub async fn invoke(
        &self,
        method: RpcMethod,
        node: &Snode,
        public_key: &str,
        params: Value,
    ) -> Result<Value> {
        if self.config.use_onion_requests {
            return match self.onion.send_to_snode(method, params, node).await {
                Err(ApiError::DestinationRejected { status, body }) => {
                    Err(self.handle_node_error(status, body.as_ref(), node, public_key))
                }
                other => other,
            };
        }

        let body = json!({ "method": method.as_str(), "params": params });
        match self
            .http
            .execute(Verb::Post, &node.url("storage_rpc/v1"), Some(body))
            .await
        {
            Ok(response) => Ok(response),
            Err(HttpError::Status { code, body }) => {
                Err(self.handle_node_error(code, body.as_ref(), node, public_key))
            }
            Err(HttpError::Unreachable(reason)) => {
                self.directory.report_failure(node, public_key);
                Err(ApiError::NodeUnreachable(format!("{}: {}", node, reason)))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Map a status reported by `node` to an error, updating caches on the way
    pub fn handle_node_error(
        &self,
        status: u16,
        body: Option<&Value>,
        node: &Snode,
        public_key: &str,
    ) -> ApiError {
        match status {
            400 | 500 | 503 => {
                debug!("Snode {} failed with status code {}", node, status);
                self.directory.report_failure(node, public_key);
                ApiError::RequestFailed(status)
            }
            406 => {
                warn!("The user's clock is out of sync with the service node network");
                self.broadcaster.broadcast(Event::ClockOutOfSync);
                ApiError::ClockOutOfSync
            }
            421 => {
                info!("Invalidating swarm for: {}", public_key);
                self.directory.drop_from_swarm(node, public_key);
                ApiError::SwarmMigrated
            }
            432 => {
                match body.and_then(requested_difficulty) {
                    Some(difficulty) if difficulty < self.config.max_pow_difficulty => {
                        info!("Setting proof of work difficulty to {}", difficulty);
                        self.pow_difficulty.store(difficulty, Ordering::SeqCst);
                    }
                    Some(difficulty) => {
                        warn!("Ignoring proof of work difficulty {}", difficulty);
                    }
                    None => debug!("Insufficient proof of work without a difficulty hint"),
                }
                ApiError::InsufficientProofOfWork
            }
            _ => {
                debug!("Unhandled status code {} from {}", status, node);
                ApiError::Generic(status)
            }
        }
    }

    // ------------------------------------------------------------------
    // Receiving
    // ------------------------------------------------------------------

    /// Messages stored on `node` after its cursor
    pub async fn get_raw_messages(&self, node: &Snode) -> Result<Value> {
        let last_hash = self.database.last_message_hash(node).unwrap_or_default();
        let params = json!({ "pubKey": self.user_public_key, "lastHash": last_hash });
        self.invoke(RpcMethod::GetMessages, node, &self.user_public_key, params)
            .await
    }

    /// Poll one random swarm node, retrying on failure
    pub async fn get_messages(&self) -> Result<Vec<ReceivedEnvelope>> {
        retry_if_needed(self.retry_policy(), || async move {
            let node = self
                .directory
                .get_single_target_node(&self.user_public_key, self)
                .await?;
            let raw = self.get_raw_messages(&node).await?;
            Ok(self.parse_raw_messages(&raw, &node))
        })
        .await
    }

    /// Advance the cursor for `node`, drop already seen messages and unwrap
    /// the rest. A bad record only loses itself.
    pub fn parse_raw_messages(&self, raw: &Value, node: &Snode) -> Vec<ReceivedEnvelope> {
        let Some(messages) = raw.get("messages").and_then(Value::as_array) else {
            debug!("No messages array in response from {}", node);
            return Vec::new();
        };

        if let Some(last) = messages.last() {
            match last.get("hash").and_then(Value::as_str) {
                Some(hash) => {
                    self.database.set_last_message_hash(node, hash);
                    let expiration = last.get("expiration").and_then(Value::as_u64);
                    if let (Some(acknowledger), Some(expiration)) =
                        (&self.acknowledger, expiration)
                    {
                        acknowledger.acknowledge_delivery(hash, expiration, &self.user_public_key);
                    }
                }
                None => debug!("Failed to update last message hash for {}", node),
            }
        }

        self.remove_duplicates(messages)
            .into_iter()
            .filter_map(|message| self.unwrap_envelope(message))
            .collect()
    }

    fn remove_duplicates<'a>(&self, messages: &'a [Value]) -> Vec<&'a Value> {
        let mut seen = self.seen.lock();
        let before = seen.len();
        let mut inserted = false;
        let fresh: Vec<&Value> = messages
            .iter()
            .filter(|message| match message.get("hash").and_then(Value::as_str) {
                Some(hash) => {
                    let new = seen.insert(hash.to_string());
                    inserted |= new;
                    new
                }
                None => {
                    debug!("Missing hash value for message");
                    false
                }
            })
            .collect();
        if inserted {
            debug!("Seen hashes: {} -> {}", before, seen.len());
            self.database.set_received_message_hashes(&seen.to_vec());
        }
        fresh
    }

    fn unwrap_envelope(&self, message: &Value) -> Option<ReceivedEnvelope> {
        let hash = message.get("hash").and_then(Value::as_str)?;
        let data = match message.get("data").and_then(Value::as_str) {
            Some(data) => data,
            None => {
                debug!("Message {} has no data", hash);
                return None;
            }
        };
        let bytes = match STANDARD.decode(data) {
            Ok(bytes) => bytes,
            Err(e) => {
                debug!("Failed to decode data for message {}: {}", hash, e);
                return None;
            }
        };
        match self.decoder.decode(&bytes) {
            Ok(content) => Some(ReceivedEnvelope {
                hash: hash.to_string(),
                expiration: message.get("expiration").and_then(Value::as_u64),
                content,
            }),
            Err(e) => {
                debug!("Failed to unwrap message {}: {}", hash, e);
                None
            }
        }
    }

    // ------------------------------------------------------------------
    // Sending
    // ------------------------------------------------------------------

    /// Store `message` on up to `target_snode_count` swarm nodes at once.
    ///
    /// An attempt succeeds when at least one node accepted the message; when
    /// every node failed the last error drives the retry. The stamp is
    /// recomputed if a node raised the difficulty in between.
    pub async fn send_message(&self, message: OutgoingMessage) -> Result<SendReport> {
        let data = STANDARD.encode(&message.data);
        let stamp: Mutex<Option<(u32, String)>> = Mutex::new(None);

        let message = &message;
        let data = &data;
        let stamp = &stamp;
        retry_if_needed(self.retry_policy(), || async move {
            let difficulty = self.pow_difficulty();
            let cached = stamp.lock().clone();
            let nonce = match cached {
                Some((d, nonce)) if d == difficulty => nonce,
                _ => {
                    let nonce = self.calculate_pow(message, data, difficulty).await?;
                    *stamp.lock() = Some((difficulty, nonce.clone()));
                    nonce
                }
            };

            let params = json!({
                "pubKey": message.recipient,
                "data": data,
                "ttl": message.ttl_ms.to_string(),
                "timestamp": message.timestamp_ms.to_string(),
                "nonce": nonce,
            });

            self.broadcaster.broadcast(Event::ContactingNetwork {
                timestamp: message.timestamp_ms,
            });
            let targets = self
                .directory
                .get_target_nodes(&message.recipient, self.config.target_snode_count, self)
                .await?;

            self.broadcaster.broadcast(Event::SendingMessage {
                timestamp: message.timestamp_ms,
            });
            let results = join_all(
                targets
                    .iter()
                    .map(|node| self.store_on(node, &message.recipient, params.clone())),
            )
            .await;

            let report = SendReport {
                results: targets.into_iter().zip(results).collect(),
            };
            if report.is_success() {
                debug!("Message stored on {}/{} nodes", report.accepted(), report.results.len());
                Ok(report)
            } else {
                Err(report.into_last_error())
            }
        })
        .await
    }

    async fn calculate_pow(
        &self,
        message: &OutgoingMessage,
        data: &str,
        difficulty: u32,
    ) -> Result<String> {
        self.broadcaster.broadcast(Event::CalculatingPoW {
            timestamp: message.timestamp_ms,
        });
        let pow = ProofOfWork::new(difficulty);
        let (ttl, timestamp) = (message.ttl_ms, message.timestamp_ms);
        let (recipient, data) = (message.recipient.clone(), data.to_string());
        tokio::task::spawn_blocking(move || pow.calculate(ttl, timestamp, &recipient, &data))
            .await
            .map_err(|e| ApiError::Task(e.to_string()))?
            .ok_or(ApiError::ProofOfWorkFailed)
    }

    async fn store_on(&self, node: &Snode, recipient: &str, params: Value) -> Result<()> {
        let response = self
            .invoke(RpcMethod::SendMessage, node, recipient, params)
            .await?;
        if let Some(difficulty) = requested_difficulty(&response) {
            let current = self.pow_difficulty();
            if difficulty > current && difficulty < self.config.max_pow_difficulty {
                info!("Setting proof of work difficulty to {}", difficulty);
                self.pow_difficulty.store(difficulty, Ordering::SeqCst);
            }
        }
        Ok(())
    }
}

fn requested_difficulty(body: &Value) -> Option<u32> {
    body.get("difficulty")
        .and_then(Value::as_u64)
        .and_then(|d| u32::try_from(d).ok())
        .filter(|d| *d > 0)
}

#[async_trait]
impl SnodeRpc for SnodeApi {
    async fn invoke(
        &self,
        method: RpcMethod,
        node: &Snode,
        public_key: &str,
        params: Value,
    ) -> Result<Value> {
        SnodeApi::invoke(self, method, node, public_key, params).await
    }
}
