// In-process snode network for tests
//
// Nodes hold real X25519 secrets, so onion requests are actually peeled hop by
// hop and answered under the destination's symmetric key. Storage RPCs are
// served from one shared mailbox per public key, which stands in for swarm
// replication.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use parking_lot::Mutex;
use rand::rngs::OsRng;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroizing;

use crate::config::NetworkConfig;
use crate::crypto::{
    decrypt_aes_gcm, derive_symmetric_key, encrypt_aes_gcm, CryptoError, ProofOfWork,
};
use crate::events::recording::RecordingBroadcaster;
use crate::privacy::OnionPaths;
use crate::snode::{Snode, SnodeDirectory, SnodeKeySet};
use crate::store::{KvDatabase, MemoryStorage};
use crate::transport::api::SnodeApi;
use crate::transport::http::{HttpClient, HttpError, Verb};
use crate::transport::onion_request::OnionRequestApi;

pub const SEED_URL: &str = "https://seed.test";
pub const SERVER_HOST: &str = "https://file.test";
const SWARM_SIZE: usize = 5;
const NODE_VERSION: &str = "2.2.0";

/// A snode with its private key
pub struct TestNode {
    pub snode: Snode,
    secret: StaticSecret,
}

impl TestNode {
    pub fn new(i: u16) -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let x25519_key = hex::encode(PublicKey::from(&secret).as_bytes());
        let snode = Snode::new(
            format!("https://10.9.{}.{}", i / 256, i % 256),
            22021,
            Some(SnodeKeySet {
                ed25519_key: format!("{:064x}", i),
                x25519_key,
            }),
        );
        Self { snode, secret }
    }

    /// Decrypt a layer addressed to this node; also returns the layer key
    pub fn open(
        &self,
        ciphertext: &[u8],
        ephemeral_key: &[u8],
    ) -> Result<(Vec<u8>, Zeroizing<[u8; 32]>), CryptoError> {
        let key: [u8; 32] = ephemeral_key
            .try_into()
            .map_err(|_| CryptoError::InvalidPublicKey("expected 32 bytes".into()))?;
        let shared = self.secret.diffie_hellman(&PublicKey::from(key));
        let symmetric_key = derive_symmetric_key(shared.as_bytes())?;
        let plaintext = decrypt_aes_gcm(ciphertext, &symmetric_key)?;
        Ok((plaintext, symmetric_key))
    }
}

struct StoredMessage {
    hash: String,
    expiration: u64,
    data: String,
}

#[derive(Default)]
struct NetworkState {
    mailboxes: HashMap<String, Vec<StoredMessage>>,
    unreachable: HashSet<Snode>,
    statuses: HashMap<Snode, (u16, Option<Value>)>,
    required_difficulty: u32,
    requests: Vec<String>,
}

type Rejection = (u16, Option<Value>);

pub struct MockSnodeNetwork {
    nodes: Vec<TestNode>,
    server: TestNode,
    state: Mutex<NetworkState>,
}

/// A client wired to a `MockSnodeNetwork`
pub struct TestClient {
    pub api: SnodeApi,
    pub directory: Arc<SnodeDirectory>,
    pub paths: Arc<OnionPaths>,
    pub database: Arc<KvDatabase<MemoryStorage>>,
    pub broadcaster: Arc<RecordingBroadcaster>,
}

fn reject(status: u16) -> Rejection {
    (status, None)
}

fn bad_request() -> HttpError {
    HttpError::Status { code: 400, body: None }
}

impl MockSnodeNetwork {
    pub fn new(size: u16) -> Arc<Self> {
        Arc::new(Self {
            nodes: (1..=size).map(TestNode::new).collect(),
            server: TestNode::new(u16::MAX),
            state: Mutex::new(NetworkState {
                required_difficulty: 1,
                ..Default::default()
            }),
        })
    }

    /// Settings pointing at this network, with no waiting between retries
    pub fn config(&self) -> NetworkConfig {
        NetworkConfig {
            seed_nodes: vec![SEED_URL.to_string()],
            minimum_snode_pool_count: self.nodes.len(),
            retry_interval_ms: 0,
            poll_interval_ms: 10,
            ..Default::default()
        }
    }

    pub fn client(self: &Arc<Self>, user_public_key: &str, config: NetworkConfig) -> TestClient {
        let http: Arc<dyn HttpClient> = self.clone();
        let database = Arc::new(KvDatabase::new(MemoryStorage::new()));
        let broadcaster = Arc::new(RecordingBroadcaster::default());
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
        let api = SnodeApi::new(
            user_public_key,
            config,
            directory.clone(),
            paths.clone(),
            http,
            database.clone(),
            broadcaster.clone(),
        );
        TestClient {
            api,
            directory,
            paths,
            database,
            broadcaster,
        }
    }

    pub fn onion_api(self: &Arc<Self>) -> OnionRequestApi {
        let client = self.client("05onion", self.config());
        OnionRequestApi::new(client.paths, self.clone())
    }

    pub fn node(&self, index: usize) -> Snode {
        self.nodes[index].snode.clone()
    }

    pub fn nodes(&self) -> Vec<Snode> {
        self.nodes.iter().map(|n| n.snode.clone()).collect()
    }

    /// Nodes answering swarm lookups, for every key
    pub fn swarm(&self) -> Vec<Snode> {
        let start = self.nodes.len().saturating_sub(SWARM_SIZE);
        self.nodes[start..].iter().map(|n| n.snode.clone()).collect()
    }

    /// Host and x25519 key of the external server
    pub fn server(&self) -> (String, String) {
        let key = self
            .server
            .snode
            .keys()
            .map(|k| k.x25519_key.clone())
            .unwrap_or_default();
        (SERVER_HOST.to_string(), key)
    }

    pub fn set_unreachable(&self, node: &Snode) {
        self.state.lock().unreachable.insert(node.clone());
    }

    /// Make `node` answer every storage RPC with `status`
    pub fn set_status(&self, node: &Snode, status: u16) {
        self.state.lock().statuses.insert(node.clone(), (status, None));
    }

    pub fn set_required_difficulty(&self, difficulty: u32) {
        self.state.lock().required_difficulty = difficulty;
    }

    pub fn request_count(&self) -> usize {
        self.state.lock().requests.len()
    }

    pub fn requests_to(&self, node: &Snode) -> usize {
        let prefix = node.url("");
        self.state
            .lock()
            .requests
            .iter()
            .filter(|url| url.starts_with(&prefix))
            .count()
    }

    pub fn stored_messages(&self, public_key: &str) -> usize {
        self.state
            .lock()
            .mailboxes
            .get(public_key)
            .map_or(0, Vec::len)
    }

    /// Put a message straight into a mailbox; returns its hash
    pub fn store_message(&self, public_key: &str, data: &[u8]) -> String {
        let data = STANDARD.encode(data);
        let mut state = self.state.lock();
        let mailbox = state.mailboxes.entry(public_key.to_string()).or_default();
        let hash = hex::encode(Sha256::digest(format!("{}{}", mailbox.len(), data)));
        mailbox.push(StoredMessage {
            hash: hash.clone(),
            expiration: 0,
            data,
        });
        hash
    }

    fn route(&self, url: &str) -> Option<(&TestNode, String)> {
        self.nodes.iter().find_map(|node| {
            let prefix = node.snode.url("");
            url.strip_prefix(&prefix).map(|endpoint| (node, endpoint.to_string()))
        })
    }

    fn by_ed25519(&self, key: &str) -> Option<&TestNode> {
        self.nodes
            .iter()
            .find(|n| n.snode.keys().map(|k| k.ed25519_key.as_str()) == Some(key))
    }

    fn is_unreachable(&self, node: &Snode) -> bool {
        self.state.lock().unreachable.contains(node)
    }

    fn seed_response(&self) -> Value {
        let states: Vec<Value> = self
            .nodes
            .iter()
            .filter_map(|n| {
                let keys = n.snode.keys()?;
                Some(json!({
                    "public_ip": n.snode.address.trim_start_matches("https://"),
                    "storage_port": n.snode.port,
                    "pubkey_ed25519": keys.ed25519_key,
                    "pubkey_x25519": keys.x25519_key,
                }))
            })
            .collect();
        json!({ "result": { "service_node_states": states } })
    }

    /// Serve `{method, params}` as `node` would
    fn handle_storage(&self, node: &Snode, request: &Value) -> Result<Value, Rejection> {
        let mut state = self.state.lock();
        if let Some(rejection) = state.statuses.get(node) {
            return Err(rejection.clone());
        }
        let params = &request["params"];
        let public_key = params["pubKey"].as_str().ok_or_else(|| reject(400))?.to_string();

        match request["method"].as_str() {
            Some("get_snodes_for_pubkey") => {
                let snodes: Vec<Value> = self
                    .swarm()
                    .iter()
                    .filter_map(|n| {
                        let keys = n.keys()?;
                        Some(json!({
                            "ip": n.address.trim_start_matches("https://"),
                            "port": n.port.to_string(),
                            "pubkey_ed25519": keys.ed25519_key,
                            "pubkey_x25519": keys.x25519_key,
                        }))
                    })
                    .collect();
                Ok(json!({ "snodes": snodes }))
            }
            Some("retrieve") => {
                let last_hash = params["lastHash"].as_str().unwrap_or_default();
                let mailbox = state.mailboxes.get(&public_key);
                let messages: Vec<Value> = mailbox
                    .map(|messages| {
                        let start = messages
                            .iter()
                            .position(|m| m.hash == last_hash)
                            .map_or(0, |i| i + 1);
                        messages[start..]
                            .iter()
                            .map(|m| {
                                json!({
                                    "hash": m.hash,
                                    "expiration": m.expiration,
                                    "data": m.data,
                                })
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                Ok(json!({ "messages": messages }))
            }
            Some("store") => {
                let field = |name: &str| -> Result<String, Rejection> {
                    params[name].as_str().map(str::to_string).ok_or_else(|| reject(400))
                };
                let data = field("data")?;
                let nonce = field("nonce")?;
                let ttl: u64 = field("ttl")?.parse().map_err(|_| reject(400))?;
                let timestamp: u64 = field("timestamp")?.parse().map_err(|_| reject(400))?;

                let difficulty = state.required_difficulty;
                let pow = ProofOfWork::new(difficulty);
                if !pow.verify(&nonce, ttl, timestamp, &public_key, &data) {
                    return Err((432, Some(json!({ "difficulty": difficulty }))));
                }

                let hash = hex::encode(Sha256::digest(format!("{}{}", timestamp, data)));
                let mailbox = state.mailboxes.entry(public_key).or_default();
                if !mailbox.iter().any(|m| m.hash == hash) {
                    mailbox.push(StoredMessage {
                        hash,
                        expiration: timestamp + ttl,
                        data,
                    });
                }
                Ok(json!({ "difficulty": difficulty }))
            }
            _ => Err(reject(400)),
        }
    }

    fn handle_onion(&self, guard: &TestNode, body: Option<Value>) -> Result<Value, HttpError> {
        let body = body.ok_or_else(bad_request)?;
        let decode_layer = |layer: &Value| -> Result<(Vec<u8>, Vec<u8>), HttpError> {
            let ciphertext = layer["ciphertext"]
                .as_str()
                .and_then(|c| STANDARD.decode(c).ok())
                .ok_or_else(bad_request)?;
            let ephemeral = layer["ephemeral_key"]
                .as_str()
                .and_then(|k| hex::decode(k).ok())
                .ok_or_else(bad_request)?;
            Ok((ciphertext, ephemeral))
        };

        let mut current = guard;
        let (mut ciphertext, mut ephemeral) = decode_layer(&body)?;
        loop {
            let (plaintext, key) = current
                .open(&ciphertext, &ephemeral)
                .map_err(|_| bad_request())?;
            let layer: Value = serde_json::from_slice(&plaintext).map_err(|_| bad_request())?;

            if let Some(next) = layer["destination"].as_str() {
                let next = self.by_ed25519(next).ok_or(HttpError::Status {
                    code: 502,
                    body: None,
                })?;
                if self.is_unreachable(&next.snode) {
                    return Err(HttpError::Status { code: 502, body: None });
                }
                (ciphertext, ephemeral) = decode_layer(&layer)?;
                current = next;
                continue;
            }

            if layer["host"].as_str() == Some(SERVER_HOST) {
                let (inner, inner_ephemeral) = decode_layer(&layer)?;
                let (payload, key) = self
                    .server
                    .open(&inner, &inner_ephemeral)
                    .map_err(|_| bad_request())?;
                let request: Value = serde_json::from_slice(&payload).map_err(|_| bad_request())?;
                let body = json!({ "echo": request }).to_string();
                let response = json!({ "status": 200, "body": body });
                return self.seal(&response, &key);
            }

            let request: Value = layer["body"]
                .as_str()
                .and_then(|b| serde_json::from_str(b).ok())
                .ok_or_else(bad_request)?;
            let response = match self.handle_storage(&current.snode, &request) {
                Ok(body) => json!({ "status": 200, "body": body.to_string() }),
                Err((status, body)) => json!({
                    "status": status,
                    "body": body.unwrap_or(Value::Null).to_string(),
                }),
            };
            return self.seal(&response, &key);
        }
    }

    fn seal(&self, response: &Value, key: &[u8; 32]) -> Result<Value, HttpError> {
        let sealed = encrypt_aes_gcm(response.to_string().as_bytes(), key)
            .map_err(|e| HttpError::Setup(e.to_string()))?;
        Ok(json!({ "result": STANDARD.encode(sealed) }))
    }
}

#[async_trait]
impl HttpClient for MockSnodeNetwork {
    async fn execute(
        &self,
        verb: Verb,
        url: &str,
        body: Option<Value>,
    ) -> Result<Value, HttpError> {
        self.state.lock().requests.push(url.to_string());

        if url.starts_with(SEED_URL) {
            return Ok(self.seed_response());
        }
        let (node, endpoint) = self
            .route(url)
            .ok_or_else(|| HttpError::Unreachable(format!("unknown host {}", url)))?;
        if self.is_unreachable(&node.snode) {
            return Err(HttpError::Unreachable(format!("{} timed out", node.snode)));
        }

        match (verb, endpoint.as_str()) {
            (Verb::Get, "get_stats/v1") => Ok(json!({ "version": NODE_VERSION })),
            (Verb::Post, "storage_rpc/v1") => {
                let request = body.ok_or_else(bad_request)?;
                self.handle_storage(&node.snode, &request)
                    .map_err(|(code, body)| HttpError::Status { code, body })
            }
            (Verb::Post, "onion_req") => self.handle_onion(node, body),
            _ => Err(HttpError::Status { code: 404, body: None }),
        }
    }
}
