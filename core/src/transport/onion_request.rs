// Onion requests: send one payload through a path and read the answer
//
// The request is a single POST to the guard's `onion_req` endpoint. The
// answer comes back encrypted under the destination's symmetric key, so it
// is read without walking the hops again.
//
// A failure talking to the guard implicates the guard and its path; both are
// dropped. A status reported by the destination does not implicate the path.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::crypto::decrypt_aes_gcm;
use crate::error::{ApiError, Result};
use crate::privacy::{build_onion, Destination, OnionPaths};
use crate::snode::{RpcMethod, Snode};
use crate::transport::http::{HttpClient, Verb};

pub struct OnionRequestApi {
    paths: Arc<OnionPaths>,
    http: Arc<dyn HttpClient>,
}

impl OnionRequestApi {
    pub fn new(paths: Arc<OnionPaths>, http: Arc<dyn HttpClient>) -> Self {
        Self { paths, http }
    }

    pub fn paths(&self) -> &Arc<OnionPaths> {
        &self.paths
    }

    /// Send a storage RPC to `node` through an onion path that avoids it
    pub async fn send_to_snode(
        &self,
        method: RpcMethod,
        params: Value,
        node: &Snode,
    ) -> Result<Value> {
        let payload = json!({ "method": method.as_str(), "params": params });
        self.send(&Destination::Snode(node.clone()), &payload, true).await
    }

    /// Send `request` to an external server reachable from the snode network
    pub async fn send_to_server(
        &self,
        request: &Value,
        host: &str,
        x25519_public_key: &str,
    ) -> Result<Value> {
        let destination = Destination::Server {
            host: host.to_string(),
            x25519_public_key: x25519_public_key.to_string(),
        };
        self.send(&destination, request, false).await
    }

    /// Build, send and decrypt one onion request.
    ///
    /// With `json_required` a textual body that is not JSON fails the call;
    /// otherwise it is returned as a JSON string.
    pub async fn send(
        &self,
        destination: &Destination,
        payload: &Value,
        json_required: bool,
    ) -> Result<Value> {
        let path = self.paths.get_path(destination.snode()).await?;

        let onion = {
            let destination = destination.clone();
            let payload = payload.to_string();
            tokio::task::spawn_blocking(move || build_onion(&path, &destination, &payload))
                .await
                .map_err(|e| ApiError::Task(e.to_string()))??
        };

        let guard = onion.guard.clone();
        let body = json!({
            "ciphertext": STANDARD.encode(&onion.final_encryption.ciphertext),
            "ephemeral_key": hex::encode(onion.final_encryption.ephemeral_public_key),
        });
        let response = match self
            .http
            .execute(Verb::Post, &guard.url("onion_req"), Some(body))
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!("Onion request via guard {} failed: {}", guard, e);
                self.paths.drop_path_containing(&guard);
                self.paths.drop_guard(&guard);
                return Err(ApiError::NodeUnreachable(format!("{}: {}", guard, e)));
            }
        };

        let ciphertext = response
            .get("result")
            .and_then(Value::as_str)
            .ok_or_else(|| ApiError::ParsingFailed("missing onion result".into()))
            .and_then(|result| {
                STANDARD
                    .decode(result)
                    .map_err(|e| ApiError::ParsingFailed(e.to_string()))
            })?;
        let plaintext = decrypt_aes_gcm(&ciphertext, &onion.destination_symmetric_key)?;
        let envelope: Value = serde_json::from_slice(&plaintext)
            .map_err(|e| ApiError::ParsingFailed(e.to_string()))?;

        read_destination_response(envelope, json_required)
    }
}

/// Turn the decrypted `{status, body}` envelope into the body or a rejection
fn read_destination_response(envelope: Value, json_required: bool) -> Result<Value> {
    let status = envelope
        .get("status")
        .and_then(Value::as_u64)
        .and_then(|s| u16::try_from(s).ok())
        .ok_or_else(|| ApiError::ParsingFailed("missing status".into()))?;

    let body = match envelope.get("body") {
        None | Some(Value::Null) => None,
        Some(Value::String(text)) => match serde_json::from_str::<Value>(text) {
            Ok(json) => Some(json),
            Err(_) if json_required && status == 200 => {
                return Err(ApiError::ParsingFailed("body is not JSON".into()));
            }
            Err(_) => Some(Value::String(text.clone())),
        },
        Some(other) => Some(other.clone()),
    };

    if status != 200 {
        debug!("Destination answered with status code {}", status);
        return Err(ApiError::DestinationRejected { status, body });
    }
    Ok(body.unwrap_or(envelope))
}
