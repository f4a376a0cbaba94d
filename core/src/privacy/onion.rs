// Onion request assembly: one nested ciphertext per path
//
// The destination payload is encrypted first, then each hop from the node
// nearest the destination back to the guard wraps the previous layer with
// routing instructions for the next hop. Each hop can only read where to
// forward; only the destination can read the payload.
//
// Layer formats (JSON, then encrypted for the hop):
//   snode destination: {"body": <payload string>, "headers": ""}
//   server destination: the payload itself
//   hop -> snode:  {"ciphertext", "ephemeral_key", "destination": <ed25519>}
//   hop -> server: {"ciphertext", "ephemeral_key", "host", "target", "method"}

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::{json, Value};
use zeroize::Zeroizing;

use crate::crypto::{encrypt_for_public_key, EncryptionResult};
use crate::error::{ApiError, Result};
use crate::snode::Snode;

/// Endpoint servers expose for onion requests
pub const SERVER_ONION_TARGET: &str = "/loki/v1/lsrpc";

/// Where an onion request ends up
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    Snode(Snode),
    Server {
        host: String,
        x25519_public_key: String,
    },
}

impl Destination {
    /// The snode, if the request terminates at one
    pub fn snode(&self) -> Option<&Snode> {
        match self {
            Destination::Snode(node) => Some(node),
            Destination::Server { .. } => None,
        }
    }
}

/// Everything needed to send an onion request and read its response
#[derive(Debug)]
pub struct OnionBuildingResult {
    /// First node of the path; the request is posted to it
    pub guard: Snode,
    /// Layer encrypted for the guard
    pub final_encryption: EncryptionResult,
    /// Key the destination will answer under
    pub destination_symmetric_key: Zeroizing<[u8; 32]>,
}

fn x25519_key(node: &Snode) -> Result<&str> {
    node.keys()
        .map(|keys| keys.x25519_key.as_str())
        .ok_or_else(|| ApiError::MissingKeySet(node.to_string()))
}

/// Encrypt the innermost layer for `destination`
pub fn encrypt_payload_for_destination(
    payload: &str,
    destination: &Destination,
) -> Result<EncryptionResult> {
    let result = match destination {
        Destination::Snode(node) => {
            let plaintext = json!({ "body": payload, "headers": "" }).to_string();
            encrypt_for_public_key(plaintext.as_bytes(), x25519_key(node)?)?
        }
        Destination::Server {
            x25519_public_key, ..
        } => encrypt_for_public_key(payload.as_bytes(), x25519_public_key)?,
    };
    Ok(result)
}

/// Wrap `previous` in a layer for `hop` telling it to forward to `next`
pub fn encrypt_hop(
    hop: &Snode,
    next: &Destination,
    previous: &EncryptionResult,
) -> Result<EncryptionResult> {
    let mut layer = json!({
        "ciphertext": STANDARD.encode(&previous.ciphertext),
        "ephemeral_key": hex::encode(previous.ephemeral_public_key),
    });
    match next {
        Destination::Snode(node) => {
            let keys = node
                .keys()
                .ok_or_else(|| ApiError::MissingKeySet(node.to_string()))?;
            layer["destination"] = Value::from(keys.ed25519_key.as_str());
        }
        Destination::Server { host, .. } => {
            layer["host"] = Value::from(host.as_str());
            layer["target"] = Value::from(SERVER_ONION_TARGET);
            layer["method"] = Value::from("POST");
        }
    }
    Ok(encrypt_for_public_key(layer.to_string().as_bytes(), x25519_key(hop)?)?)
}

/// Build the full onion for `payload` travelling `path` to `destination`
pub fn build_onion(
    path: &[Snode],
    destination: &Destination,
    payload: &str,
) -> Result<OnionBuildingResult> {
    let guard = path.first().cloned().ok_or(ApiError::InsufficientNodes)?;

    let mut layer = encrypt_payload_for_destination(payload, destination)?;
    let destination_symmetric_key = layer.symmetric_key.clone();

    let mut next = destination.clone();
    for hop in path.iter().rev() {
        layer = encrypt_hop(hop, &next, &layer)?;
        next = Destination::Snode(hop.clone());
    }

    Ok(OnionBuildingResult {
        guard,
        final_encryption: layer,
        destination_symmetric_key,
    })
}
