// Node list parsing
//
// Two envelopes carry node lists: the seed bootstrap (`get_n_service_nodes`)
// and the swarm lookup (`get_snodes_for_pubkey`). A bad record is skipped on
// its own; only a missing or malformed envelope fails the whole call.

use serde_json::Value;
use tracing::warn;

use super::{Snode, SnodeKeySet, PLACEHOLDER_ADDRESS};
use crate::error::ApiError;

/// Parse `result.service_node_states` from a seed node response
pub fn parse_service_node_states(response: &Value) -> Result<Vec<Snode>, ApiError> {
    let states = response
        .get("result")
        .and_then(|r| r.get("service_node_states"))
        .and_then(Value::as_array)
        .ok_or_else(|| ApiError::ParsingFailed("missing service_node_states".into()))?;

    Ok(states
        .iter()
        .filter_map(|record| parse_record(record, "public_ip", "storage_port"))
        .collect())
}

/// Parse the `snodes` list of a swarm lookup response
pub fn parse_snodes(response: &Value) -> Result<Vec<Snode>, ApiError> {
    let snodes = response
        .get("snodes")
        .and_then(Value::as_array)
        .ok_or_else(|| ApiError::ParsingFailed("missing snodes".into()))?;

    Ok(snodes
        .iter()
        .filter_map(|record| parse_record(record, "ip", "port"))
        .collect())
}

fn parse_record(record: &Value, ip_field: &str, port_field: &str) -> Option<Snode> {
    let ip = record.get(ip_field).and_then(Value::as_str);
    let port = record.get(port_field).and_then(parse_port);
    let ed25519_key = record.get("pubkey_ed25519").and_then(Value::as_str);
    let x25519_key = record.get("pubkey_x25519").and_then(Value::as_str);

    match (ip, port, ed25519_key, x25519_key) {
        (Some(ip), Some(port), Some(ed), Some(x)) if ip != PLACEHOLDER_ADDRESS => {
            Some(Snode::from_ip(
                ip,
                port,
                SnodeKeySet {
                    ed25519_key: ed.to_string(),
                    x25519_key: x.to_string(),
                },
            ))
        }
        _ => {
            warn!("Failed to parse snode from: {}", record);
            None
        }
    }
}

/// Ports arrive as numbers from seeds and sometimes as strings from swarm lookups
fn parse_port(value: &Value) -> Option<u16> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|p| u16::try_from(p).ok()),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}
