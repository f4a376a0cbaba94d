// Proof-of-work stamp for stored messages
//
// Storage nodes only accept a message whose stamp hashes below a target that
// shrinks with the message size, its time to live and the network difficulty.
//
//   payload   = timestamp || ttl || recipient || data   (decimal strings, then raw text)
//   initial   = SHA-512(payload)
//   trial(n)  = first 8 bytes of SHA-512(n_be || initial), as big-endian u64
//   target    = 2^64 / (difficulty * (len + ttl_s * len / 2^16)),  len = payload + 8
//
// The stamp is the base64 of the first nonce whose trial value is <= target.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use sha2::{Digest, Sha512};

/// Size of the nonce in bytes
pub const NONCE_SIZE: usize = 8;

/// Proof-of-work calculator
#[derive(Debug, Clone, Copy)]
pub struct ProofOfWork {
    pub difficulty: u32,
}

impl ProofOfWork {
    pub fn new(difficulty: u32) -> Self {
        Self {
            difficulty: difficulty.max(1),
        }
    }

    /// Compute a stamp. `ttl_ms` and `timestamp_ms` are in milliseconds;
    /// `data` is the base64 message body as sent on the wire.
    ///
    /// Returns `None` if the nonce space is exhausted, which does not happen
    /// for any difficulty nodes actually request.
    pub fn calculate(
        &self,
        ttl_ms: u64,
        timestamp_ms: u64,
        recipient: &str,
        data: &str,
    ) -> Option<String> {
        let payload = build_payload(ttl_ms, timestamp_ms, recipient, data);
        let target = self.target(ttl_ms, payload.len());
        let initial_hash = Sha512::digest(&payload);

        let mut nonce: u64 = 0;
        loop {
            nonce = nonce.checked_add(1)?;
            if trial_value(nonce, &initial_hash) <= target {
                return Some(STANDARD.encode(nonce.to_be_bytes()));
            }
        }
    }

    /// Check a stamp produced by `calculate`
    pub fn verify(
        &self,
        nonce_b64: &str,
        ttl_ms: u64,
        timestamp_ms: u64,
        recipient: &str,
        data: &str,
    ) -> bool {
        let Ok(bytes) = STANDARD.decode(nonce_b64) else {
            return false;
        };
        let Ok(bytes) = <[u8; NONCE_SIZE]>::try_from(bytes.as_slice()) else {
            return false;
        };
        let payload = build_payload(ttl_ms, timestamp_ms, recipient, data);
        let target = self.target(ttl_ms, payload.len());
        let initial_hash = Sha512::digest(&payload);
        trial_value(u64::from_be_bytes(bytes), &initial_hash) <= target
    }

    /// Highest acceptable trial value
    pub fn target(&self, ttl_ms: u64, payload_len: usize) -> u64 {
        let total_len = (payload_len + NONCE_SIZE) as u128;
        let ttl_secs = (ttl_ms / 1000) as u128;
        let inner = ttl_secs * total_len / (1u128 << 16);
        let denominator = (self.difficulty as u128) * (total_len + inner);
        let target = (u64::MAX as u128) / denominator.max(1);
        target as u64
    }
}

fn build_payload(ttl_ms: u64, timestamp_ms: u64, recipient: &str, data: &str) -> Vec<u8> {
    format!("{}{}{}{}", timestamp_ms, ttl_ms, recipient, data).into_bytes()
}

fn trial_value(nonce: u64, initial_hash: &[u8]) -> u64 {
    let mut hasher = Sha512::new();
    hasher.update(nonce.to_be_bytes());
    hasher.update(initial_hash);
    let digest = hasher.finalize();
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(prefix)
}
