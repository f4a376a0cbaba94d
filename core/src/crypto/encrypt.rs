// Per-hop onion layer encryption: X25519 ECDH + HMAC-SHA256 KDF + AES-256-GCM
//
// Flow for one layer:
// 1. Generate ephemeral X25519 keypair
// 2. ECDH: ephemeral_secret × hop_x25519_public → shared_secret
// 3. KDF: HMAC-SHA256(key = "LOKI", shared_secret) → symmetric_key
// 4. Encrypt: AES-256-GCM(symmetric_key, random 12-byte IV, plaintext)
// 5. Output: IV || ciphertext || tag, plus the symmetric key and ephemeral public key
//
// The hop reverses steps 2–4 with its static secret and the ephemeral public key.
// Responses come back under the destination's symmetric key with the same layout.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use thiserror::Error;
use x25519_dalek::{EphemeralSecret, PublicKey};
use zeroize::Zeroizing;

/// Size of the AES-GCM IV prefixed to every ciphertext
pub const IV_SIZE: usize = 12;

/// Size of the AES-GCM authentication tag
pub const TAG_SIZE: usize = 16;

/// HMAC key used to turn an X25519 agreement into a symmetric key
const KDF_KEY: &[u8] = b"LOKI";

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),
    #[error("Encryption failed")]
    EncryptionFailed,
    #[error("Decryption failed")]
    DecryptionFailed,
    #[error("Ciphertext too short ({0} bytes)")]
    CiphertextTooShort(usize),
}

/// Output of encrypting one layer
#[derive(Clone)]
pub struct EncryptionResult {
    /// IV || ciphertext || tag
    pub ciphertext: Vec<u8>,
    /// Key the layer was encrypted under; kept for the destination layer to read the response
    pub symmetric_key: Zeroizing<[u8; 32]>,
    pub ephemeral_public_key: [u8; 32],
}

impl std::fmt::Debug for EncryptionResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionResult")
            .field("ciphertext_len", &self.ciphertext.len())
            .field("ephemeral_public_key", &hex::encode(self.ephemeral_public_key))
            .finish()
    }
}

/// Parse a hex encoded X25519 public key
pub fn parse_x25519_public_key(hex_key: &str) -> Result<PublicKey, CryptoError> {
    let bytes = hex::decode(hex_key).map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))?;
    let bytes: [u8; 32] = bytes
        .try_into()
        .map_err(|_| CryptoError::InvalidPublicKey("expected 32 bytes".into()))?;
    Ok(PublicKey::from(bytes))
}

/// Derive the AES key from an ECDH shared secret
pub fn derive_symmetric_key(shared_secret: &[u8]) -> Result<Zeroizing<[u8; 32]>, CryptoError> {
    // KeyInit also provides new_from_slice for Hmac
    let mut mac = <HmacSha256 as Mac>::new_from_slice(KDF_KEY)
        .map_err(|_| CryptoError::EncryptionFailed)?;
    mac.update(shared_secret);
    let digest = mac.finalize().into_bytes();

    let mut key = Zeroizing::new([0u8; 32]);
    key.copy_from_slice(&digest);
    Ok(key)
}

/// Encrypt under `key` with a fresh random IV; returns IV || ciphertext || tag
pub fn encrypt_aes_gcm(plaintext: &[u8], key: &[u8; 32]) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::EncryptionFailed)?;

    let mut iv = [0u8; IV_SIZE];
    OsRng.fill_bytes(&mut iv);

    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&iv), plaintext)
        .map_err(|_| CryptoError::EncryptionFailed)?;

    let mut out = Vec::with_capacity(IV_SIZE + ciphertext.len());
    out.extend_from_slice(&iv);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypt IV || ciphertext || tag under `key`
pub fn decrypt_aes_gcm(iv_and_ciphertext: &[u8], key: &[u8; 32]) -> Result<Vec<u8>, CryptoError> {
    if iv_and_ciphertext.len() < IV_SIZE + TAG_SIZE {
        return Err(CryptoError::CiphertextTooShort(iv_and_ciphertext.len()));
    }
    let (iv, ciphertext) = iv_and_ciphertext.split_at(IV_SIZE);

    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::DecryptionFailed)?;

    cipher
        .decrypt(Nonce::from_slice(iv), ciphertext)
        .map_err(|_| CryptoError::DecryptionFailed)
}

/// Encrypt `plaintext` for the holder of the hex encoded X25519 key
pub fn encrypt_for_public_key(
    plaintext: &[u8],
    x25519_public_key_hex: &str,
) -> Result<EncryptionResult, CryptoError> {
    let recipient = parse_x25519_public_key(x25519_public_key_hex)?;

    let ephemeral_secret = EphemeralSecret::random_from_rng(OsRng);
    let ephemeral_public_key = PublicKey::from(&ephemeral_secret);
    let shared_secret = ephemeral_secret.diffie_hellman(&recipient);

    let symmetric_key = derive_symmetric_key(shared_secret.as_bytes())?;
    let ciphertext = encrypt_aes_gcm(plaintext, &symmetric_key)?;

    Ok(EncryptionResult {
        ciphertext,
        symmetric_key,
        ephemeral_public_key: ephemeral_public_key.to_bytes(),
    })
}
