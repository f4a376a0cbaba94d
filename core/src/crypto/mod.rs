// Cryptography module: onion layer encryption and proof of work

pub mod encrypt;
pub mod pow;

pub use encrypt::{
    decrypt_aes_gcm, derive_symmetric_key, encrypt_aes_gcm, encrypt_for_public_key, CryptoError,
    EncryptionResult, IV_SIZE,
};
pub use pow::ProofOfWork;
