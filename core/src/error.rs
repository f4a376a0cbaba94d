// Error taxonomy for snode transport
//
// Distinguishes unreachable nodes, nodes that answered with an HTTP error,
// malformed or unusable responses, structural shortage of nodes, and the
// status codes that drive their own recovery (clock skew, swarm migration,
// proof-of-work renegotiation).

use serde_json::Value;
use thiserror::Error;

use crate::crypto::CryptoError;
use crate::transport::http::HttpError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Node unreachable: {0}")]
    NodeUnreachable(String),
    #[error("HTTP request failed with status code {0}")]
    RequestFailed(u16),
    #[error("Unhandled status code {0}")]
    Generic(u16),
    #[error("The user's clock is out of sync with the service node network")]
    ClockOutOfSync,
    #[error("The snode no longer serves the requested swarm")]
    SwarmMigrated,
    #[error("The proof of work is insufficient")]
    InsufficientProofOfWork,
    #[error("Couldn't find enough snodes to build a path")]
    InsufficientNodes,
    #[error("No snodes available")]
    NoNodesAvailable,
    #[error("Missing public key set for {0}")]
    MissingKeySet(String),
    #[error("Couldn't parse response: {0}")]
    ParsingFailed(String),
    #[error("Failed to calculate proof of work")]
    ProofOfWorkFailed,
    #[error("Destination rejected request with status code {status}")]
    DestinationRejected { status: u16, body: Option<Value> },
    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),
    #[error("HTTP error: {0}")]
    Http(#[from] HttpError),
    #[error("Background task failed: {0}")]
    Task(String),
}

impl ApiError {
    /// Whether a retry loop may try again after this error.
    ///
    /// A shortage of usable nodes is structural; retrying immediately cannot fix it.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ApiError::InsufficientNodes)
    }
}

pub type Result<T> = std::result::Result<T, ApiError>;
