//! Signer collaborator
//!
//! Private keys live in an external service. This side only ever passes an
//! opaque key reference and receives signed transaction bytes.

pub mod http;
pub mod mock;

pub use http::HttpSigner;
pub use mock::MockSigner;

use async_trait::async_trait;

use crate::core_types::Amount;
use crate::error::SignerError;

/// Response code the signing service uses for success
pub const SIGN_SUCCESS: u64 = 2000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignRequest {
    pub from: String,
    pub to: String,
    pub amount: Amount,
    pub token: String,
    pub nonce: String,
    pub key_ref: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignResponse {
    pub code: u64,
    pub message: String,
    pub signed_tx: String,
}

impl SignResponse {
    pub fn is_success(&self) -> bool {
        self.code == SIGN_SUCCESS && !self.signed_tx.is_empty()
    }
}

#[async_trait]
pub trait Signer: Send + Sync {
    /// Transport failures are errors. A refusal is a response with a
    /// non-success code.
    async fn sign(&self, request: &SignRequest) -> Result<SignResponse, SignerError>;
}
