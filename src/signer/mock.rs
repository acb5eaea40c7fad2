use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use super::{SIGN_SUCCESS, SignRequest, SignResponse, Signer};
use crate::error::SignerError;

/// Code returned for scripted refusals
pub const MOCK_REFUSED: u64 = 4001;

/// Signs everything as `signed:<from>:<to>:<token>:<amount>:<nonce>` unless
/// told otherwise
#[derive(Debug, Default)]
pub struct MockSigner {
    refused_sources: Mutex<HashSet<String>>,
    fail_transport: AtomicU32,
    calls: AtomicUsize,
}

impl MockSigner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer requests from `address` with a non-success code
    pub fn refuse_source(&self, address: &str) {
        self.refused_sources
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(address.to_string());
    }

    pub fn fail_next_requests(&self, n: u32) {
        self.fail_transport.store(n, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Signer for MockSigner {
    async fn sign(&self, request: &SignRequest) -> Result<SignResponse, SignerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if self
            .fail_transport
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(SignerError::Http("mock signer unreachable".into()));
        }

        let refused = self
            .refused_sources
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&request.from);
        if refused {
            return Ok(SignResponse {
                code: MOCK_REFUSED,
                message: "key unavailable".into(),
                signed_tx: String::new(),
            });
        }

        Ok(SignResponse {
            code: SIGN_SUCCESS,
            message: "ok".into(),
            signed_tx: format!(
                "signed:{}:{}:{}:{}:{}",
                request.from, request.to, request.token, request.amount, request.nonce
            ),
        })
    }
}
