use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::info;

use super::{SignRequest, SignResponse, Signer};
use crate::config::SignerConfig;
use crate::error::SignerError;

/// Client for the signing service's `POST /signTransaction`
pub struct HttpSigner {
    endpoint: String,
    nonce_account: String,
    decimals: u8,
    native_token: String,
    client: reqwest::Client,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct SignTransactionReq<'a> {
    from: &'a str,
    to: &'a str,
    amount: String,
    nonce_account: &'a str,
    nonce: &'a str,
    decimal: u8,
    key_ref: &'a str,
    /// Empty for the native coin
    mint_address: &'a str,
}

#[derive(Deserialize, Debug)]
struct SignTransactionRep {
    #[serde(default)]
    code: u64,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    raw_tx: String,
}

impl HttpSigner {
    pub fn new(config: &SignerConfig, native_token: &str) -> Result<Self, SignerError> {
        info!("Initializing signer client at {}", config.url);

        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|e| SignerError::Http(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            endpoint: format!("{}/signTransaction", config.url.trim_end_matches('/')),
            nonce_account: config.nonce_account.clone(),
            decimals: config.decimals,
            native_token: native_token.to_string(),
            client,
        })
    }

    fn wire_request<'a>(&'a self, request: &'a SignRequest) -> SignTransactionReq<'a> {
        let mint_address = if request.token == self.native_token {
            ""
        } else {
            request.token.as_str()
        };
        SignTransactionReq {
            from: &request.from,
            to: &request.to,
            amount: request.amount.to_string(),
            nonce_account: &self.nonce_account,
            nonce: &request.nonce,
            decimal: self.decimals,
            key_ref: &request.key_ref,
            mint_address,
        }
    }
}

#[async_trait]
impl Signer for HttpSigner {
    async fn sign(&self, request: &SignRequest) -> Result<SignResponse, SignerError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&self.wire_request(request))
            .send()
            .await
            .map_err(|e| SignerError::Http(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        if status.is_client_error() || status.is_server_error() {
            return Err(SignerError::Http(format!(
                "{} from POST {}",
                status, self.endpoint
            )));
        }

        let rep: SignTransactionRep = response
            .json()
            .await
            .map_err(|e| SignerError::InvalidResponse(e.to_string()))?;

        Ok(SignResponse {
            code: rep.code,
            message: rep.msg,
            signed_tx: rep.raw_tx,
        })
    }
}
