use std::collections::HashMap;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

/// Failure issuing an external transfer. Timeouts are definite failures
/// for the group; the caller never retries within the same run.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("transfer api rejected the request: {0}")]
    Rejected(String),

    #[error("transfer api timed out")]
    Timeout,

    #[error("transfer api unreachable: {0}")]
    Transport(String),
}

/// Request for one external transfer. `idempotency_key` is always the
/// Transfer row id, so a re-issued call settles the same payout.
#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub destination_account: String,
    pub amount: i64,
    pub currency: String,
    pub idempotency_key: Uuid,
    pub metadata: Value,
}

#[derive(Debug, Clone)]
pub struct IssuedTransfer {
    pub external_id: String,
}

/// External transfer-issuance API. The processor's own settlement
/// guarantees are its business; we only rely on idempotency per key.
#[async_trait]
pub trait TransferGateway: Send + Sync {
    async fn issue_transfer(&self, req: TransferRequest) -> Result<IssuedTransfer, GatewayError>;
}

/// Resolves payout plumbing for both parties: the marketer's connected
/// destination account and whether the creator's funding side is usable.
#[async_trait]
pub trait AccountResolver: Send + Sync {
    async fn marketer_account(&self, marketer_id: Uuid) -> Result<Option<String>>;

    async fn creator_funding_ready(&self, creator_id: Uuid) -> Result<bool>;
}

/// JSON-over-HTTP gateway client.
pub struct HttpTransferGateway {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

#[derive(Deserialize)]
struct TransferApiResponse {
    id: String,
}

impl HttpTransferGateway {
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }
}

#[async_trait]
impl TransferGateway for HttpTransferGateway {
    async fn issue_transfer(&self, req: TransferRequest) -> Result<IssuedTransfer, GatewayError> {
        let url = format!("{}/transfers", self.base_url);
        let body = serde_json::json!({
            "destination": req.destination_account,
            "amount": req.amount,
            "currency": req.currency,
            "metadata": req.metadata,
        });

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .header("Idempotency-Key", req.idempotency_key.to_string())
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GatewayError::Timeout
                } else {
                    GatewayError::Transport(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            return Err(GatewayError::Rejected(format!("{status}: {detail}")));
        }

        let parsed: TransferApiResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;
        Ok(IssuedTransfer {
            external_id: parsed.id,
        })
    }
}

/// Resolver backed by static maps; used in tests and for local runs.
#[derive(Default)]
pub struct StaticAccounts {
    marketer_accounts: HashMap<Uuid, String>,
    funded_creators: Vec<Uuid>,
}

impl StaticAccounts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_marketer(mut self, marketer_id: Uuid, account: &str) -> Self {
        self.marketer_accounts.insert(marketer_id, account.to_string());
        self
    }

    pub fn with_funded_creator(mut self, creator_id: Uuid) -> Self {
        self.funded_creators.push(creator_id);
        self
    }
}

#[async_trait]
impl AccountResolver for StaticAccounts {
    async fn marketer_account(&self, marketer_id: Uuid) -> Result<Option<String>> {
        Ok(self.marketer_accounts.get(&marketer_id).cloned())
    }

    async fn creator_funding_ready(&self, creator_id: Uuid) -> Result<bool> {
        Ok(self.funded_creators.contains(&creator_id))
    }
}
