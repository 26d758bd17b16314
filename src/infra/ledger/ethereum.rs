//! Ethereum JSON-RPC ledger client.
//!
//! Only reads are performed: receipts for finality verdicts and the chain
//! head for health checks.

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::domain::{AppError, LedgerClient, LedgerError, TransactionReceipt};

/// Configuration for the RPC client
#[derive(Debug, Clone)]
pub struct RpcClientConfig {
    pub timeout: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl Default for RpcClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            max_retries: 2,
            retry_delay: Duration::from_millis(250),
        }
    }
}

/// Ledger client backed by an Ethereum node's JSON-RPC endpoint
pub struct EthRpcLedgerClient {
    http_client: Client,
    rpc_url: SecretString,
    config: RpcClientConfig,
}

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a, T: Serialize> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: T,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse<T> {
    result: Option<T>,
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawReceipt {
    transaction_hash: String,
    block_number: Option<String>,
    status: Option<String>,
}

/// Parses a JSON-RPC hex quantity such as `"0x1"`.
fn parse_quantity(raw: &str) -> Result<u64, AppError> {
    let digits = raw
        .strip_prefix("0x")
        .or_else(|| raw.strip_prefix("0X"))
        .ok_or_else(|| {
            AppError::Ledger(LedgerError::RpcError(format!("Invalid quantity: {raw}")))
        })?;
    if digits.is_empty() {
        return Err(AppError::Ledger(LedgerError::RpcError(format!(
            "Invalid quantity: {raw}"
        ))));
    }
    u64::from_str_radix(digits, 16)
        .map_err(|e| AppError::Ledger(LedgerError::RpcError(format!("{raw}: {e}"))))
}

impl TryFrom<RawReceipt> for TransactionReceipt {
    type Error = AppError;

    fn try_from(raw: RawReceipt) -> Result<Self, Self::Error> {
        Ok(Self {
            transaction_hash: raw.transaction_hash,
            block_number: raw.block_number.as_deref().map(parse_quantity).transpose()?,
            status: raw.status.as_deref().map(parse_quantity).transpose()?,
        })
    }
}

impl EthRpcLedgerClient {
    /// Create a new RPC ledger client with custom configuration
    pub fn new(rpc_url: SecretString, config: RpcClientConfig) -> Result<Self, AppError> {
        let http_client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| AppError::Ledger(LedgerError::Connection(e.to_string())))?;
        info!(timeout = ?config.timeout, "Created ledger RPC client");
        Ok(Self {
            http_client,
            rpc_url,
            config,
        })
    }

    /// Create a new RPC ledger client with default configuration
    pub fn with_defaults(rpc_url: SecretString) -> Result<Self, AppError> {
        Self::new(rpc_url, RpcClientConfig::default())
    }

    /// Make an RPC call with retries; a JSON `null` result comes back as `None`.
    #[instrument(skip(self, params))]
    async fn rpc_call<P: Serialize, R: DeserializeOwned>(
        &self,
        method: &str,
        params: P,
    ) -> Result<Option<R>, AppError> {
        let mut last_error = None;
        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                tokio::time::sleep(self.config.retry_delay).await;
            }
            match self.do_rpc_call(method, &params).await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    warn!(attempt = attempt, error = ?e, method = %method, "RPC call failed");
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| {
            AppError::Ledger(LedgerError::RpcError("Unknown error".to_string()))
        }))
    }

    /// Execute a single RPC call
    async fn do_rpc_call<P: Serialize, R: DeserializeOwned>(
        &self,
        method: &str,
        params: &P,
    ) -> Result<Option<R>, AppError> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            id: 1,
            method,
            params,
        };

        let response = self
            .http_client
            .post(self.rpc_url.expose_secret())
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AppError::Ledger(LedgerError::Timeout(e.to_string()))
                } else if e.is_connect() {
                    AppError::Ledger(LedgerError::Connection(e.to_string()))
                } else {
                    AppError::Ledger(LedgerError::RpcError(e.to_string()))
                }
            })?;

        let rpc_response: JsonRpcResponse<R> = response
            .json()
            .await
            .map_err(|e| AppError::Ledger(LedgerError::RpcError(e.to_string())))?;

        if let Some(error) = rpc_response.error {
            return Err(AppError::Ledger(LedgerError::RpcError(format!(
                "{}: {}",
                error.code, error.message
            ))));
        }

        Ok(rpc_response.result)
    }

    /// Current chain head.
    #[instrument(skip(self))]
    pub async fn block_number(&self) -> Result<u64, AppError> {
        let head: String = self
            .rpc_call("eth_blockNumber", Vec::<()>::new())
            .await?
            .ok_or_else(|| {
                AppError::Ledger(LedgerError::RpcError("Empty response".to_string()))
            })?;
        parse_quantity(&head)
    }
}

#[async_trait]
impl LedgerClient for EthRpcLedgerClient {
    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<(), AppError> {
        self.block_number().await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn transaction_receipt(
        &self,
        reference: &str,
    ) -> Result<Option<TransactionReceipt>, AppError> {
        let raw: Option<RawReceipt> = self
            .rpc_call("eth_getTransactionReceipt", [reference])
            .await?;

        match raw {
            Some(raw) => {
                let receipt = TransactionReceipt::try_from(raw)?;
                debug!(
                    reference = %reference,
                    block_number = ?receipt.block_number,
                    status = ?receipt.status,
                    "Fetched transaction receipt"
                );
                Ok(Some(receipt))
            }
            None => {
                debug!(reference = %reference, "Transaction not yet mined");
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::FinalityVerdict;
    use axum::{Json, Router, routing::post};
    use serde_json::{Value, json};

    const SUCCESS_HASH: &str =
        "0x1111111111111111111111111111111111111111111111111111111111111111";
    const REVERTED_HASH: &str =
        "0x2222222222222222222222222222222222222222222222222222222222222222";
    const PENDING_HASH: &str =
        "0x3333333333333333333333333333333333333333333333333333333333333333";

    async fn rpc_stub(Json(request): Json<Value>) -> Json<Value> {
        let method = request["method"].as_str().unwrap_or_default();
        let result = match method {
            "eth_blockNumber" => json!("0x10d4f"),
            "eth_getTransactionReceipt" => match request["params"][0].as_str() {
                Some(SUCCESS_HASH) => json!({
                    "transactionHash": SUCCESS_HASH,
                    "blockNumber": "0x10d4e",
                    "status": "0x1"
                }),
                Some(REVERTED_HASH) => json!({
                    "transactionHash": REVERTED_HASH,
                    "blockNumber": "0x10d4e",
                    "status": "0x0"
                }),
                _ => Value::Null,
            },
            _ => {
                return Json(json!({
                    "jsonrpc": "2.0",
                    "id": 1,
                    "error": { "code": -32601, "message": "method not found" }
                }));
            }
        };
        Json(json!({ "jsonrpc": "2.0", "id": 1, "result": result }))
    }

    async fn spawn_stub() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = Router::new().route("/", post(rpc_stub));
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/")
    }

    fn client(url: String) -> EthRpcLedgerClient {
        let config = RpcClientConfig {
            timeout: Duration::from_secs(2),
            max_retries: 0,
            retry_delay: Duration::from_millis(10),
        };
        EthRpcLedgerClient::new(SecretString::from(url), config).unwrap()
    }

    #[test]
    fn test_parse_quantity() {
        assert_eq!(parse_quantity("0x1").unwrap(), 1);
        assert_eq!(parse_quantity("0x0").unwrap(), 0);
        assert_eq!(parse_quantity("0x10d4f").unwrap(), 68943);
        assert!(parse_quantity("1").is_err());
        assert!(parse_quantity("0x").is_err());
        assert!(parse_quantity("0xzz").is_err());
    }

    #[test]
    fn test_rpc_client_config_default() {
        let config = RpcClientConfig::default();
        assert_eq!(config.timeout, Duration::from_secs(10));
        assert_eq!(config.max_retries, 2);
        assert_eq!(config.retry_delay, Duration::from_millis(250));
    }

    #[test]
    fn test_receipt_without_status_field() {
        let raw = RawReceipt {
            transaction_hash: SUCCESS_HASH.to_string(),
            block_number: Some("0x1".to_string()),
            status: None,
        };
        let receipt = TransactionReceipt::try_from(raw).unwrap();
        assert_eq!(receipt.status, None);
        assert_eq!(
            FinalityVerdict::from_receipt_status(receipt.status),
            FinalityVerdict::Failure
        );
    }

    #[tokio::test]
    async fn test_resolve_against_stub_node() {
        let client = client(spawn_stub().await);

        assert_eq!(
            client.resolve(SUCCESS_HASH).await.unwrap(),
            FinalityVerdict::Success
        );
        assert_eq!(
            client.resolve(REVERTED_HASH).await.unwrap(),
            FinalityVerdict::Failure
        );

        let pending = client.resolve(PENDING_HASH).await;
        assert!(matches!(
            pending,
            Err(AppError::Ledger(LedgerError::ReceiptUnavailable(_)))
        ));
    }

    #[tokio::test]
    async fn test_health_check_reads_block_number() {
        let client = client(spawn_stub().await);
        assert_eq!(client.block_number().await.unwrap(), 68943);
        assert!(client.health_check().await.is_ok());
    }

    #[tokio::test]
    async fn test_unreachable_node_is_transient() {
        let client = client("http://127.0.0.1:9/".to_string());
        let err = client.resolve(SUCCESS_HASH).await.unwrap_err();
        assert!(err.is_transient());
    }
}
