//! HTTP JSON-RPC implementation of [`ChainClient`].
//!
//! The client dials lazily on first use. `reconnect` drops the HTTP
//! client and builds a fresh one; the scan loop invokes it once before
//! retrying a failed log query.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

use alloy::primitives::{Address, B256};

use super::client::ChainClient;
use super::error::ChainError;
use super::types::{LogEntry, LogFilter, TxRecord};

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// JSON-RPC request structure
#[derive(Serialize)]
struct JsonRpcRequest<T> {
    jsonrpc: &'static str,
    method: &'static str,
    params: T,
    id: u64,
}

/// JSON-RPC response structure
#[derive(Deserialize)]
struct JsonRpcResponse<T> {
    result: Option<T>,
    error: Option<JsonRpcError>,
}

#[derive(Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

pub struct EthRpcClient {
    provider_url: String,
    client: Mutex<Option<reqwest::Client>>,
    request_id: AtomicU64,
}

impl EthRpcClient {
    pub fn new(provider_url: String) -> Self {
        Self {
            provider_url,
            client: Mutex::new(None),
            request_id: AtomicU64::new(1),
        }
    }

    pub fn provider_url(&self) -> &str {
        &self.provider_url
    }

    async fn http_client(&self) -> Result<reqwest::Client, ChainError> {
        self.client
            .lock()
            .await
            .clone()
            .ok_or(ChainError::NotConnected)
    }

    fn build_client() -> Result<reqwest::Client, ChainError> {
        reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| ChainError::Connect(e.to_string()))
    }

    /// Make a JSON-RPC call where the node may legitimately answer `null`.
    async fn rpc_call_opt<T, R>(
        &self,
        method: &'static str,
        params: T,
    ) -> Result<Option<R>, ChainError>
    where
        T: Serialize + Send,
        R: DeserializeOwned,
    {
        let client = self.http_client().await?;
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            method,
            params,
            id: self.request_id.fetch_add(1, Ordering::Relaxed),
        };

        let response = client
            .post(&self.provider_url)
            .json(&request)
            .send()
            .await
            .map_err(|e| ChainError::Transport(format!("{method}: {e}")))?;

        let rpc: JsonRpcResponse<R> = response
            .json()
            .await
            .map_err(|e| ChainError::Decode(format!("{method}: {e}")))?;

        if let Some(error) = rpc.error {
            return Err(ChainError::Rpc {
                code: error.code,
                message: error.message,
            });
        }
        Ok(rpc.result)
    }

    /// Make a JSON-RPC call that must produce a result.
    async fn rpc_call<T, R>(&self, method: &'static str, params: T) -> Result<R, ChainError>
    where
        T: Serialize + Send,
        R: DeserializeOwned,
    {
        self.rpc_call_opt(method, params)
            .await?
            .ok_or_else(|| ChainError::Decode(format!("{method}: missing result")))
    }
}

fn parse_u64_quantity(raw: &str) -> Result<u64, ChainError> {
    u64::from_str_radix(raw.trim_start_matches("0x"), 16)
        .map_err(|e| ChainError::Decode(format!("invalid quantity {raw:?}: {e}")))
}

fn parse_u128_quantity(raw: &str) -> Result<u128, ChainError> {
    u128::from_str_radix(raw.trim_start_matches("0x"), 16)
        .map_err(|e| ChainError::Decode(format!("invalid quantity {raw:?}: {e}")))
}

#[async_trait]
impl ChainClient for EthRpcClient {
    async fn connect(&self) -> Result<(), ChainError> {
        let mut guard = self.client.lock().await;
        if guard.is_none() {
            debug!("dialing chain provider {}", self.provider_url);
            *guard = Some(Self::build_client()?);
        }
        Ok(())
    }

    async fn reconnect(&self) -> Result<(), ChainError> {
        let mut guard = self.client.lock().await;
        debug!("re-dialing chain provider {}", self.provider_url);
        *guard = Some(Self::build_client()?);
        Ok(())
    }

    async fn latest_block_number(&self) -> Result<u64, ChainError> {
        let empty: [u8; 0] = [];
        let raw: String = self.rpc_call("eth_blockNumber", empty).await?;
        parse_u64_quantity(&raw)
    }

    async fn filter_logs(&self, filter: &LogFilter) -> Result<Vec<LogEntry>, ChainError> {
        self.rpc_call("eth_getLogs", (filter,)).await
    }

    async fn transaction_by_hash(&self, hash: B256) -> Result<Option<TxRecord>, ChainError> {
        match self
            .rpc_call_opt::<_, TxRecord>("eth_getTransactionByHash", (hash,))
            .await
        {
            Ok(record) => Ok(record),
            // some providers answer "not found" instead of null
            Err(ChainError::Rpc { message, .. }) if message.contains("not found") => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn pending_nonce(&self, address: Address) -> Result<u64, ChainError> {
        let raw: String = self
            .rpc_call("eth_getTransactionCount", (address, "pending"))
            .await?;
        parse_u64_quantity(&raw)
    }

    async fn gas_price(&self) -> Result<u128, ChainError> {
        let empty: [u8; 0] = [];
        let raw: String = self.rpc_call("eth_gasPrice", empty).await?;
        parse_u128_quantity(&raw)
    }

    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<B256, ChainError> {
        self.rpc_call("eth_sendRawTransaction", (format!("0x{}", hex::encode(raw)),))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_quantities() {
        assert_eq!(parse_u64_quantity("0x10").unwrap(), 16);
        assert_eq!(parse_u64_quantity("0x0").unwrap(), 0);
        assert_eq!(parse_u128_quantity("0x3b9aca00").unwrap(), 1_000_000_000);
        assert!(parse_u64_quantity("0xzz").is_err());
    }

    #[tokio::test]
    async fn test_calls_require_connect() {
        let client = EthRpcClient::new("http://127.0.0.1:1".to_string());
        let err = client.latest_block_number().await.unwrap_err();
        assert!(matches!(err, ChainError::NotConnected));
    }

    #[tokio::test]
    async fn test_connect_is_lazy_and_idempotent() {
        let client = EthRpcClient::new("http://127.0.0.1:1".to_string());
        client.connect().await.unwrap();
        client.connect().await.unwrap();
        client.reconnect().await.unwrap();
    }
}
