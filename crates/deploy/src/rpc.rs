//! JSON-RPC adapter for a deployment sidecar.
//!
//! The sidecar owns keys, bytecode and gas handling; the orchestrator only
//! asks it to deploy an artifact, update the Hub and read/write parameters.
//! Every call returns once the transaction is confirmed or reverted.

use std::time::Duration;

use alloy_core::primitives::Address;
use anyhow::Context;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use url::Url;

use crate::{
    chain::{Deployer, ParameterSource, ParameterValue, Registry},
    error::ChainError,
};

/// Deployments wait for confirmation, so the request timeout is generous.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// JSON-RPC error code for a reverted execution.
const EXECUTION_REVERTED: i64 = 3;

/// Create an HTTP client configured for JSON-RPC requests.
pub fn create_client(timeout: Duration) -> Result<reqwest::Client, anyhow::Error> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .context("Failed to create HTTP client")
}

/// Chain collaborators backed by a JSON-RPC endpoint.
#[derive(Debug, Clone)]
pub struct RpcChain {
    client: reqwest::Client,
    url: Url,
}

impl RpcChain {
    pub fn new(url: Url) -> Result<Self, anyhow::Error> {
        Self::with_timeout(url, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(url: Url, timeout: Duration) -> Result<Self, anyhow::Error> {
        Ok(Self {
            client: create_client(timeout)?,
            url,
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Make a JSON-RPC call and deserialize the result.
    async fn call<T: DeserializeOwned>(&self, method: &str, params: Vec<Value>) -> Result<T, ChainError> {
        let response = self
            .client
            .post(self.url.clone())
            .json(&json!({
                "jsonrpc": "2.0",
                "method": method,
                "params": params,
                "id": 1
            }))
            .send()
            .await
            .map_err(|e| ChainError::Network(format!("Failed to send {method} request: {e}")))?;

        let body: Value = response
            .json()
            .await
            .map_err(|e| ChainError::Network(format!("Failed to parse {method} response: {e}")))?;

        if let Some(error) = body.get("error") {
            return Err(rpc_error(error));
        }

        let result = body
            .get("result")
            .cloned()
            .ok_or_else(|| ChainError::Network(format!("No result in {method} response")))?;

        serde_json::from_value(result)
            .map_err(|e| ChainError::Network(format!("Failed to deserialize {method} result: {e}")))
    }
}

/// Map a JSON-RPC error object: reverts are step failures like any other,
/// everything else is treated as a transport problem.
fn rpc_error(error: &Value) -> ChainError {
    let message = error
        .get("message")
        .and_then(|m| m.as_str())
        .unwrap_or("unknown")
        .to_string();

    let code = error.get("code").and_then(|c| c.as_i64());
    if code == Some(EXECUTION_REVERTED) || message.contains("revert") {
        ChainError::Reverted { reason: message }
    } else {
        ChainError::Network(format!("RPC error: {message}"))
    }
}

fn to_param<T: serde::Serialize>(value: T) -> Result<Value, ChainError> {
    serde_json::to_value(value).map_err(|e| ChainError::Network(format!("Failed to encode parameter: {e}")))
}

impl Deployer for RpcChain {
    async fn deploy(&self, artifact: &str, constructor_args: &[Value]) -> Result<Address, ChainError> {
        tracing::debug!(artifact, url = %self.url, "Submitting deployment");
        self.call(
            "hubdeploy_deploy",
            vec![json!(artifact), Value::Array(constructor_args.to_vec())],
        )
        .await
    }
}

impl Registry for RpcChain {
    async fn set_address(&self, alias: &str, address: Address) -> Result<(), ChainError> {
        let _: Value = self
            .call("hub_setContractAddress", vec![json!(alias), to_param(address)?])
            .await?;
        Ok(())
    }

    async fn get_address(&self, alias: &str) -> Result<Option<Address>, ChainError> {
        let address: Option<Address> = self
            .call("hub_getContractAddress", vec![json!(alias)])
            .await?;
        // The Hub returns the zero address for unknown names.
        Ok(address.filter(|a| !a.is_zero()))
    }
}

impl ParameterSource for RpcChain {
    async fn read_parameter(
        &self,
        address: Address,
        key: &str,
    ) -> Result<Option<ParameterValue>, ChainError> {
        self.call("parameters_get", vec![to_param(address)?, json!(key)])
            .await
    }

    async fn write_parameter(
        &self,
        address: Address,
        key: &str,
        value: ParameterValue,
    ) -> Result<(), ChainError> {
        let _: Value = self
            .call(
                "parameters_set",
                vec![to_param(address)?, json!(key), to_param(value)?],
            )
            .await?;
        Ok(())
    }
}
