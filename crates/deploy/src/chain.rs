//! Collaborator interfaces to the chain: the deployer, the Hub registry and
//! parameter storage.
//!
//! The orchestrator only talks to the chain through these traits. Each call
//! resolves once the underlying transaction is confirmed or reverted.

use std::future::Future;

use alloy_core::primitives::{Address, Bytes, U256};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ChainError;

/// Submits contract creation transactions.
pub trait Deployer: Send + Sync {
    /// Deploy `artifact` with the given constructor arguments and return its address.
    fn deploy(
        &self,
        artifact: &str,
        constructor_args: &[Value],
    ) -> impl Future<Output = Result<Address, ChainError>> + Send;
}

/// The Hub: maps logical contract names to their current address.
pub trait Registry: Send + Sync {
    fn set_address(
        &self,
        alias: &str,
        address: Address,
    ) -> impl Future<Output = Result<(), ChainError>> + Send;

    fn get_address(
        &self,
        alias: &str,
    ) -> impl Future<Output = Result<Option<Address>, ChainError>> + Send;
}

/// Per-contract parameter storage read and written during migrations.
pub trait ParameterSource: Send + Sync {
    /// Returns `None` when `key` is not set on the contract at `address`.
    fn read_parameter(
        &self,
        address: Address,
        key: &str,
    ) -> impl Future<Output = Result<Option<ParameterValue>, ChainError>> + Send;

    fn write_parameter(
        &self,
        address: Address,
        key: &str,
        value: ParameterValue,
    ) -> impl Future<Output = Result<(), ChainError>> + Send;
}

/// Type of a stored parameter.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ParameterKind {
    Uint,
    Address,
    Bool,
    Bytes,
}

/// A parameter value as held by parameter storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum ParameterValue {
    Uint(U256),
    Address(Address),
    Bool(bool),
    Bytes(Bytes),
}

impl ParameterValue {
    pub fn kind(&self) -> ParameterKind {
        match self {
            Self::Uint(_) => ParameterKind::Uint,
            Self::Address(_) => ParameterKind::Address,
            Self::Bool(_) => ParameterKind::Bool,
            Self::Bytes(_) => ParameterKind::Bytes,
        }
    }
}

impl From<u64> for ParameterValue {
    fn from(value: u64) -> Self {
        Self::Uint(U256::from(value))
    }
}

impl From<Address> for ParameterValue {
    fn from(value: Address) -> Self {
        Self::Address(value)
    }
}

impl From<bool> for ParameterValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}
