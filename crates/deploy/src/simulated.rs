//! In-memory chain implementing every collaborator.
//!
//! Addresses are derived like CREATE addresses from a fixed deployer account
//! and an incrementing nonce, so runs are reproducible. Failures can be
//! injected per artifact or per parameter key.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::Arc,
};

use alloy_core::primitives::{Address, address};
use serde_json::Value;
use tokio::sync::Mutex;

use crate::{
    chain::{Deployer, ParameterSource, ParameterValue, Registry},
    error::ChainError,
};

/// Default account that "sends" simulated deployments (anvil's first dev account).
pub const SIMULATED_DEPLOYER: Address = address!("f39fd6e51aad88f6f4ce6ab8827279cfffb92266");

#[derive(Debug, Default)]
struct ChainState {
    nonce: u64,
    contracts: BTreeMap<Address, String>,
    hub: BTreeMap<String, Address>,
    parameters: HashMap<(Address, String), ParameterValue>,
    reverting: HashSet<String>,
    failing_writes: HashSet<String>,
    offline: bool,
    transactions: u64,
}

impl ChainState {
    fn ensure_online(&self) -> Result<(), ChainError> {
        if self.offline {
            return Err(ChainError::Network("simulated chain is offline".to_string()));
        }
        Ok(())
    }
}

/// Shared handle to a simulated chain. Clones see the same state.
#[derive(Debug, Clone)]
pub struct SimulatedChain {
    deployer: Address,
    state: Arc<Mutex<ChainState>>,
}

impl Default for SimulatedChain {
    fn default() -> Self {
        Self::new(SIMULATED_DEPLOYER)
    }
}

impl SimulatedChain {
    pub fn new(deployer: Address) -> Self {
        Self {
            deployer,
            state: Arc::new(Mutex::new(ChainState::default())),
        }
    }

    /// Make every deployment of `artifact` revert.
    pub async fn revert_deploys_of(&self, artifact: &str) {
        self.state.lock().await.reverting.insert(artifact.to_string());
    }

    /// Make every write of parameter `key` revert.
    pub async fn revert_writes_of(&self, key: &str) {
        self.state
            .lock()
            .await
            .failing_writes
            .insert(key.to_string());
    }

    /// Drop all injected failures.
    pub async fn heal(&self) {
        let mut state = self.state.lock().await;
        state.reverting.clear();
        state.failing_writes.clear();
        state.offline = false;
    }

    pub async fn set_offline(&self, offline: bool) {
        self.state.lock().await.offline = offline;
    }

    /// Seed a parameter without counting a transaction.
    pub async fn seed_parameter(&self, address: Address, key: &str, value: ParameterValue) {
        self.state
            .lock()
            .await
            .parameters
            .insert((address, key.to_string()), value);
    }

    pub async fn parameter(&self, address: Address, key: &str) -> Option<ParameterValue> {
        self.state
            .lock()
            .await
            .parameters
            .get(&(address, key.to_string()))
            .cloned()
    }

    pub async fn hub_entry(&self, alias: &str) -> Option<Address> {
        self.state.lock().await.hub.get(alias).copied()
    }

    /// Artifact deployed at `address`, if any.
    pub async fn artifact_at(&self, address: Address) -> Option<String> {
        self.state.lock().await.contracts.get(&address).cloned()
    }

    pub async fn deployment_count(&self) -> usize {
        self.state.lock().await.contracts.len()
    }

    /// Number of confirmed state-changing transactions.
    pub async fn transaction_count(&self) -> u64 {
        self.state.lock().await.transactions
    }
}

impl Deployer for SimulatedChain {
    async fn deploy(&self, artifact: &str, constructor_args: &[Value]) -> Result<Address, ChainError> {
        let mut state = self.state.lock().await;
        state.ensure_online()?;

        // A reverted creation still burns the nonce.
        let nonce = state.nonce;
        state.nonce += 1;

        if state.reverting.contains(artifact) {
            return Err(ChainError::Reverted {
                reason: format!("{artifact} constructor reverted"),
            });
        }

        let address = self.deployer.create(nonce);
        state.contracts.insert(address, artifact.to_string());
        state.transactions += 1;

        tracing::trace!(artifact, %address, nonce, args = constructor_args.len(), "Simulated deployment");
        Ok(address)
    }
}

impl Registry for SimulatedChain {
    async fn set_address(&self, alias: &str, address: Address) -> Result<(), ChainError> {
        let mut state = self.state.lock().await;
        state.ensure_online()?;

        if !state.contracts.contains_key(&address) {
            return Err(ChainError::Reverted {
                reason: format!("no contract at {address}"),
            });
        }

        state.hub.insert(alias.to_string(), address);
        state.transactions += 1;
        Ok(())
    }

    async fn get_address(&self, alias: &str) -> Result<Option<Address>, ChainError> {
        let state = self.state.lock().await;
        state.ensure_online()?;
        Ok(state.hub.get(alias).copied())
    }
}

impl ParameterSource for SimulatedChain {
    async fn read_parameter(
        &self,
        address: Address,
        key: &str,
    ) -> Result<Option<ParameterValue>, ChainError> {
        let state = self.state.lock().await;
        state.ensure_online()?;
        Ok(state.parameters.get(&(address, key.to_string())).cloned())
    }

    async fn write_parameter(
        &self,
        address: Address,
        key: &str,
        value: ParameterValue,
    ) -> Result<(), ChainError> {
        let mut state = self.state.lock().await;
        state.ensure_online()?;

        if state.failing_writes.contains(key) {
            return Err(ChainError::Reverted {
                reason: format!("setter for {key} reverted"),
            });
        }

        state.parameters.insert((address, key.to_string()), value);
        state.transactions += 1;
        Ok(())
    }
}
