//! Node communication over gRPC
//!
//! This module provides:
//! - A thin client over one shared gRPC channel to the node
//! - Account, simulation, broadcast and inclusion-status calls
//! - CosmWasm smart-contract state queries
//! - The `NodeApi` trait seam the dispatch engine is generic over

pub mod signer;

pub use signer::Signer;

use async_trait::async_trait;
use cosmrs::proto::cosmos::auth::v1beta1::{
    query_client::QueryClient as AuthQueryClient, BaseAccount, QueryAccountRequest,
};
use cosmrs::proto::cosmos::tx::v1beta1::{
    service_client::ServiceClient, BroadcastMode, BroadcastTxRequest, GetTxRequest,
    SimulateRequest,
};
use cosmrs::proto::cosmwasm::wasm::v1::{
    query_client::QueryClient as WasmQueryClient, QuerySmartContractStateRequest,
};
use prost::Message;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tonic::transport::{Channel, Endpoint};
use tracing::{debug, info};

use crate::error::{DispatchError, DispatchResult};

/// Account facts needed for signing: the number is immutable, the sequence
/// advances with every accepted transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccountInfo {
    pub account_number: u64,
    pub sequence: u64,
}

/// Mempool-level acknowledgement of a broadcast
#[derive(Debug, Clone)]
pub struct BroadcastResponse {
    pub code: u32,
    pub tx_hash: String,
    pub raw_log: String,
}

/// On-chain execution result, available once the transaction is included
#[derive(Debug, Clone)]
pub struct TxStatus {
    pub code: u32,
    pub height: i64,
    pub gas_wanted: i64,
    pub gas_used: i64,
    pub raw_log: String,
}

/// Node RPC surface the dispatch engine depends on
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NodeApi: Send + Sync {
    /// Query the account number and next sequence for an address
    async fn account_info(&self, address: &str) -> DispatchResult<AccountInfo>;

    /// Simulate a signed transaction, returning the gas it used
    async fn simulate(&self, tx_bytes: Vec<u8>) -> DispatchResult<u64>;

    /// Submit a signed transaction and wait for the mempool-level answer
    async fn broadcast_sync(&self, tx_bytes: Vec<u8>) -> DispatchResult<BroadcastResponse>;

    /// Look a transaction up by hash; `None` until it is included
    async fn tx_status(&self, tx_hash: &str) -> DispatchResult<Option<TxStatus>>;

    /// Raw CosmWasm smart query against a contract
    async fn smart_query_raw(&self, address: &str, query: Vec<u8>) -> DispatchResult<Vec<u8>>;
}

/// Typed smart query: serializes the message, deserializes the answer
pub async fn smart_query<N, Q, R>(node: &N, address: &str, query: &Q) -> DispatchResult<R>
where
    N: NodeApi + ?Sized,
    Q: Serialize + Sync,
    R: DeserializeOwned,
{
    let query = serde_json::to_vec(query)
        .map_err(|error| DispatchError::Contract(format!("Failed to encode query: {error}")))?;

    let data = node.smart_query_raw(address, query).await?;

    serde_json::from_slice(&data).map_err(|error| {
        DispatchError::Contract(format!("Malformed response from {address}: {error}"))
    })
}

/// Client over a single shared gRPC channel
#[derive(Clone)]
pub struct NodeClient {
    channel: Channel,
}

impl NodeClient {
    /// Connect to the node's gRPC endpoint
    pub async fn connect(uri: &str) -> DispatchResult<Self> {
        let endpoint = Endpoint::from_shared(uri.to_owned()).map_err(|error| {
            DispatchError::Configuration(format!("Invalid node gRPC URI: {error}"))
        })?;

        let channel = endpoint.connect().await.map_err(|error| {
            DispatchError::TransientNode {
                message: format!("Failed to connect to node gRPC: {error}"),
            }
        })?;

        info!("Connected to node gRPC at {uri}");

        Ok(Self { channel })
    }
}

#[async_trait]
impl NodeApi for NodeClient {
    async fn account_info(&self, address: &str) -> DispatchResult<AccountInfo> {
        let account = AuthQueryClient::new(self.channel.clone())
            .account(QueryAccountRequest {
                address: address.into(),
            })
            .await
            .map_err(transient)?
            .into_inner()
            .account
            .ok_or_else(|| DispatchError::AccountNotFound {
                address: address.into(),
            })?;

        let account = BaseAccount::decode(account.value.as_slice()).map_err(|error| {
            DispatchError::TransientNode {
                message: format!("Malformed account response: {error}"),
            }
        })?;

        debug!(
            account_number = account.account_number,
            sequence = account.sequence,
            "Fetched account data"
        );

        Ok(AccountInfo {
            account_number: account.account_number,
            sequence: account.sequence,
        })
    }

    async fn simulate(&self, tx_bytes: Vec<u8>) -> DispatchResult<u64> {
        ServiceClient::new(self.channel.clone())
            .simulate(SimulateRequest {
                tx_bytes,
                ..Default::default()
            })
            .await
            .map_err(transient)?
            .into_inner()
            .gas_info
            .map(|gas_info| gas_info.gas_used)
            .ok_or_else(|| DispatchError::TransientNode {
                message: "Simulation response carried no gas info".into(),
            })
    }

    async fn broadcast_sync(&self, tx_bytes: Vec<u8>) -> DispatchResult<BroadcastResponse> {
        let response = ServiceClient::new(self.channel.clone())
            .broadcast_tx(BroadcastTxRequest {
                tx_bytes,
                mode: BroadcastMode::Sync as i32,
            })
            .await
            .map_err(transient)?
            .into_inner()
            .tx_response
            .ok_or_else(|| DispatchError::TransientNode {
                message: "Broadcast response carried no result".into(),
            })?;

        Ok(BroadcastResponse {
            code: response.code,
            tx_hash: response.txhash,
            raw_log: response.raw_log,
        })
    }

    async fn tx_status(&self, tx_hash: &str) -> DispatchResult<Option<TxStatus>> {
        let response = ServiceClient::new(self.channel.clone())
            .get_tx(GetTxRequest {
                hash: tx_hash.into(),
            })
            .await;

        let response = match response {
            Ok(response) => response,
            Err(status) if status.code() == tonic::Code::NotFound => return Ok(None),
            Err(status) => return Err(transient(status)),
        };

        Ok(response.into_inner().tx_response.map(|tx| TxStatus {
            code: tx.code,
            height: tx.height,
            gas_wanted: tx.gas_wanted,
            gas_used: tx.gas_used,
            raw_log: tx.raw_log,
        }))
    }

    async fn smart_query_raw(&self, address: &str, query: Vec<u8>) -> DispatchResult<Vec<u8>> {
        let data = WasmQueryClient::new(self.channel.clone())
            .smart_contract_state(QuerySmartContractStateRequest {
                address: address.into(),
                query_data: query,
            })
            .await
            .map_err(transient)?
            .into_inner()
            .data;

        debug!(
            data = %String::from_utf8_lossy(&data),
            "Smart query against {address} returned successfully"
        );

        Ok(data)
    }
}

fn transient(status: tonic::Status) -> DispatchError {
    DispatchError::TransientNode {
        message: status.to_string(),
    }
}
