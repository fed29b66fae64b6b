//! Transaction signing from a mnemonic-derived key

use cosmrs::bip32::{DerivationPath, Language, Mnemonic};
use cosmrs::crypto::secp256k1::SigningKey;
use cosmrs::crypto::PublicKey;
use cosmrs::proto::cosmwasm::wasm::v1::MsgExecuteContract;
use cosmrs::tendermint::chain::Id as ChainId;
use cosmrs::tx::{Body, Fee, Raw, SignDoc, SignerInfo};
use serde::Serialize;

use crate::error::{DispatchError, DispatchResult};

/// Cosmos HD derivation path used by both services
pub const DEFAULT_HD_PATH: &str = "m/44'/118'/0'/0/0";

/// Holds the account key pair and produces signed raw transactions
pub struct Signer {
    key: SigningKey,
    public_key: PublicKey,
    address: String,
    chain_id: ChainId,
}

impl Signer {
    /// Derive the signing key from a BIP-39 mnemonic
    pub fn from_mnemonic(mnemonic: &str, address_prefix: &str, chain_id: &str) -> DispatchResult<Self> {
        let path: DerivationPath = DEFAULT_HD_PATH
            .parse()
            .map_err(|error| DispatchError::Signing(format!("Invalid derivation path: {error}")))?;

        let key = SigningKey::derive_from_path(
            Mnemonic::new(mnemonic.trim(), Language::English)
                .map_err(|error| DispatchError::Signing(format!("Invalid mnemonic: {error}")))?
                .to_seed(""),
            &path,
        )
        .map_err(|error| {
            DispatchError::Signing(format!("Failed to derive signing key: {error}"))
        })?;

        let public_key = key.public_key();

        let address = public_key
            .account_id(address_prefix)
            .map_err(|error| DispatchError::Signing(format!("Failed to derive address: {error}")))?
            .to_string();

        let chain_id: ChainId = chain_id.parse().map_err(|error| {
            DispatchError::Configuration(format!("Invalid chain identifier: {error}"))
        })?;

        Ok(Self {
            key,
            public_key,
            address,
            chain_id,
        })
    }

    /// The bech32 address of the held key
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Build the transaction body for one contract execute message
    pub fn execute_body(
        &self,
        contract: &str,
        msg: &impl Serialize,
    ) -> DispatchResult<Body> {
        let msg = serde_json::to_vec(msg).map_err(|error| {
            DispatchError::Contract(format!("Failed to encode execute message: {error}"))
        })?;

        cosmrs::Any::from_msg(&MsgExecuteContract {
            sender: self.address.clone(),
            contract: contract.into(),
            msg,
            funds: Vec::new(),
        })
        .map(|msg| Body::new(vec![msg], "", 0u32))
        .map_err(|error| {
            DispatchError::Signing(format!("Failed to encode contract message: {error}"))
        })
    }

    /// Sign a transaction body into broadcastable form
    pub fn sign(
        &self,
        body: &Body,
        fee: Fee,
        account_number: u64,
        sequence: u64,
    ) -> DispatchResult<Raw> {
        let auth_info = SignerInfo::single_direct(Some(self.public_key), sequence).auth_info(fee);

        SignDoc::new(body, &auth_info, &self.chain_id, account_number)
            .and_then(|sign_doc| sign_doc.sign(&self.key))
            .map_err(|error| {
                DispatchError::Signing(format!("Failed to sign transaction: {error}"))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_MNEMONIC: &str = "glimpse drama thing brand detail frame spin boss warm people \
        river echo situate creek decorate inhale leaf illness rose order project pear ball stick";

    #[test]
    fn address_from_mnemonic() {
        let signer = Signer::from_mnemonic(TEST_MNEMONIC, "unolus", "testing-1").unwrap();

        assert_eq!(
            signer.address(),
            "unolus1j522qf8ewdj42emzlasppmyuxzg53keuq5jd7k"
        );
    }

    #[test]
    fn garbage_mnemonic_is_rejected() {
        assert!(matches!(
            Signer::from_mnemonic("not a mnemonic", "wasm", "testing-1"),
            Err(DispatchError::Signing(_))
        ));
    }
}
