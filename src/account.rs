use anyhow::{Context, Result};
use ethers::abi::{encode, Token};
use ethers::providers::Middleware;
use ethers::types::{Address, Bytes, TransactionRequest, H256, U256};
use ethers::utils::id;
use std::sync::Arc;

/// Kernel validation-id type byte for validator modules.
const VALIDATOR_TYPE: u8 = 0x01;

/// Calldata for Kernel's `initialize(bytes21,address,bytes,bytes)`: root
/// validator id (`0x01 ++ validator`), no hook, the owner address as
/// validator data, empty bootstrap data.
pub fn initialize_calldata(validator: Address, owner: Address) -> Bytes {
    let mut root_validator = vec![VALIDATOR_TYPE];
    root_validator.extend_from_slice(validator.as_bytes());

    let selector = id("initialize(bytes21,address,bytes,bytes)");
    let args = encode(&[
        Token::FixedBytes(root_validator),
        Token::Address(Address::zero()),
        Token::Bytes(owner.as_bytes().to_vec()),
        Token::Bytes(Vec::new()),
    ]);

    let mut data = selector.to_vec();
    data.extend_from_slice(&args);
    Bytes::from(data)
}

/// Submits the one-shot `initialize` call to the upgraded account through
/// the sponsor and returns the transaction hash.
///
/// Calling this against an already-initialized account reverts at the
/// contract level; that is not handled specially here.
pub async fn initialize_account<M: Middleware + 'static>(
    client: Arc<M>,
    account: Address,
    validator: Address,
    owner: Address,
    gas_limit: U256,
) -> Result<H256> {
    let tx = TransactionRequest::new()
        .to(account)
        .data(initialize_calldata(validator, owner))
        .gas(gas_limit);

    let pending = client
        .send_transaction(tx, None)
        .await
        .context("failed to send initialize tx")?;
    Ok(pending.tx_hash())
}
