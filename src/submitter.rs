use anyhow::{Context, Result};
use ethers::abi::{encode, AbiParser, Token};
use ethers::contract::Contract;
use ethers::providers::Middleware;
use ethers::types::{Address, Bytes, TransactionRequest, H256, U256};
use ethers::utils::id;
use std::sync::Arc;

use crate::bundler::BundlerClient;
use crate::encoding::{
    encode_execute_call, encode_execution_batch, user_op_to_json, EXEC_MODE_BATCH_DEFAULT,
};
use crate::gas::GasValues;
use crate::types::{Call, UserOperation};

/// Reads the account's current operation nonce from
/// `EntryPoint.getNonce(sender, key)` (key space 0).
///
/// Operations execute in strict per-account nonce order, so this must be
/// fetched immediately before building each operation; a stale value is
/// rejected by the entry point.
pub async fn fetch_entrypoint_nonce<M: Middleware + 'static>(
    client: Arc<M>,
    entrypoint: Address,
    account: Address,
) -> Result<U256> {
    let entrypoint_abi = AbiParser::default()
        .parse(&["function getNonce(address sender, uint192 key) view returns (uint256)"])?;
    let entrypoint_c = Contract::new(entrypoint, entrypoint_abi, client);

    let nonce: U256 = entrypoint_c
        .method("getNonce", (account, U256::zero()))?
        .call()
        .await
        .context("entryPoint.getNonce failed")?;
    Ok(nonce)
}

/// Assembles an unsigned operation executing `calls` as one batch under the
/// default batch mode. `init_code` stays empty: the sender is a delegated
/// EOA, not a factory-deployed account.
pub fn build_user_operation(
    sender: Address,
    nonce: U256,
    calls: &[Call],
    gas: &GasValues,
) -> UserOperation {
    let batch = encode_execution_batch(calls);
    let call_data = encode_execute_call(EXEC_MODE_BATCH_DEFAULT, &batch);

    UserOperation {
        sender,
        nonce,
        init_code: Bytes::new(),
        call_data,
        verification_gas_limit: gas.verification_gas_limit,
        call_gas_limit: gas.call_gas_limit,
        pre_verification_gas: gas.pre_verification_gas,
        max_priority_fee_per_gas: gas.max_priority_fee_per_gas,
        max_fee_per_gas: gas.max_fee_per_gas,
        paymaster_and_data: Bytes::new(),
        signature: Bytes::new(),
    }
}

/// Bundler path: submits the signed operation's wire fields and returns the
/// bundler's tracking hash.
pub async fn submit_via_bundler(
    bundler: &BundlerClient,
    entrypoint: Address,
    op: &UserOperation,
) -> Result<H256> {
    let wire = user_op_to_json(op)?;
    bundler.send_user_operation(wire, entrypoint).await
}

/// Direct path: calls `EntryPoint.handleOps` from the sponsor, bypassing
/// the bundler. Used for self-sponsored batches.
pub async fn submit_direct<M: Middleware + 'static>(
    client: Arc<M>,
    entrypoint: Address,
    ops: &[UserOperation],
    beneficiary: Address,
    gas_limit: U256,
) -> Result<H256> {
    let call_data = encode_handle_ops(ops, beneficiary)?;
    let tx = TransactionRequest::new()
        .to(entrypoint)
        .data(call_data)
        .gas(gas_limit);

    let pending = client
        .send_transaction(tx, None)
        .await
        .context("entryPoint.handleOps tx failed")?;
    Ok(pending.tx_hash())
}

/// Calldata for `handleOps(PackedUserOperation[] ops, address beneficiary)`.
/// Fails if any operation's gas fields cannot be packed.
pub fn encode_handle_ops(ops: &[UserOperation], beneficiary: Address) -> Result<Bytes> {
    let tokens = ops
        .iter()
        .map(|op| op.as_packed_token())
        .collect::<Result<Vec<_>>>()?;

    let selector = id(
        "handleOps((address,uint256,bytes,bytes,bytes32,uint256,bytes32,bytes,bytes)[],address)",
    );
    let args = encode(&[Token::Array(tokens), Token::Address(beneficiary)]);

    let mut data = selector.to_vec();
    data.extend_from_slice(&args);
    Ok(Bytes::from(data))
}
