use crate::types::{Call, UserOperation};
use anyhow::{bail, Result};
use ethers::abi::{encode, Token};
use ethers::types::{Address, Bytes, H256, U256};
use ethers::utils::id;
use serde_json::Value;

/// ERC-7579 execution mode for "batch call, default handling".
pub const EXEC_MODE_BATCH_DEFAULT: [u8; 32] = {
    let mut mode = [0u8; 32];
    mode[0] = 0x01;
    mode
};

pub fn fmt_address(addr: Address) -> String {
    format!("0x{}", hex::encode(addr.as_bytes()))
}

pub fn fmt_h256(h: H256) -> String {
    format!("0x{}", hex::encode(h.as_bytes()))
}

/// JSON-RPC "quantity" encoding.
pub fn fmt_u256(v: U256) -> String {
    if v.is_zero() {
        "0x0".to_string()
    } else {
        format!("0x{:x}", v)
    }
}

pub fn fmt_bytes(b: &Bytes) -> String {
    format!("0x{}", hex::encode(b.as_ref()))
}

pub fn parse_u256_quantity(s: &str) -> Result<U256> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    if s.is_empty() {
        return Ok(U256::zero());
    }
    Ok(U256::from_str_radix(s, 16)?)
}

pub fn parse_h256(s: &str) -> Result<H256> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    let bytes = hex::decode(s)?;
    if bytes.len() != 32 {
        bail!("expected 32-byte hex, got {} bytes", bytes.len());
    }
    let mut arr = [0u8; 32];
    arr.copy_from_slice(&bytes);
    Ok(H256(arr))
}

/// ABI-encodes an execution batch as a `(address,uint256,bytes)[]` tuple
/// array, the layout Kernel expects as `executionCalldata` in batch mode.
///
/// An empty batch is valid and encodes to a zero-length array, which the
/// account executes as a no-op.
pub fn encode_execution_batch(calls: &[Call]) -> Bytes {
    let tuples = calls
        .iter()
        .map(|c| {
            Token::Tuple(vec![
                Token::Address(c.target),
                Token::Uint(c.value),
                Token::Bytes(c.data.to_vec()),
            ])
        })
        .collect();
    Bytes::from(encode(&[Token::Array(tuples)]))
}

/// Calldata for the account's `execute(bytes32 mode, bytes executionCalldata)`
/// entry point.
pub fn encode_execute_call(mode: [u8; 32], execution_calldata: &Bytes) -> Bytes {
    let selector = id("execute(bytes32,bytes)");
    let args = encode(&[
        Token::FixedBytes(mode.to_vec()),
        Token::Bytes(execution_calldata.to_vec()),
    ]);
    let mut data = selector.to_vec();
    data.extend_from_slice(&args);
    Bytes::from(data)
}

/// EntryPoint v0.7 wire representation for `eth_sendUserOperation`.
///
/// Gas fields go over the wire unpacked; `factory`/`factoryData` and the
/// paymaster fields are split out of the packed byte sequences and omitted
/// entirely when empty.
pub fn user_op_to_json(op: &UserOperation) -> Result<Value> {
    let mut obj = serde_json::Map::new();
    obj.insert("sender".into(), Value::String(fmt_address(op.sender)));
    obj.insert("nonce".into(), Value::String(fmt_u256(op.nonce)));
    obj.insert("callData".into(), Value::String(fmt_bytes(&op.call_data)));
    obj.insert(
        "callGasLimit".into(),
        Value::String(fmt_u256(op.call_gas_limit)),
    );
    obj.insert(
        "verificationGasLimit".into(),
        Value::String(fmt_u256(op.verification_gas_limit)),
    );
    obj.insert(
        "preVerificationGas".into(),
        Value::String(fmt_u256(op.pre_verification_gas)),
    );
    obj.insert(
        "maxPriorityFeePerGas".into(),
        Value::String(fmt_u256(op.max_priority_fee_per_gas)),
    );
    obj.insert(
        "maxFeePerGas".into(),
        Value::String(fmt_u256(op.max_fee_per_gas)),
    );
    obj.insert("signature".into(), Value::String(fmt_bytes(&op.signature)));

    if !op.init_code.is_empty() {
        if op.init_code.len() < 20 {
            bail!(
                "initCode shorter than a factory address: {} bytes",
                op.init_code.len()
            );
        }
        let factory = Address::from_slice(&op.init_code[..20]);
        obj.insert("factory".into(), Value::String(fmt_address(factory)));
        obj.insert(
            "factoryData".into(),
            Value::String(format!("0x{}", hex::encode(&op.init_code[20..]))),
        );
    }

    if !op.paymaster_and_data.is_empty() {
        let pmd = op.paymaster_and_data.as_ref();
        if pmd.len() < 52 {
            bail!("paymasterAndData shorter than its 52-byte header: {} bytes", pmd.len());
        }
        let paymaster = Address::from_slice(&pmd[..20]);
        obj.insert("paymaster".into(), Value::String(fmt_address(paymaster)));
        obj.insert(
            "paymasterVerificationGasLimit".into(),
            Value::String(fmt_u256(U256::from_big_endian(&pmd[20..36]))),
        );
        obj.insert(
            "paymasterPostOpGasLimit".into(),
            Value::String(fmt_u256(U256::from_big_endian(&pmd[36..52]))),
        );
        obj.insert(
            "paymasterData".into(),
            Value::String(format!("0x{}", hex::encode(&pmd[52..]))),
        );
    }

    Ok(Value::Object(obj))
}
