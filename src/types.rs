use anyhow::{bail, Result};
use ethers::abi::Token;
use ethers::types::{Address, Bytes, U256};

/// One call executed by the delegated account as part of a batch.
///
/// Order matters: the account executes calls in the order they appear.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Call {
    pub target: Address,
    pub value: U256,
    pub data: Bytes,
}

/// ERC-4337 UserOperation (EntryPoint v0.7 layout), offchain form.
///
/// Gas fields are kept unpacked here; [`UserOperation::account_gas_limits`]
/// and [`UserOperation::gas_fees`] produce the packed 32-byte onchain fields
/// and fail on values wider than 128 bits rather than truncating.
///
/// `init_code` stays empty for EIP-7702 accounts: the sender is an EOA that
/// already carries the implementation via its delegation, so there is no
/// factory deployment.
#[derive(Clone, Debug)]
pub struct UserOperation {
    pub sender: Address,
    pub nonce: U256,
    pub init_code: Bytes,
    pub call_data: Bytes,
    pub verification_gas_limit: U256,
    pub call_gas_limit: U256,
    pub pre_verification_gas: U256,
    pub max_priority_fee_per_gas: U256,
    pub max_fee_per_gas: U256,
    pub paymaster_and_data: Bytes,
    pub signature: Bytes,
}

impl UserOperation {
    /// Packed `accountGasLimits`: verificationGasLimit then callGasLimit,
    /// each a big-endian 16-byte half.
    pub fn account_gas_limits(&self) -> Result<[u8; 32]> {
        pack_gas_pair(self.verification_gas_limit, self.call_gas_limit)
    }

    /// Packed `gasFees`: maxPriorityFeePerGas then maxFeePerGas.
    pub fn gas_fees(&self) -> Result<[u8; 32]> {
        pack_gas_pair(self.max_priority_fee_per_gas, self.max_fee_per_gas)
    }

    /// ABI token matching the Solidity `PackedUserOperation` struct, for
    /// calling `EntryPoint.handleOps` directly.
    pub fn as_packed_token(&self) -> Result<Token> {
        Ok(Token::Tuple(vec![
            Token::Address(self.sender),
            Token::Uint(self.nonce),
            Token::Bytes(self.init_code.to_vec()),
            Token::Bytes(self.call_data.to_vec()),
            Token::FixedBytes(self.account_gas_limits()?.to_vec()),
            Token::Uint(self.pre_verification_gas),
            Token::FixedBytes(self.gas_fees()?.to_vec()),
            Token::Bytes(self.paymaster_and_data.to_vec()),
            Token::Bytes(self.signature.to_vec()),
        ]))
    }
}

/// Packs two 128-bit values into one 32-byte field, high half first,
/// both big-endian.
pub fn pack_gas_pair(hi: U256, lo: U256) -> Result<[u8; 32]> {
    let max = U256::from(u128::MAX);
    if hi > max || lo > max {
        bail!("gas value exceeds 128 bits (hi={hi}, lo={lo})");
    }
    let mut out = [0u8; 32];
    out[..16].copy_from_slice(&hi.low_u128().to_be_bytes());
    out[16..].copy_from_slice(&lo.low_u128().to_be_bytes());
    Ok(out)
}

/// Inverse of [`pack_gas_pair`].
pub fn unpack_gas_pair(packed: &[u8; 32]) -> (U256, U256) {
    (
        U256::from_big_endian(&packed[..16]),
        U256::from_big_endian(&packed[16..]),
    )
}
