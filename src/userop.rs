use anyhow::{Context, Result};
use ethers::abi::{encode, Token};
use ethers::signers::LocalWallet;
use ethers::types::{Address, Bytes, H256, U256};
use ethers::utils::keccak256;

use crate::types::UserOperation;

/// Computes the EntryPoint v0.7 user-operation hash.
///
/// The signature field is deliberately excluded: it authenticates this hash,
/// not the other way round. Packing the gas fields can fail (values wider
/// than 128 bits), so this returns an explicit `Result` and callers must
/// abort before submission instead of sending an operation with an
/// undefined hash.
///
/// Layout, bit-exact per the entry point contract:
/// 1. keccak `initCode`, `callData` and `paymasterAndData` independently,
/// 2. ABI-encode `(sender, nonce, hash(initCode), hash(callData),
///    accountGasLimits, preVerificationGas, gasFees,
///    hash(paymasterAndData))` and keccak the result,
/// 3. ABI-encode `(innerHash, entryPoint, chainId)` and keccak again.
pub fn operation_hash(chain_id: u64, entry_point: Address, op: &UserOperation) -> Result<H256> {
    let hashed_init_code = keccak256(&op.init_code);
    let hashed_call_data = keccak256(&op.call_data);
    let hashed_paymaster_and_data = keccak256(&op.paymaster_and_data);

    let account_gas_limits = op
        .account_gas_limits()
        .context("cannot pack accountGasLimits")?;
    let gas_fees = op.gas_fees().context("cannot pack gasFees")?;

    let packed = encode(&[
        Token::Address(op.sender),
        Token::Uint(op.nonce),
        Token::FixedBytes(hashed_init_code.to_vec()),
        Token::FixedBytes(hashed_call_data.to_vec()),
        Token::FixedBytes(account_gas_limits.to_vec()),
        Token::Uint(op.pre_verification_gas),
        Token::FixedBytes(gas_fees.to_vec()),
        Token::FixedBytes(hashed_paymaster_and_data.to_vec()),
    ]);
    let hashed = keccak256(packed);

    let encoded = encode(&[
        Token::FixedBytes(hashed.to_vec()),
        Token::Address(entry_point),
        Token::Uint(U256::from(chain_id)),
    ]);
    Ok(H256(keccak256(encoded)))
}

/// Hashes the operation, signs the digest with the owner key (raw secp256k1
/// over the 32 bytes, no message prefix) and attaches the 65-byte
/// `r || s || v` signature. Returns the hash that was signed.
pub fn sign_user_operation(
    op: &mut UserOperation,
    chain_id: u64,
    entry_point: Address,
    owner: &LocalWallet,
) -> Result<H256> {
    let hash = operation_hash(chain_id, entry_point, op)?;
    let sig = owner
        .sign_hash(hash)
        .context("failed to sign operation hash")?;
    op.signature = Bytes::from(sig.to_vec());
    Ok(hash)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::signers::Signer;
    use ethers::types::{RecoveryMessage, Signature};

    fn addr(last: u8) -> Address {
        let mut a = [0u8; 20];
        a[19] = last;
        Address::from(a)
    }

    fn reference_op() -> UserOperation {
        UserOperation {
            sender: addr(0x01),
            nonce: U256::zero(),
            init_code: Bytes::new(),
            call_data: Bytes::from(vec![0x00]),
            verification_gas_limit: U256::zero(),
            call_gas_limit: U256::zero(),
            pre_verification_gas: U256::zero(),
            max_priority_fee_per_gas: U256::zero(),
            max_fee_per_gas: U256::zero(),
            paymaster_and_data: Bytes::new(),
            signature: Bytes::new(),
        }
    }

    #[test]
    fn known_vector() {
        let hash = operation_hash(1, Address::zero(), &reference_op()).unwrap();
        assert_eq!(
            hex::encode(hash.as_bytes()),
            "6d4d6c6e6271413ff702003d568a28f1b351dcd74f0e28f0dd82ca46cef61d51"
        );
    }

    #[test]
    fn hash_is_deterministic() {
        let op = reference_op();
        let a = operation_hash(1, Address::zero(), &op).unwrap();
        let b = operation_hash(1, Address::zero(), &op).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn every_field_except_signature_is_hashed() {
        let base = operation_hash(1, Address::zero(), &reference_op()).unwrap();

        let mutations: Vec<Box<dyn Fn(&mut UserOperation)>> = vec![
            Box::new(|op| op.sender = addr(0x02)),
            Box::new(|op| op.nonce = U256::one()),
            Box::new(|op| op.init_code = Bytes::from(vec![0x01])),
            Box::new(|op| op.call_data = Bytes::from(vec![0x01])),
            Box::new(|op| op.verification_gas_limit = U256::one()),
            Box::new(|op| op.call_gas_limit = U256::one()),
            Box::new(|op| op.pre_verification_gas = U256::one()),
            Box::new(|op| op.max_priority_fee_per_gas = U256::one()),
            Box::new(|op| op.max_fee_per_gas = U256::one()),
            Box::new(|op| op.paymaster_and_data = Bytes::from(vec![0x01])),
        ];
        for mutate in &mutations {
            let mut op = reference_op();
            mutate(&mut op);
            let hash = operation_hash(1, Address::zero(), &op).unwrap();
            assert_ne!(hash, base, "mutated field did not change the hash");
        }

        // The signature authenticates the hash; it must not feed into it.
        let mut op = reference_op();
        op.signature = Bytes::from(vec![0xff; 65]);
        assert_eq!(operation_hash(1, Address::zero(), &op).unwrap(), base);
    }

    #[test]
    fn chain_and_entry_point_scope_the_hash() {
        let op = reference_op();
        let base = operation_hash(1, Address::zero(), &op).unwrap();
        assert_ne!(operation_hash(2, Address::zero(), &op).unwrap(), base);
        assert_ne!(operation_hash(1, addr(0x01), &op).unwrap(), base);
    }

    #[test]
    fn oversized_gas_value_fails_instead_of_truncating() {
        let mut op = reference_op();
        op.call_gas_limit = U256::from(u128::MAX) + U256::one();
        assert!(operation_hash(1, Address::zero(), &op).is_err());
    }

    #[test]
    fn signature_recovers_to_owner() {
        let owner: LocalWallet =
            "0x0000000000000000000000000000000000000000000000000000000000000001"
                .parse()
                .unwrap();
        let mut op = reference_op();
        let hash = sign_user_operation(&mut op, 1, Address::zero(), &owner).unwrap();

        assert_eq!(op.signature.len(), 65);
        let sig = Signature {
            r: U256::from_big_endian(&op.signature[..32]),
            s: U256::from_big_endian(&op.signature[32..64]),
            v: op.signature[64] as u64,
        };
        let recovered = sig.recover(RecoveryMessage::Hash(hash)).unwrap();
        assert_eq!(recovered, owner.address());
    }
}
