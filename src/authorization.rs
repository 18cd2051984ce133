use anyhow::{Context, Result};
use ethers::providers::{Http, Middleware, Provider};
use ethers::signers::LocalWallet;
use ethers::types::{Address, Bytes, H256, U256};
use ethers::utils::keccak256;
use rlp::RlpStream;

/// EIP-7702 authorization magic prefix.
const MAGIC: u8 = 0x05;
/// EIP-7702 set-code transaction type.
const TX_TYPE_7702: u8 = 0x04;

/// A signed EIP-7702 delegation tuple, ready for a transaction's
/// authorization list.
///
/// `nonce` must equal the delegating account's current protocol nonce when
/// the transaction lands, otherwise the chain drops the authorization at
/// inclusion time.
#[derive(Clone, Debug)]
pub struct SignedAuthorization {
    pub chain_id: u64,
    pub address: Address,
    pub nonce: u64,
    pub y_parity: u8,
    pub r: U256,
    pub s: U256,
}

/// Digest signed by the delegating account:
/// `keccak256(0x05 || rlp([chainId, address, nonce]))`.
pub fn authorization_digest(chain_id: u64, address: Address, nonce: u64) -> H256 {
    let mut payload = RlpStream::new_list(3);
    payload.append(&U256::from(chain_id));
    payload.append(&address);
    payload.append(&U256::from(nonce));

    let mut preimage = vec![MAGIC];
    preimage.extend_from_slice(&payload.out());
    H256(keccak256(preimage))
}

/// Signs the delegation triple `(chainId, address, nonce)` with the
/// delegating account's own key.
pub fn sign_authorization(
    chain_id: u64,
    address: Address,
    nonce: u64,
    owner: &LocalWallet,
) -> Result<SignedAuthorization> {
    let digest = authorization_digest(chain_id, address, nonce);
    let sig = owner
        .sign_hash(digest)
        .context("failed to sign authorization digest")?;
    Ok(SignedAuthorization {
        chain_id,
        address,
        nonce,
        y_parity: (sig.v - 27) as u8,
        r: sig.r,
        s: sig.s,
    })
}

/// A type-0x04 transaction carrying one authorization, sent by the sponsor
/// to the delegating account itself with empty calldata.
///
/// ethers 2 has no native EIP-7702 support, so the transaction is
/// RLP-assembled and signed by hand and broadcast as raw bytes.
#[derive(Clone, Debug)]
pub struct DelegationTx {
    pub chain_id: u64,
    pub nonce: U256,
    pub max_priority_fee_per_gas: U256,
    pub max_fee_per_gas: U256,
    pub gas_limit: U256,
    pub to: Address,
    pub value: U256,
    pub data: Vec<u8>,
    pub authorization: SignedAuthorization,
}

impl DelegationTx {
    /// Appends the 10 payload fields shared by the signing preimage and the
    /// signed encoding.
    fn append_payload(&self, s: &mut RlpStream) {
        s.append(&U256::from(self.chain_id));
        s.append(&self.nonce);
        s.append(&self.max_priority_fee_per_gas);
        s.append(&self.max_fee_per_gas);
        s.append(&self.gas_limit);
        s.append(&self.to);
        s.append(&self.value);
        s.append(&self.data);
        // access list (empty)
        s.begin_list(0);
        // authorization list, one entry
        s.begin_list(1);
        let a = &self.authorization;
        s.begin_list(6);
        s.append(&U256::from(a.chain_id));
        s.append(&a.address);
        s.append(&U256::from(a.nonce));
        s.append(&U256::from(a.y_parity));
        s.append(&a.r);
        s.append(&a.s);
    }

    /// Transaction signing hash: `keccak256(0x04 || rlp(payload))`.
    pub fn sighash(&self) -> H256 {
        let mut payload = RlpStream::new_list(10);
        self.append_payload(&mut payload);

        let mut preimage = vec![TX_TYPE_7702];
        preimage.extend_from_slice(&payload.out());
        H256(keccak256(preimage))
    }

    /// Signs with the sponsor key and returns the raw transaction bytes for
    /// `eth_sendRawTransaction`.
    pub fn sign(&self, sponsor: &LocalWallet) -> Result<Bytes> {
        let sig = sponsor
            .sign_hash(self.sighash())
            .context("failed to sign delegation transaction")?;

        let mut signed = RlpStream::new_list(13);
        self.append_payload(&mut signed);
        signed.append(&U256::from(sig.v - 27));
        signed.append(&sig.r);
        signed.append(&sig.s);

        let mut out = vec![TX_TYPE_7702];
        out.extend_from_slice(&signed.out());
        Ok(Bytes::from(out))
    }
}

/// Broadcasts a signed delegation transaction and returns its hash. The
/// caller (or an explorer) confirms inclusion; no receipt wait here.
pub async fn send_delegation_tx(provider: &Provider<Http>, raw: Bytes) -> Result<H256> {
    let pending = provider
        .send_raw_transaction(raw)
        .await
        .context("eth_sendRawTransaction failed")?;
    Ok(pending.tx_hash())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::signers::Signer;
    use ethers::types::{RecoveryMessage, Signature};
    use std::str::FromStr;

    #[test]
    fn digest_known_vector_kernel_v3_1() {
        // Matches viem's signAuthorization preimage for the Kernel v3.1
        // implementation on chain 911867 at nonce 0.
        let implementation =
            Address::from_str("0x94F097E1ebEB4ecA3AAE54cabb08905B239A7D27").unwrap();
        let digest = authorization_digest(911_867, implementation, 0);
        assert_eq!(
            hex::encode(digest.as_bytes()),
            "05026342919deda2c3e9e73903d0156c207552cec41547526105c270acfde0b1"
        );
    }

    #[test]
    fn digest_known_vector_minimal() {
        let mut a = [0u8; 20];
        a[19] = 0x01;
        let digest = authorization_digest(1, Address::from(a), 0);
        assert_eq!(
            hex::encode(digest.as_bytes()),
            "2216aea7e61e80bba961c4027590211dc389f03bb7c8af05b1b77b767f7564dd"
        );
    }

    #[test]
    fn authorization_signature_recovers_to_owner() {
        let owner: LocalWallet =
            "0x0000000000000000000000000000000000000000000000000000000000000002"
                .parse()
                .unwrap();
        let implementation = Address::repeat_byte(0x42);
        let auth = sign_authorization(911_867, implementation, 3, &owner).unwrap();

        assert!(auth.y_parity <= 1);
        let sig = Signature {
            r: auth.r,
            s: auth.s,
            v: auth.y_parity as u64 + 27,
        };
        let digest = authorization_digest(911_867, implementation, 3);
        assert_eq!(
            sig.recover(RecoveryMessage::Hash(digest)).unwrap(),
            owner.address()
        );
    }

    #[test]
    fn signed_tx_is_a_13_item_type_4_envelope() {
        let owner: LocalWallet =
            "0x0000000000000000000000000000000000000000000000000000000000000002"
                .parse()
                .unwrap();
        let sponsor: LocalWallet =
            "0x0000000000000000000000000000000000000000000000000000000000000003"
                .parse()
                .unwrap();
        let auth = sign_authorization(1, Address::repeat_byte(0x42), 0, &owner).unwrap();
        let tx = DelegationTx {
            chain_id: 1,
            nonce: U256::zero(),
            max_priority_fee_per_gas: U256::from(1_500_000_000u64),
            max_fee_per_gas: U256::from(2_000_000_000u64),
            gas_limit: U256::from(500_000u64),
            to: owner.address(),
            value: U256::zero(),
            data: Vec::new(),
            authorization: auth,
        };
        let raw = tx.sign(&sponsor).unwrap();

        assert_eq!(raw[0], 0x04);
        let rlp = rlp::Rlp::new(&raw[1..]);
        assert!(rlp.is_list());
        assert_eq!(rlp.item_count().unwrap(), 13);
        // authorization list: one entry of six fields
        let auth_list = rlp.at(9).unwrap();
        assert_eq!(auth_list.item_count().unwrap(), 1);
        assert_eq!(auth_list.at(0).unwrap().item_count().unwrap(), 6);
    }
}
