use anyhow::{anyhow, Context, Result};
use ethers::signers::{LocalWallet, Signer};
use std::str::FromStr;

/// Process configuration, resolved once at startup from flags and
/// environment.
///
/// Secrets stay as raw strings until a command actually needs the wallet;
/// a missing key only fails the commands that use it, but always before any
/// network call is made.
#[derive(Clone, Debug)]
pub struct Config {
    pub rpc_url: String,
    pub bundler_url: Option<String>,
    pub sponsor_key: Option<String>,
    pub owner_key: Option<String>,
    /// Optional sanity check against the chain id reported by the RPC.
    pub expected_chain_id: Option<u64>,
}

impl Config {
    /// Wallet of the delegating account (signs authorizations and
    /// operations). Attach the chain id with `with_chain_id` once known;
    /// calling this first keeps key validation ahead of any network I/O.
    pub fn owner_wallet(&self) -> Result<LocalWallet> {
        wallet_from_key(self.owner_key.as_deref(), "OWNER_PRIVATE_KEY")
    }

    /// Wallet paying gas for setup transactions and direct submission.
    pub fn sponsor_wallet(&self) -> Result<LocalWallet> {
        wallet_from_key(self.sponsor_key.as_deref(), "SPONSOR_PRIVATE_KEY")
    }

    pub fn bundler_url(&self) -> Result<&str> {
        self.bundler_url
            .as_deref()
            .ok_or_else(|| anyhow!("BUNDLER_RPC is required (or pass --bundler)"))
    }
}

fn wallet_from_key(key: Option<&str>, env_name: &str) -> Result<LocalWallet> {
    let key = key.ok_or_else(|| anyhow!("{env_name} is required"))?;
    LocalWallet::from_str(key).with_context(|| format!("invalid {env_name}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with(owner_key: Option<&str>) -> Config {
        Config {
            rpc_url: "http://localhost:8545".into(),
            bundler_url: None,
            sponsor_key: None,
            owner_key: owner_key.map(str::to_string),
            expected_chain_id: None,
        }
    }

    #[test]
    fn missing_owner_key_fails_with_env_name() {
        let err = config_with(None).owner_wallet().unwrap_err();
        assert!(err.to_string().contains("OWNER_PRIVATE_KEY"));
    }

    #[test]
    fn invalid_owner_key_fails() {
        assert!(config_with(Some("0xnothex")).owner_wallet().is_err());
    }

    #[test]
    fn valid_owner_key_parses() {
        let wallet = config_with(Some(
            "0x0000000000000000000000000000000000000000000000000000000000000001",
        ))
        .owner_wallet()
        .unwrap();
        assert_eq!(wallet.chain_id(), 1);
    }

    #[test]
    fn missing_bundler_url_fails() {
        assert!(config_with(None).bundler_url().is_err());
    }
}
