use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use delegate_aa::authorization::{self, DelegationTx};
use delegate_aa::bundler::BundlerClient;
use delegate_aa::config::Config;
use delegate_aa::gas::{FixedGasEstimator, GasEstimator};
use delegate_aa::types::Call;
use delegate_aa::{account, encoding, submitter, userop};
use ethers::prelude::*;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Kernel v3.1 implementation the account delegates to by default.
const KERNEL_V3_1_IMPLEMENTATION: &str = "0x94F097E1ebEB4ecA3AAE54cabb08905B239A7D27";
/// Default root validator installed by `initialize`.
const MULTI_CHAIN_VALIDATOR: &str = "0x02d32f9c668C92A60b44825C4f79B501c0F685dA";
/// EntryPoint v0.7.0.
const ENTRY_POINT_0_7_0: &str = "0x0000000071727De22E5e9d8BAf0edAc6f37da032";

#[derive(Parser, Debug)]
#[command(name = "delegate-aa", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sign an EIP-7702 delegation and broadcast it via the sponsor.
    Authorize(AuthorizeArgs),

    /// Install the root validator and owner on the upgraded account.
    Initialize(InitializeArgs),

    /// Build, sign and submit a batched user operation.
    Send(SendArgs),
}

#[derive(Args, Debug)]
struct CommonArgs {
    /// Chain RPC URL.
    #[arg(long, env = "RPC_URL", default_value = "https://odyssey.ithaca.xyz")]
    rpc: String,

    /// Fail if the RPC reports a different chain id.
    #[arg(long)]
    chain_id: Option<u64>,

    /// Sponsor private key (pays gas for setup and direct submission).
    #[arg(long, env = "SPONSOR_PRIVATE_KEY", hide_env_values = true)]
    sponsor_private_key: Option<String>,

    /// Owner private key (the delegating account).
    #[arg(long, env = "OWNER_PRIVATE_KEY", hide_env_values = true)]
    owner_private_key: Option<String>,

    /// Bundler RPC URL (must support ERC-4337 JSON-RPC methods).
    #[arg(long, env = "BUNDLER_RPC")]
    bundler: Option<String>,
}

impl CommonArgs {
    fn to_config(&self) -> Config {
        Config {
            rpc_url: self.rpc.clone(),
            bundler_url: self.bundler.clone(),
            sponsor_key: self.sponsor_private_key.clone(),
            owner_key: self.owner_private_key.clone(),
            expected_chain_id: self.chain_id,
        }
    }
}

#[derive(Args, Debug)]
struct AuthorizeArgs {
    #[command(flatten)]
    common: CommonArgs,

    /// Implementation contract the account delegates to.
    #[arg(long, env = "IMPLEMENTATION_ADDRESS", default_value = KERNEL_V3_1_IMPLEMENTATION)]
    implementation: String,

    /// Delegation nonce. Defaults to the owner's current account nonce,
    /// which is what the chain checks at inclusion time.
    #[arg(long)]
    auth_nonce: Option<u64>,
}

#[derive(Args, Debug)]
struct InitializeArgs {
    #[command(flatten)]
    common: CommonArgs,

    /// Validator module installed as the root validator.
    #[arg(long, env = "VALIDATOR_ADDRESS", default_value = MULTI_CHAIN_VALIDATOR)]
    validator: String,
}

#[derive(Args, Debug)]
struct SendArgs {
    #[command(flatten)]
    common: CommonArgs,

    /// EntryPoint address.
    #[arg(long, env = "ENTRYPOINT_ADDRESS", default_value = ENTRY_POINT_0_7_0)]
    entrypoint: String,

    /// Call to execute, as `target:value:hexdata` (value in wei, data
    /// optional). Repeatable; order is execution order. An empty batch is
    /// a valid no-op.
    #[arg(long = "call", value_name = "TARGET:VALUE:DATA")]
    calls: Vec<String>,

    /// Submit directly via EntryPoint.handleOps instead of the bundler.
    #[arg(long)]
    direct: bool,

    /// Beneficiary for direct submission (defaults to the sponsor address).
    #[arg(long)]
    beneficiary: Option<String>,

    /// Do not wait for the operation receipt (bundler path).
    #[arg(long)]
    no_wait: bool,

    /// Max seconds to wait for the operation receipt. Use 0 to disable
    /// timeout.
    #[arg(long, default_value_t = 180)]
    max_wait_seconds: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        // Logs go to stderr so stdout stays script-friendly (one hash per run).
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let estimator = FixedGasEstimator;

    match cli.cmd {
        Command::Authorize(args) => cmd_authorize(args, &estimator).await,
        Command::Initialize(args) => cmd_initialize(args, &estimator).await,
        Command::Send(args) => cmd_send(args, &estimator).await,
    }
}

async fn connect(config: &Config) -> Result<(Provider<Http>, u64)> {
    let provider =
        Provider::<Http>::try_from(config.rpc_url.as_str())?.interval(Duration::from_millis(350));

    let chain_id = provider.get_chainid().await?.as_u64();
    if let Some(expected) = config.expected_chain_id {
        if chain_id != expected {
            return Err(anyhow!(
                "chainId mismatch: expected {}, RPC returned {}",
                expected,
                chain_id
            ));
        }
    }
    Ok((provider, chain_id))
}

async fn cmd_authorize(args: AuthorizeArgs, gas: &dyn GasEstimator) -> Result<()> {
    let config = args.common.to_config();
    let implementation =
        Address::from_str(&args.implementation).context("invalid --implementation address")?;

    // Key material is validated before any network activity.
    let owner = config.owner_wallet()?;
    let sponsor = config.sponsor_wallet()?;

    let (provider, chain_id) = connect(&config).await?;
    let owner = owner.with_chain_id(chain_id);
    let sponsor = sponsor.with_chain_id(chain_id);
    tracing::info!(owner = %owner.address(), sponsor = %sponsor.address(), chain_id, "authorizing delegation");

    // The delegation nonce must equal the owner's protocol nonce when the
    // transaction lands, so fetch it fresh unless explicitly overridden.
    let auth_nonce = match args.auth_nonce {
        Some(n) => n,
        None => provider
            .get_transaction_count(owner.address(), None)
            .await
            .context("failed to fetch owner account nonce")?
            .as_u64(),
    };

    let auth = authorization::sign_authorization(chain_id, implementation, auth_nonce, &owner)?;
    tracing::info!(implementation = %implementation, nonce = auth_nonce, "signed authorization");

    let sponsor_nonce = provider
        .get_transaction_count(sponsor.address(), None)
        .await
        .context("failed to fetch sponsor account nonce")?;

    let g = gas.gas_values();
    let tx = DelegationTx {
        chain_id,
        nonce: sponsor_nonce,
        max_priority_fee_per_gas: g.max_priority_fee_per_gas,
        max_fee_per_gas: g.max_fee_per_gas,
        gas_limit: g.tx_gas_limit,
        to: owner.address(),
        value: U256::zero(),
        data: Vec::new(),
        authorization: auth,
    };
    let raw = tx.sign(&sponsor)?;
    let tx_hash = authorization::send_delegation_tx(&provider, raw).await?;

    println!("{}", encoding::fmt_h256(tx_hash));
    Ok(())
}

async fn cmd_initialize(args: InitializeArgs, gas: &dyn GasEstimator) -> Result<()> {
    let config = args.common.to_config();
    let validator = Address::from_str(&args.validator).context("invalid --validator address")?;

    let owner = config.owner_wallet()?;
    let sponsor = config.sponsor_wallet()?;

    let (provider, chain_id) = connect(&config).await?;
    let sponsor = sponsor.with_chain_id(chain_id);
    let account_addr = owner.address();
    tracing::info!(account = %account_addr, validator = %validator, "initializing account");

    let client = Arc::new(SignerMiddleware::new(provider, sponsor));
    let tx_hash = account::initialize_account(
        client,
        account_addr,
        validator,
        account_addr,
        gas.gas_values().tx_gas_limit,
    )
    .await?;

    println!("{}", encoding::fmt_h256(tx_hash));
    Ok(())
}

async fn cmd_send(args: SendArgs, gas: &dyn GasEstimator) -> Result<()> {
    let config = args.common.to_config();
    let entrypoint = Address::from_str(&args.entrypoint).context("invalid --entrypoint address")?;
    let beneficiary = args
        .beneficiary
        .as_deref()
        .map(Address::from_str)
        .transpose()
        .context("invalid --beneficiary address")?;
    let calls = args
        .calls
        .iter()
        .map(|s| parse_call(s))
        .collect::<Result<Vec<_>>>()?;

    // Fail on missing configuration before touching the network.
    let owner = config.owner_wallet()?;
    if args.direct {
        config.sponsor_wallet()?;
    } else {
        config.bundler_url()?;
    }

    let (provider, chain_id) = connect(&config).await?;
    let owner = owner.with_chain_id(chain_id);

    let nonce = submitter::fetch_entrypoint_nonce(
        Arc::new(provider.clone()),
        entrypoint,
        owner.address(),
    )
    .await?;
    tracing::info!(sender = %owner.address(), nonce = %nonce, calls = calls.len(), "building operation");

    let mut op = submitter::build_user_operation(owner.address(), nonce, &calls, &gas.gas_values());
    let op_hash = userop::sign_user_operation(&mut op, chain_id, entrypoint, &owner)?;
    tracing::info!(hash = %encoding::fmt_h256(op_hash), "signed operation");

    if args.direct {
        let sponsor = config.sponsor_wallet()?.with_chain_id(chain_id);
        let beneficiary = beneficiary.unwrap_or_else(|| sponsor.address());
        let client = Arc::new(SignerMiddleware::new(provider, sponsor));
        let tx_hash = submitter::submit_direct(
            client,
            entrypoint,
            std::slice::from_ref(&op),
            beneficiary,
            gas.gas_values().tx_gas_limit,
        )
        .await?;
        println!("{}", encoding::fmt_h256(tx_hash));
    } else {
        let bundler = BundlerClient::new(config.bundler_url()?.to_string());
        let tracking_hash = submitter::submit_via_bundler(&bundler, entrypoint, &op).await?;
        println!("{}", encoding::fmt_h256(tracking_hash));

        if !args.no_wait {
            let receipt = bundler
                .wait_user_operation_receipt(
                    tracking_hash,
                    Duration::from_secs(args.max_wait_seconds),
                )
                .await
                .context("failed waiting for operation receipt")?;
            tracing::info!("operation receipt:\n{}", serde_json::to_string_pretty(&receipt)?);
        }
    }

    Ok(())
}

/// Parses `target:value:hexdata` into a [`Call`]. Value and data may be
/// omitted (`target`, `target:value`).
fn parse_call(s: &str) -> Result<Call> {
    let mut parts = s.splitn(3, ':');
    let target = parts.next().unwrap_or_default();
    let value = parts.next();
    let data = parts.next();

    let target =
        Address::from_str(target).with_context(|| format!("invalid call target in '{s}'"))?;
    let value = match value {
        Some(v) if !v.is_empty() => U256::from_dec_str(v)
            .with_context(|| format!("invalid call value in '{s}' (expected decimal wei)"))?,
        _ => U256::zero(),
    };
    let data = match data {
        Some(d) if !d.is_empty() => {
            let d = d.strip_prefix("0x").unwrap_or(d);
            Bytes::from(hex::decode(d).with_context(|| format!("invalid call data in '{s}'"))?)
        }
        _ => Bytes::new(),
    };

    Ok(Call {
        target,
        value,
        data,
    })
}
