use alloy::primitives::Address;
use bio_runner::{
    client,
    deployment::{
        self,
        DeploymentEnv,
        DeploymentStore,
    },
    init_tracing,
    runner::RunnerId,
    runner_api::DEFAULT_SIGNER_URL,
    wallets,
};
use clap::{
    Args,
    Parser,
    Subcommand,
};
use color_eyre::eyre::Result;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "bio-runner",
    about = "Look up runners and edit their on-chain narratives",
    version,
    args_conflicts_with_subcommands = true
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    run: RunArgs,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the terminal client (the default)
    Run(RunArgs),
    /// Inspect or record narrative contract deployments
    Deployments {
        #[command(subcommand)]
        action: DeploymentsAction,
    },
}

#[derive(Args, Debug, Clone)]
struct RunArgs {
    /// Use the local network records instead of Polygon
    #[arg(long)]
    local: bool,

    /// Override RPC URL
    #[arg(long)]
    rpc_url: Option<String>,

    /// Override the narrative contract address
    #[arg(long)]
    narrative_contract: Option<Address>,

    /// Runner lookup service base URL
    #[arg(long, default_value = DEFAULT_SIGNER_URL)]
    lookup_url: String,

    /// Authorization signer base URL
    #[arg(long, default_value = DEFAULT_SIGNER_URL)]
    signer_url: String,

    /// Keystore name to sign with; omit to browse read-only
    #[arg(long)]
    wallet: Option<String>,

    /// Override keystore directory (defaults to ~/.foundry/keystores)
    #[arg(long)]
    keystore_dir: Option<String>,

    /// Runner to look up on start
    #[arg(long)]
    runner: Option<u64>,

    /// Directory for the rolling log file
    #[arg(long, default_value = ".logs")]
    log_dir: PathBuf,
}

#[derive(Subcommand, Debug)]
enum DeploymentsAction {
    /// Print the stored records
    List {
        #[arg(long)]
        local: bool,
    },
    /// Append a record
    Add {
        #[arg(long)]
        contract: Address,
        #[arg(long)]
        rpc_url: Option<String>,
        #[arg(long)]
        explorer_url: Option<String>,
        #[arg(long)]
        local: bool,
    },
}

fn env_for(local: bool) -> DeploymentEnv {
    if local {
        DeploymentEnv::Local
    } else {
        DeploymentEnv::Polygon
    }
}

fn app_config(args: &RunArgs) -> Result<client::AppConfig> {
    let env = env_for(args.local);
    let stored = DeploymentStore::new(env)?.latest()?;
    let deployment = deployment::resolve(
        env,
        stored,
        args.narrative_contract,
        args.rpc_url.clone(),
    )?;

    let wallet = match &args.wallet {
        Some(name) => {
            let dir = wallets::resolve_keystore_dir(args.keystore_dir.as_deref())?;
            Some(wallets::find_wallet(&dir, name)?)
        }
        None => None,
    };

    Ok(client::AppConfig {
        deployment,
        lookup_url: args.lookup_url.clone(),
        signer_url: args.signer_url.clone(),
        wallet,
        initial_runner: args.runner.map(RunnerId),
    })
}

fn run_deployments(action: DeploymentsAction) -> Result<()> {
    match action {
        DeploymentsAction::List { local } => {
            let env = env_for(local);
            let store = DeploymentStore::new(env)?;
            let records = store.load()?;
            if records.is_empty() {
                println!("No deployments recorded for {env} ({})", store.path().display());
                if let Some(builtin) = env.builtin() {
                    println!("Built-in: {builtin}");
                }
            }
            for record in records {
                println!("{record}");
            }
        }
        DeploymentsAction::Add {
            contract,
            rpc_url,
            explorer_url,
            local,
        } => {
            let env = env_for(local);
            let store = DeploymentStore::new(env)?;
            let record = store.record(contract, rpc_url, explorer_url)?;
            println!("Recorded {record}");
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    let args = match cli.command {
        Some(Command::Deployments { action }) => return run_deployments(action),
        Some(Command::Run(args)) => args,
        None => cli.run,
    };

    let _guard = init_tracing(&args.log_dir)?;
    tracing::info!("starting bio-runner");
    let config = app_config(&args)?;
    client::run_app(config).await
}
