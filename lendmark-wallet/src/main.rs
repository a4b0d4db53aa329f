//! Lendmark Wallet CLI
//!
//! Passkey-gated, non-custodial wallet for the Lendmark marketplace.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

#[derive(Parser)]
#[command(name = "lendmark-wallet")]
#[command(about = "Lendmark wallet - passkey-protected keys for the lending marketplace")]
#[command(version)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Custom config file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Marketplace user id to act as
    #[arg(short, long, global = true, env = "LENDMARK_USER")]
    user: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Unlock the wallet, creating it on first use
    Connect,

    /// Show what is known about the wallet without unlocking it
    Status,

    /// Check wallet balance
    Balance,

    /// Send LMK to an address
    Send {
        /// Recipient address
        address: String,

        /// Amount in LMK, up to 6 decimals
        amount: String,

        /// Destination tag
        #[arg(long)]
        tag: Option<u32>,

        /// Skip confirmation prompt
        #[arg(long)]
        yes: bool,
    },

    /// Sign an off-ledger message
    Sign {
        /// Message text
        message: String,
    },

    /// Request test funds from the faucet
    Fund,

    /// Create a multi-purpose token issuance
    IssueToken {
        /// Decimal places of the token
        #[arg(long, default_value = "0")]
        scale: u8,

        /// Maximum supply
        #[arg(long)]
        max: Option<u64>,

        /// Transfer fee in tenths of a basis point
        #[arg(long, default_value = "0")]
        transfer_fee: u32,

        /// Hex-encoded metadata
        #[arg(long, default_value = "")]
        metadata: String,

        /// Issuance flags
        #[arg(long, default_value = "0")]
        flags: u32,
    },

    /// Set or clear the account domain
    SetDomain {
        /// Domain, omitted to clear
        domain: Option<String>,
    },

    /// Replace a divergent backend record with the local wallet
    Reconcile {
        /// Skip confirmation prompt
        #[arg(long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let ctx = commands::Context::load(cli.config.as_deref(), cli.user)?;

    match cli.command {
        Commands::Connect => commands::connect::run(&ctx).await,
        Commands::Status => commands::status::run(&ctx).await,
        Commands::Balance => commands::balance::run(&ctx).await,
        Commands::Send {
            address,
            amount,
            tag,
            yes,
        } => commands::send::run(&ctx, &address, &amount, tag, yes).await,
        Commands::Sign { message } => commands::sign::run(&ctx, &message).await,
        Commands::Fund => commands::fund::run(&ctx).await,
        Commands::IssueToken {
            scale,
            max,
            transfer_fee,
            metadata,
            flags,
        } => commands::issue::run_token(&ctx, scale, max, transfer_fee, &metadata, flags).await,
        Commands::SetDomain { domain } => commands::issue::run_domain(&ctx, domain.as_deref()).await,
        Commands::Reconcile { yes } => commands::connect::run_reconcile(&ctx, yes).await,
    }
}
