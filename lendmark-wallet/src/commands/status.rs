//! Wallet status command

use anyhow::Result;

use super::{print_warning, Context};

/// Run the status command
pub async fn run(ctx: &Context) -> Result<()> {
    let orchestrator = ctx.orchestrator().await?;
    let state = orchestrator.state();

    println!();
    println!("Network:  {}", ctx.config.network);
    match &state.address {
        Some(address) => println!("Address:  {}", address),
        None => println!("Address:  (none, run 'lendmark-wallet connect' to create one)"),
    }

    match &state.remote_record {
        Some(record) => {
            println!("Record:   {}", record.address);
            println!("Backup:   {}", if record.seed_backup.is_some() { "stored" } else { "missing" });
            match record.verified_at {
                Some(at) => println!("Verified: {}", at.format("%Y-%m-%d %H:%M UTC")),
                None => println!("Verified: no"),
            }
        }
        None => println!("Record:   (none)"),
    }

    if state.reconciliation_pending {
        println!();
        print_warning("Local wallet and marketplace record disagree.");
    }

    if let Some(url) = orchestrator.explorer_url() {
        println!();
        println!("Explorer: {}", url);
    }

    Ok(())
}
