//! Connect and reconcile commands

use anyhow::Result;

use super::{print_error, print_success, print_warning, prompt_confirm, Context};

/// Run the connect command
pub async fn run(ctx: &Context) -> Result<()> {
    let orchestrator = ctx.orchestrator().await?;
    let had_address = orchestrator.state().address.is_some();

    let Some(address) = orchestrator.connect().await else {
        print_error("Could not unlock the wallet. Run with --verbose for details.");
        return Ok(());
    };

    println!();
    if had_address {
        print_success(&format!("Wallet unlocked: {}", address));
    } else {
        print_success(&format!("Wallet created: {}", address));
    }
    if let Some(url) = orchestrator.explorer_url() {
        println!("Explorer: {}", url);
    }

    if orchestrator.state().reconciliation_pending {
        println!();
        print_warning("The marketplace has a different address on record for this account.");
        println!("         Run 'lendmark-wallet reconcile' to replace it with this wallet.");
    }

    Ok(())
}

/// Run the reconcile command
pub async fn run_reconcile(ctx: &Context, skip_confirm: bool) -> Result<()> {
    let (orchestrator, address) = ctx.connected().await?;
    let state = orchestrator.state();

    if !state.reconciliation_pending && state.remote_record.is_some() {
        print_success("Marketplace record already matches this wallet.");
        return Ok(());
    }

    if let Some(remote) = &state.remote_record {
        println!("Marketplace record: {}", remote.address);
    }
    println!("Local wallet:       {}", address);

    if !skip_confirm && !prompt_confirm("Replace the marketplace record with the local wallet?")? {
        println!("Cancelled.");
        return Ok(());
    }

    let record = orchestrator.reconcile().await?;
    print_success(&format!("Marketplace record now points at {}", record.address));
    Ok(())
}
