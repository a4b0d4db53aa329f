//! Faucet funding command

use anyhow::Result;

use lendmark_wallet::{transaction::format_amount, LedgerClient};

use super::{print_error, print_success, Context};

/// Run the fund command
pub async fn run(ctx: &Context) -> Result<()> {
    if ctx.config.network.is_production() {
        print_error(&format!("There is no faucet on {}.", ctx.config.network));
        return Ok(());
    }

    let orchestrator = ctx.orchestrator().await?;
    let Some(address) = orchestrator.state().address else {
        print_error("No wallet found. Run 'lendmark-wallet connect' first.");
        return Ok(());
    };

    let ledger = LedgerClient::new(ctx.config.ledger_config())?;
    let grant = ledger.request_funding(&address).await?;

    match grant.amount {
        Some(amount) => print_success(&format!("Funded {} with {}", grant.address, format_amount(amount))),
        None => print_success(&format!("Funding requested for {}", grant.address)),
    }
    println!("Balance: {}", format_amount(orchestrator.get_balance().await));

    Ok(())
}
