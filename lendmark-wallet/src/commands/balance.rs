//! Balance check command

use anyhow::Result;

use lendmark_wallet::transaction::format_amount;

use super::{print_error, print_success, Context};

/// Run the balance command
pub async fn run(ctx: &Context) -> Result<()> {
    let orchestrator = ctx.orchestrator().await?;

    let Some(address) = orchestrator.state().address else {
        print_error("No wallet found. Run 'lendmark-wallet connect' first.");
        return Ok(());
    };

    println!();
    println!("Querying {}...", ctx.config.network);
    let balance = orchestrator.get_balance().await;

    println!();
    print_success(&format!("Balance: {}", format_amount(balance)));
    println!("Address: {}", address);

    Ok(())
}
