//! Send payment command

use anyhow::Result;

use lendmark_wallet::{
    keys::is_valid_address,
    transaction::{format_amount, parse_amount},
    LedgerTransaction,
};

use super::{print_error, print_success, prompt_confirm, Context};

/// Run the send command
pub async fn run(
    ctx: &Context,
    address: &str,
    amount: &str,
    destination_tag: Option<u32>,
    skip_confirm: bool,
) -> Result<()> {
    if !is_valid_address(address) {
        print_error(&format!("'{}' is not a valid address", address));
        return Ok(());
    }

    let drops = parse_amount(amount)?;
    let tx = LedgerTransaction::payment(address, drops, destination_tag)?;

    let (orchestrator, from) = ctx.connected().await?;
    let balance = orchestrator.get_balance().await;
    if balance < drops {
        print_error(&format!(
            "Insufficient funds. Balance: {}, needed: {}",
            format_amount(balance),
            format_amount(drops)
        ));
        return Ok(());
    }

    println!();
    println!("Transaction details:");
    println!("  From:      {}", from);
    println!("  Recipient: {}", address);
    if let Some(tag) = destination_tag {
        println!("  Tag:       {}", tag);
    }
    println!("  Amount:    {}", format_amount(drops));
    println!();

    if !skip_confirm && !prompt_confirm("Send this transaction?")? {
        println!("Cancelled.");
        return Ok(());
    }

    println!("Submitting and waiting for validation...");
    match orchestrator.sign_and_send_transaction(&tx).await {
        Ok(result) => {
            print_success(&format!("Transaction validated: {}", result.hash));
            println!("Result: {}", result.result_code);
        }
        Err(e) => match e.result_code() {
            Some(code) => print_error(&format!("Rejected by the ledger: {}", code)),
            None => print_error(&e.to_string()),
        },
    }

    Ok(())
}
