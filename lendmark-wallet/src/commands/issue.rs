//! Token issuance and account settings commands

use anyhow::{anyhow, Result};

use lendmark_wallet::{LedgerTransaction, SignedTransactionResult};

use super::{print_error, print_success, Context};

/// Run the issue-token command
pub async fn run_token(
    ctx: &Context,
    asset_scale: u8,
    maximum_amount: Option<u64>,
    transfer_fee: u32,
    metadata_hex: &str,
    flags: u32,
) -> Result<()> {
    let metadata = hex::decode(metadata_hex).map_err(|e| anyhow!("metadata is not hex: {}", e))?;
    let tx = LedgerTransaction::token_issuance(asset_scale, maximum_amount, transfer_fee, metadata, flags)?;
    submit(ctx, &tx).await
}

/// Run the set-domain command
pub async fn run_domain(ctx: &Context, domain: Option<&str>) -> Result<()> {
    let tx = LedgerTransaction::account_set(domain)?;
    submit(ctx, &tx).await
}

async fn submit(ctx: &Context, tx: &LedgerTransaction) -> Result<()> {
    let (orchestrator, address) = ctx.connected().await?;
    println!("Submitting {} from {}...", tx.kind(), address);

    match orchestrator.sign_and_send_transaction(tx).await {
        Ok(SignedTransactionResult { hash, result_code, .. }) => {
            print_success(&format!("{} validated: {}", tx.kind(), hash));
            println!("Result: {}", result_code);
        }
        Err(e) => print_error(&e.to_string()),
    }
    Ok(())
}
