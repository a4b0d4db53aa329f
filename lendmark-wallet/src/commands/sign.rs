//! Message signing command

use anyhow::Result;

use super::Context;

/// Run the sign command
pub async fn run(ctx: &Context, message: &str) -> Result<()> {
    let (orchestrator, _) = ctx.connected().await?;
    let signed = orchestrator.sign_message(message.as_bytes())?;

    println!();
    println!("Address:    {}", signed.address);
    println!("Public key: {}", signed.public_key);
    println!("Signature:  {}", signed.signature);

    Ok(())
}
