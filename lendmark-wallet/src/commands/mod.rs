//! CLI Commands
//!
//! Each command loads the configuration, builds a wallet orchestrator and
//! resolves the signed-in user before doing its work.

pub mod balance;
pub mod connect;
pub mod fund;
pub mod issue;
pub mod send;
pub mod sign;
pub mod status;

use anyhow::{anyhow, Result};
use std::{
    io::{self, IsTerminal, Write},
    path::Path,
    sync::Arc,
};

use lendmark_wallet::{
    ConsolePresence, LocalAuthenticator, UserIdentity, WalletConfig, WalletOrchestrator,
};

/// Everything a command needs
pub struct Context {
    pub config: WalletConfig,
    user: Option<String>,
}

impl Context {
    pub fn load(config_path: Option<&Path>, user: Option<String>) -> Result<Self> {
        let mut config = WalletConfig::load(config_path)?;
        if config.backup_passphrase.is_none() && io::stdin().is_terminal() && wants_sealed_backup()
        {
            let passphrase = prompt_password("Backup passphrase (empty for none): ")?;
            config.backup_passphrase = Some(passphrase).filter(|p| !p.is_empty());
        }
        Ok(Self { config, user })
    }

    fn identity(&self) -> Result<UserIdentity> {
        let user_id = self
            .user
            .clone()
            .ok_or_else(|| anyhow!("No user given. Pass --user or set LENDMARK_USER."))?;
        let api_token = self
            .config
            .api_token
            .clone()
            .ok_or_else(|| anyhow!("No API token. Set LENDMARK_API_TOKEN or api_token in the config."))?;

        Ok(UserIdentity {
            label: user_id.clone(),
            user_id,
            api_token,
        })
    }

    /// Build the orchestrator and resolve the user's wallet.
    pub async fn orchestrator(&self) -> Result<WalletOrchestrator> {
        let identity = self.identity()?;
        let authenticator =
            LocalAuthenticator::open(&self.config.passkey_path(), Arc::new(ConsolePresence))?;
        let orchestrator = WalletOrchestrator::from_config(&self.config, Arc::new(authenticator))?;
        orchestrator.initialize(Some(identity)).await;
        Ok(orchestrator)
    }

    /// Orchestrator with the wallet unlocked
    pub async fn connected(&self) -> Result<(WalletOrchestrator, String)> {
        let orchestrator = self.orchestrator().await?;
        match orchestrator.connect().await {
            Some(address) => Ok((orchestrator, address)),
            None => Err(anyhow!(
                "Could not unlock the wallet. Run with --verbose for details."
            )),
        }
    }
}

/// Sealing is opt-in through `LENDMARK_SEAL_BACKUP`.
fn wants_sealed_backup() -> bool {
    std::env::var("LENDMARK_SEAL_BACKUP").is_ok_and(|v| v == "1" || v.eq_ignore_ascii_case("true"))
}

/// Prompt for password input (hidden)
pub fn prompt_password(prompt: &str) -> Result<String> {
    print!("{}", prompt);
    io::stdout().flush()?;

    let password = rpassword::read_password()?;
    Ok(password)
}

/// Prompt for confirmation
pub fn prompt_confirm(message: &str) -> Result<bool> {
    print!("{} [y/N]: ", message);
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;

    Ok(input.trim().eq_ignore_ascii_case("y") || input.trim().eq_ignore_ascii_case("yes"))
}

/// Print an error message
pub fn print_error(message: &str) {
    eprintln!("\x1b[31mError:\x1b[0m {}", message);
}

/// Print a success message
pub fn print_success(message: &str) {
    println!("\x1b[32m{}\x1b[0m", message);
}

/// Print a warning message
pub fn print_warning(message: &str) {
    println!("\x1b[33mWarning:\x1b[0m {}", message);
}
