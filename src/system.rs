//! Host operating system interaction

use anyhow::{bail, Context, Result};
use tokio::process::Command;
use tracing::{info, warn};

/// Run the configured power-off command and wait for it to finish
pub async fn request_power_off(command: &[String]) -> Result<()> {
    let Some((program, args)) = command.split_first() else {
        warn!("No power-off command configured, skipping");
        return Ok(());
    };

    info!("Powering off: {}", command.join(" "));
    let status = Command::new(program)
        .args(args)
        .status()
        .await
        .with_context(|| format!("Failed to run {}", program))?;

    if !status.success() {
        bail!("{} exited with {}", program, status);
    }
    Ok(())
}
