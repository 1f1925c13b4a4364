//! status, reset and save-rules.

use anyhow::Result;

use super::Context;
use crate::enforcer::FirewallBackend;
use crate::error::PickerError;
use crate::presets::PresetStore;

const STATUS_PREVIEW: usize = 10;

/// Print the status report. Fails when the firewall cannot be managed.
pub async fn status(
    firewall: &dyn FirewallBackend,
    presets: &PresetStore,
    mode: &str,
    dry_run: bool,
) -> Result<()> {
    let permissions = firewall.check_permissions().await?;

    println!("Deadlock Server Picker Status");
    println!("{}", "-".repeat(40));
    println!("Backend: {}", firewall.name());
    if permissions.ok {
        println!("Firewall access: OK");
    } else {
        println!("Firewall access: DENIED");
        println!("  {}", permissions.message);
    }
    println!("Server mode: {}", mode);
    if dry_run {
        println!("Mode: DRY RUN");
    }

    // Listing needs the same privileges; don't turn a denial into a second error
    let blocked = if permissions.ok {
        firewall.blocked_servers().await?
    } else {
        Vec::new()
    };
    println!("\nBlocked servers: {}", blocked.len());
    for name in blocked.iter().take(STATUS_PREVIEW) {
        println!("  - {}", name);
    }
    if blocked.len() > STATUS_PREVIEW {
        println!("  ... and {} more", blocked.len() - STATUS_PREVIEW);
    }

    println!("\nSaved presets: {}", presets.len());

    if !permissions.ok {
        return Err(PickerError::Permission(permissions.message).into());
    }
    Ok(())
}

pub async fn reset(firewall: &dyn FirewallBackend) -> Result<()> {
    firewall.reset().await?;
    println!("All Deadlock Server Picker firewall rules removed.");
    Ok(())
}

pub fn save_rules(firewall: &dyn FirewallBackend) {
    println!("To persist firewall rules across reboots:");
    println!();
    println!("  {}", firewall.save_command());
    println!();
    match firewall.name() {
        "nftables" => println!("Note: enable nftables.service so the saved ruleset loads at boot"),
        _ => {
            println!("Note: You may need to install iptables-persistent (Debian/Ubuntu)");
            println!("      or enable iptables.service (Arch/systemd)");
        }
    }
}

pub async fn run_status(ctx: &Context) -> Result<()> {
    let firewall = ctx.firewall()?;
    let presets = PresetStore::open(&ctx.config_dir)?;
    status(firewall.as_ref(), &presets, ctx.mode_name(), ctx.dry_run).await
}

pub async fn run_reset(ctx: &Context) -> Result<()> {
    let _guard = ctx.begin_mutation().await?;
    let firewall = ctx.firewall()?;
    reset(firewall.as_ref()).await
}

pub fn run_save_rules(ctx: &Context) -> Result<()> {
    let firewall = ctx.firewall()?;
    save_rules(firewall.as_ref());
    Ok(())
}
