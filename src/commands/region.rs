//! Region commands: regions, list-region, allow-region, block-region,
//! unblock-region.

use anyhow::Result;

use super::list::{refresh_blocked, show_servers};
use super::{all_servers, Context};
use crate::enforcer::{BatchOutcome, FirewallBackend};
use crate::fetcher::ServerTable;
use crate::models::Server;
use crate::ping::{PingService, Prober};
use crate::regions::{canonical_regions, region_servers};

/// Region codes, or an error naming the unknown region.
fn lookup(region: &str) -> Result<&'static [&'static str]> {
    let codes = region_servers(region);
    if codes.is_empty() {
        anyhow::bail!(
            "Unknown region: {}\nUse 'sdrpick regions' to see available regions",
            region
        );
    }
    Ok(codes)
}

/// Split the view into (in region, outside region) by server code.
fn partition(table: &ServerTable, codes: &[&str], clustered: bool) -> (Vec<Server>, Vec<Server>) {
    all_servers(table, clustered)
        .into_iter()
        .partition(|s| codes.contains(&s.code.as_str()))
}

pub fn regions() {
    println!("Available Region Presets:");
    println!("{}", "-".repeat(60));
    for (alias, region) in canonical_regions() {
        println!(
            "  {:<6} {:<20} {} ({} servers)",
            alias,
            region.name,
            region.description,
            region.servers.len()
        );
    }
    println!("\nUsage examples:");
    println!("  sdrpick allow-region na      # Allow only North America");
    println!("  sdrpick block-region cn      # Block China servers");
    println!("  sdrpick list-region eu       # List European servers");
}

pub async fn list_region<P: Prober>(
    table: &ServerTable,
    firewall: &dyn FirewallBackend,
    pinger: Option<&PingService<P>>,
    region: &str,
    clustered: bool,
    favorites: &[String],
) -> Result<Vec<Server>> {
    let codes = lookup(region)?;
    let (mut servers, _) = partition(table, codes, clustered);
    refresh_blocked(&mut servers, firewall).await?;
    if let Some(pinger) = pinger {
        println!("Pinging servers...");
        pinger.ping_servers(&mut servers, |_, _, _, _| {}).await;
    }
    show_servers(
        &format!("Servers in {}", region),
        &servers,
        pinger.is_some(),
        favorites,
    );
    Ok(servers)
}

/// Unblock the region, then block everything outside it.
pub async fn allow_region(
    table: &ServerTable,
    firewall: &dyn FirewallBackend,
    region: &str,
    clustered: bool,
) -> Result<BatchOutcome> {
    let codes = lookup(region)?;
    let (mut inside, mut outside) = partition(table, codes, clustered);
    if !inside.is_empty() {
        firewall.unblock_servers(&mut inside).await?;
    }
    let outcome = firewall.block_servers(&mut outside).await?;
    println!(
        "Allowed only {}: blocked {} servers, {} allowed",
        region,
        outcome.changed,
        inside.len()
    );
    Ok(outcome)
}

pub async fn block_region(
    table: &ServerTable,
    firewall: &dyn FirewallBackend,
    region: &str,
    clustered: bool,
) -> Result<BatchOutcome> {
    let codes = lookup(region)?;
    let (mut inside, _) = partition(table, codes, clustered);
    let outcome = firewall.block_servers(&mut inside).await?;
    println!("Blocked {} servers in {}", outcome.changed, region);
    if outcome.skipped > 0 {
        println!("Already blocked: {}", outcome.skipped);
    }
    Ok(outcome)
}

pub async fn unblock_region(
    table: &ServerTable,
    firewall: &dyn FirewallBackend,
    region: &str,
    clustered: bool,
) -> Result<BatchOutcome> {
    let codes = lookup(region)?;
    let (mut inside, _) = partition(table, codes, clustered);
    let outcome = firewall.unblock_servers(&mut inside).await?;
    println!("Unblocked {} servers in {}", outcome.changed, region);
    Ok(outcome)
}

pub async fn run_list_region(ctx: &Context, region: &str, ping: bool) -> Result<()> {
    lookup(region)?;
    let table = ctx.load_servers().await?;
    let firewall = ctx.firewall()?;
    let pinger = ctx.ping_service();
    list_region(
        &table,
        firewall.as_ref(),
        ping.then_some(&pinger),
        region,
        ctx.clustered,
        &ctx.config.favorites,
    )
    .await?;
    Ok(())
}

/// `allow-region` falls back to the configured default region.
pub async fn run_allow_region(ctx: &Context, region: Option<&str>) -> Result<()> {
    let region = region
        .or(ctx.config.default_region.as_deref())
        .ok_or_else(|| {
            anyhow::anyhow!("No region given and no default_region configured")
        })?;
    lookup(region)?;
    let _guard = ctx.begin_mutation().await?;
    let table = ctx.load_servers().await?;
    let firewall = ctx.firewall()?;
    allow_region(&table, firewall.as_ref(), region, ctx.clustered).await?;
    Ok(())
}

pub async fn run_block_region(ctx: &Context, region: &str) -> Result<()> {
    lookup(region)?;
    let _guard = ctx.begin_mutation().await?;
    let table = ctx.load_servers().await?;
    let firewall = ctx.firewall()?;
    block_region(&table, firewall.as_ref(), region, ctx.clustered).await?;
    Ok(())
}

pub async fn run_unblock_region(ctx: &Context, region: &str) -> Result<()> {
    lookup(region)?;
    let _guard = ctx.begin_mutation().await?;
    let table = ctx.load_servers().await?;
    let firewall = ctx.firewall()?;
    unblock_region(&table, firewall.as_ref(), region, ctx.clustered).await?;
    Ok(())
}
