//! block, unblock, block-all and block-except.

use anyhow::Result;
use std::collections::HashSet;

use super::{all_servers, require_servers, resolve_reporting, Context};
use crate::enforcer::{BatchOutcome, FirewallBackend};
use crate::fetcher::ServerTable;

fn print_blocked(outcome: BatchOutcome) {
    println!("Blocked {} server(s)", outcome.changed);
    if outcome.skipped > 0 {
        println!("Already blocked: {}", outcome.skipped);
    }
}

/// Block the named servers.
pub async fn block(
    table: &ServerTable,
    firewall: &dyn FirewallBackend,
    names: &[String],
    clustered: bool,
) -> Result<BatchOutcome> {
    let mut servers = resolve_reporting(table, names, clustered);
    require_servers(&servers, "No valid servers to block.")?;
    let outcome = firewall.block_servers(&mut servers).await?;
    print_blocked(outcome);
    Ok(outcome)
}

/// Unblock the named servers.
pub async fn unblock(
    table: &ServerTable,
    firewall: &dyn FirewallBackend,
    names: &[String],
    clustered: bool,
) -> Result<BatchOutcome> {
    let mut servers = resolve_reporting(table, names, clustered);
    require_servers(&servers, "No valid servers to unblock.")?;
    let outcome = firewall.unblock_servers(&mut servers).await?;
    println!("Unblocked {} server(s)", outcome.changed);
    if outcome.skipped > 0 {
        println!("Not blocked: {}", outcome.skipped);
    }
    Ok(outcome)
}

/// Drop everything this tool installed.
pub async fn unblock_all(firewall: &dyn FirewallBackend) -> Result<()> {
    firewall.reset().await?;
    println!("All servers unblocked.");
    Ok(())
}

pub async fn block_all(
    table: &ServerTable,
    firewall: &dyn FirewallBackend,
    clustered: bool,
) -> Result<BatchOutcome> {
    let mut servers = all_servers(table, clustered);
    let outcome = firewall.block_servers(&mut servers).await?;
    print_blocked(outcome);
    Ok(outcome)
}

/// Unblock the kept servers, then block every other one.
pub async fn block_except(
    table: &ServerTable,
    firewall: &dyn FirewallBackend,
    keep: &[String],
    clustered: bool,
) -> Result<BatchOutcome> {
    let kept = resolve_reporting(table, keep, clustered);
    require_servers(&kept, "No valid servers specified to keep.")?;
    let keep_codes: HashSet<&str> = kept.iter().map(|s| s.code.as_str()).collect();

    let (mut to_unblock, mut to_block): (Vec<_>, Vec<_>) = all_servers(table, clustered)
        .into_iter()
        .partition(|s| keep_codes.contains(s.code.as_str()));

    firewall.unblock_servers(&mut to_unblock).await?;
    let outcome = firewall.block_servers(&mut to_block).await?;
    println!(
        "Blocked {} server(s), keeping {} unblocked",
        outcome.changed,
        keep_codes.len()
    );
    Ok(outcome)
}

pub async fn run_block(ctx: &Context, names: &[String]) -> Result<()> {
    let _guard = ctx.begin_mutation().await?;
    let table = ctx.load_servers().await?;
    let firewall = ctx.firewall()?;
    block(&table, firewall.as_ref(), names, ctx.clustered).await?;
    Ok(())
}

pub async fn run_unblock(ctx: &Context, names: &[String], all: bool) -> Result<()> {
    if !all && names.is_empty() {
        anyhow::bail!("Specify servers to unblock or use --all");
    }
    let _guard = ctx.begin_mutation().await?;
    let firewall = ctx.firewall()?;
    if all {
        return unblock_all(firewall.as_ref()).await;
    }
    let table = ctx.load_servers().await?;
    unblock(&table, firewall.as_ref(), names, ctx.clustered).await?;
    Ok(())
}

pub async fn run_block_all(ctx: &Context) -> Result<()> {
    let _guard = ctx.begin_mutation().await?;
    let table = ctx.load_servers().await?;
    let firewall = ctx.firewall()?;
    block_all(&table, firewall.as_ref(), ctx.clustered).await?;
    Ok(())
}

pub async fn run_block_except(ctx: &Context, keep: &[String]) -> Result<()> {
    let _guard = ctx.begin_mutation().await?;
    let table = ctx.load_servers().await?;
    let firewall = ctx.firewall()?;
    block_except(&table, firewall.as_ref(), keep, ctx.clustered).await?;
    Ok(())
}
