//! Apply the preferences stored in the config file.
//!
//! Order: `always_block`, then `never_block`, then `default_region`. Every
//! step runs even if an earlier one failed; the command fails afterwards.

use anyhow::Result;
use tracing::error;

use super::{all_servers, Context};
use crate::config::Config;
use crate::enforcer::FirewallBackend;
use crate::fetcher::ServerTable;
use crate::regions::region_servers;

/// What `apply` changed, for the summary line.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ApplyReport {
    pub applied: Vec<String>,
    pub failures: usize,
}

pub async fn apply(
    table: &ServerTable,
    firewall: &dyn FirewallBackend,
    config: &Config,
    clustered: bool,
) -> ApplyReport {
    let mut report = ApplyReport::default();

    if !config.always_block.is_empty() {
        let (mut servers, _) = table.resolve(&config.always_block, clustered);
        if !servers.is_empty() {
            match firewall.block_servers(&mut servers).await {
                Ok(outcome) if outcome.changed > 0 => report
                    .applied
                    .push(format!("blocked {} always_block servers", outcome.changed)),
                Ok(_) => {}
                Err(e) => {
                    error!("Error blocking: {:#}", e);
                    report.failures += 1;
                }
            }
        }
    }

    if !config.never_block.is_empty() {
        let (mut servers, _) = table.resolve(&config.never_block, clustered);
        if !servers.is_empty() {
            match firewall.unblock_servers(&mut servers).await {
                Ok(outcome) if outcome.changed > 0 => report
                    .applied
                    .push(format!("unblocked {} never_block servers", outcome.changed)),
                Ok(_) => {}
                Err(e) => {
                    error!("Error unblocking: {:#}", e);
                    report.failures += 1;
                }
            }
        }
    }

    if let Some(region) = config.default_region.as_deref() {
        let codes = region_servers(region);
        if codes.is_empty() {
            error!("Unknown default_region: {}", region);
            report.failures += 1;
        } else {
            let listed = |list: &[String], code: &str| list.iter().any(|c| c == code);
            let (mut to_unblock, mut to_block): (Vec<_>, Vec<_>) = all_servers(table, clustered)
                .into_iter()
                .filter(|s| {
                    let inside = codes.contains(&s.code.as_str());
                    if inside {
                        !listed(&config.always_block, &s.code)
                    } else {
                        !listed(&config.never_block, &s.code)
                    }
                })
                .partition(|s| codes.contains(&s.code.as_str()));

            let result = async {
                if !to_unblock.is_empty() {
                    firewall.unblock_servers(&mut to_unblock).await?;
                }
                if !to_block.is_empty() {
                    firewall.block_servers(&mut to_block).await?;
                }
                anyhow::Ok(())
            }
            .await;
            match result {
                Ok(()) => report.applied.push(format!("applied region {}", region)),
                Err(e) => {
                    error!("Error applying region: {:#}", e);
                    report.failures += 1;
                }
            }
        }
    }

    report
}

pub async fn run(ctx: &Context) -> Result<()> {
    let _guard = ctx.begin_mutation().await?;
    let table = ctx.load_servers().await?;
    let firewall = ctx.firewall()?;

    println!("Applying configuration preferences...");
    let report = apply(&table, firewall.as_ref(), &ctx.config, ctx.clustered).await;

    if report.applied.is_empty() {
        println!("No preferences configured to apply.");
        println!("Use 'sdrpick config set default_region <region>' to set preferences.");
    } else {
        println!("Applied: {}", report.applied.join(", "));
    }

    if report.failures > 0 {
        anyhow::bail!("{} preference step(s) failed", report.failures);
    }
    Ok(())
}
