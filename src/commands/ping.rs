//! Ping command implementation.

use anyhow::Result;
use std::collections::HashMap;
use tracing::{debug, warn};

use super::{all_servers, render_server_table, resolve_reporting, Context};
use crate::fetcher::ServerTable;
use crate::history::LatencyHistory;
use crate::ping::{PingService, Prober};
use crate::utils::format_latency;

/// Ping the named servers (all of the view when `names` is empty) and
/// record the results into `history`.
pub async fn ping<P: Prober>(
    table: &ServerTable,
    pinger: &PingService<P>,
    history: &mut LatencyHistory,
    names: &[String],
    clustered: bool,
    favorites: &[String],
) -> Result<HashMap<String, Option<u32>>> {
    let mut servers = if names.is_empty() {
        all_servers(table, clustered)
    } else {
        resolve_reporting(table, names, clustered)
    };
    if servers.is_empty() {
        anyhow::bail!("No servers to ping.");
    }

    println!("Pinging {} server(s)...", servers.len());
    let results = pinger
        .ping_servers(&mut servers, |done, total, code, latency| {
            debug!("[{}/{}] {}: {}", done, total, code, format_latency(latency));
        })
        .await;

    print!("{}", render_server_table(&servers, true, favorites));

    // An interrupted run has unprobed servers; don't record them as failures
    if pinger.is_cancelled() {
        warn!("Ping interrupted; results not saved to history");
    } else if let Err(e) = history.record_batch(&results) {
        warn!("Could not save latency history: {:#}", e);
    }
    Ok(results)
}

pub async fn run(ctx: &Context, names: &[String]) -> Result<()> {
    let table = ctx.load_servers().await?;
    let mut history = LatencyHistory::open(&ctx.config_dir);
    ping(
        &table,
        &ctx.ping_service(),
        &mut history,
        names,
        ctx.clustered,
        &ctx.config.favorites,
    )
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::fixtures::{names, pinger, table};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_ping_named_servers_records_history() {
        let dir = TempDir::new().unwrap();
        let mut history = LatencyHistory::open(dir.path());
        let table = table();

        let results = ping(
            &table,
            &pinger(),
            &mut history,
            &names(&["fra", "ams", "missing"]),
            false,
            &[],
        )
        .await
        .unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results["fra"], Some(12));
        assert_eq!(results["ams"], None);

        let mut reopened = LatencyHistory::open(dir.path());
        assert_eq!(reopened.get("fra").unwrap().records.len(), 1);
        assert!(!reopened.get("ams").unwrap().records[0].success);
    }

    #[tokio::test]
    async fn test_ping_all_when_no_names() {
        let dir = TempDir::new().unwrap();
        let mut history = LatencyHistory::open(dir.path());
        let table = table();
        let results = ping(&table, &pinger(), &mut history, &[], false, &[])
            .await
            .unwrap();
        assert_eq!(results.len(), table.servers.len());
    }

    #[tokio::test]
    async fn test_ping_nothing_resolved() {
        let dir = TempDir::new().unwrap();
        let mut history = LatencyHistory::open(dir.path());
        let table = table();
        let result = ping(&table, &pinger(), &mut history, &names(&["zzz"]), false, &[]).await;
        assert!(result.is_err());
    }
}
