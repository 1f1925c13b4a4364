//! List command implementation.

use anyhow::Result;

use super::{all_servers, mark_blocked, render_server_table, Context};
use crate::enforcer::FirewallBackend;
use crate::fetcher::ServerTable;
use crate::models::{Server, ServerStatus};
use crate::ping::{PingService, Prober};

#[derive(Debug, Clone, Copy, Default)]
pub struct ListOptions {
    pub ping: bool,
    pub blocked_only: bool,
    pub clustered: bool,
}

/// Print a titled server table followed by totals.
pub(crate) fn show_servers(title: &str, servers: &[Server], show_latency: bool, favorites: &[String]) {
    println!("\n{}:", title);
    print!("{}", render_server_table(servers, show_latency, favorites));
    println!("\nTotal: {} servers", servers.len());
    let blocked = servers
        .iter()
        .filter(|s| s.status == ServerStatus::Blocked)
        .count();
    if blocked > 0 {
        println!("Blocked: {}", blocked);
    }
}

/// Mark servers that currently have DROP rules.
pub(crate) async fn refresh_blocked(
    servers: &mut [Server],
    firewall: &dyn FirewallBackend,
) -> Result<()> {
    let blocked = firewall.blocked_servers().await?;
    mark_blocked(servers, &blocked);
    Ok(())
}

/// Build the listing. Returns the servers shown.
pub async fn list<P: Prober>(
    table: &ServerTable,
    firewall: &dyn FirewallBackend,
    pinger: &PingService<P>,
    options: ListOptions,
    favorites: &[String],
) -> Result<Vec<Server>> {
    let mut servers = all_servers(table, options.clustered);

    // Blocked state must be known before filtering
    refresh_blocked(&mut servers, firewall).await?;
    if options.blocked_only {
        servers.retain(|s| s.status == ServerStatus::Blocked);
    }
    if options.ping {
        println!("Pinging servers...");
        pinger.ping_servers(&mut servers, |_, _, _, _| {}).await;
    }

    let mode = if options.clustered {
        "clustered"
    } else {
        "unclustered"
    };
    show_servers(
        &format!("Servers ({} mode)", mode),
        &servers,
        options.ping,
        favorites,
    );
    Ok(servers)
}

pub async fn run(ctx: &Context, ping: bool, blocked_only: bool) -> Result<()> {
    let table = ctx.load_servers().await?;
    let firewall = ctx.firewall()?;
    let options = ListOptions {
        ping,
        blocked_only,
        clustered: ctx.clustered,
    };
    list(
        &table,
        firewall.as_ref(),
        &ctx.ping_service(),
        options,
        &ctx.config.favorites,
    )
    .await?;
    Ok(())
}
