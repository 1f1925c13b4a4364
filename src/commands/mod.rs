//! CLI command implementations.
//!
//! Each command module exposes a `run` entry point used by `main` and
//! smaller async functions that take the server table and firewall
//! backend explicitly, so they can be driven by tests.

pub mod apply;
pub mod block;
pub mod config;
pub mod history;
pub mod list;
pub mod ping;
pub mod preset;
pub mod region;
pub mod status;

use anyhow::Result;
use std::collections::HashSet;
use std::path::PathBuf;
use tracing::debug;

use crate::config::Config;
use crate::elevation::{ensure_privileges, is_root, SudoKeepalive, DEFAULT_KEEPALIVE_INTERVAL};
use crate::enforcer::{create_backend, label_to_name, rule_label, BackendOptions, FirewallBackend};
use crate::fetcher::{Fetcher, ServerTable};
use crate::lock::LockGuard;
use crate::models::{Server, ServerStatus};
use crate::ping::PingService;
use crate::signal::ShutdownToken;
use crate::utils::{format_latency, truncate};

/// Settings shared by every command: global flags merged over the config file.
pub struct Context {
    pub config_dir: PathBuf,
    pub config: Config,
    pub clustered: bool,
    pub dry_run: bool,
    pub use_sudo: bool,
}

/// Held for the duration of a command that changes firewall rules.
pub struct MutationGuard {
    _lock: LockGuard,
    _keepalive: Option<SudoKeepalive>,
}

impl Context {
    pub fn backend_options(&self) -> BackendOptions {
        BackendOptions {
            use_sudo: self.use_sudo,
            dry_run: self.dry_run,
        }
    }

    pub fn firewall(&self) -> Result<Box<dyn FirewallBackend>> {
        let backend = create_backend(self.config.firewall_backend, self.backend_options())?;
        debug!("Using {} backend", backend.name());
        Ok(backend)
    }

    pub async fn load_servers(&self) -> Result<ServerTable> {
        Fetcher::new(self.config.api_url.clone())?.fetch().await
    }

    pub fn ping_service(&self) -> PingService {
        PingService::new(self.config.ping_timeout_duration()).with_shutdown(ShutdownToken::new())
    }

    /// Take the instance lock, then make sure sudo will not prompt midway.
    pub async fn begin_mutation(&self) -> Result<MutationGuard> {
        let lock = LockGuard::acquire(&self.config_dir)?;
        ensure_privileges(self.use_sudo, self.dry_run).await?;
        let keepalive = (self.use_sudo && !self.dry_run && !is_root())
            .then(|| SudoKeepalive::start(DEFAULT_KEEPALIVE_INTERVAL));
        Ok(MutationGuard {
            _lock: lock,
            _keepalive: keepalive,
        })
    }

    pub fn mode_name(&self) -> &'static str {
        if self.clustered {
            "clustered"
        } else {
            "unclustered"
        }
    }
}

/// Resolve names against the table, printing the ones that matched nothing.
pub(crate) fn resolve_reporting(
    table: &ServerTable,
    names: &[String],
    clustered: bool,
) -> Vec<Server> {
    let (found, missing) = table.resolve(names, clustered);
    for name in &missing {
        println!("Server not found: {}", name);
    }
    found
}

/// Fail with `message` when nothing resolved.
pub(crate) fn require_servers(servers: &[Server], message: &str) -> Result<()> {
    if servers.is_empty() {
        anyhow::bail!("{}", message);
    }
    Ok(())
}

/// Every server of the active view, cloned so statuses can be updated.
pub(crate) fn all_servers(table: &ServerTable, clustered: bool) -> Vec<Server> {
    table.get_servers(clustered).values().cloned().collect()
}

/// Mark servers whose rule label shows up in the backend's blocked list.
pub(crate) fn mark_blocked(servers: &mut [Server], blocked_names: &[String]) {
    let blocked: HashSet<String> = blocked_names.iter().map(|n| n.to_lowercase()).collect();
    for server in servers.iter_mut() {
        let name = label_to_name(&rule_label(server)).to_lowercase();
        if blocked.contains(&name) {
            server.status = ServerStatus::Blocked;
        }
    }
}

/// Render servers as an aligned table sorted by (status, latency).
pub(crate) fn render_server_table(
    servers: &[Server],
    show_latency: bool,
    favorites: &[String],
) -> String {
    if servers.is_empty() {
        return "No servers found.\n".to_string();
    }

    let width = servers
        .iter()
        .map(|s| s.display_name().chars().count())
        .max()
        .unwrap_or(0)
        .clamp(30, 60);

    let mut header = format!("  {:<width$}  {:<12}", "Server", "Status", width = width);
    if show_latency {
        header.push_str(&format!("  {:<12}", "Latency"));
    }
    header.push_str(&format!("  {:<5}", "IPs"));

    let mut out = String::new();
    out.push_str(header.trim_end());
    out.push('\n');
    out.push_str(&"-".repeat(header.trim_end().len()));
    out.push('\n');

    let mut sorted: Vec<&Server> = servers.iter().collect();
    sorted.sort_by_key(|s| (s.status, s.latency_ms.unwrap_or(9999)));

    for server in sorted {
        let marker = if favorites.iter().any(|f| f == &server.code) {
            '*'
        } else {
            ' '
        };
        let mut row = format!(
            "{} {:<width$}  {:<12}",
            marker,
            truncate(&server.display_name(), width),
            server.status.as_str(),
            width = width
        );
        if show_latency {
            row.push_str(&format!("  {:<12}", format_latency(server.latency_ms)));
        }
        row.push_str(&format!("  {}", server.relays.len()));
        out.push_str(&row);
        out.push('\n');
    }
    out
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Server;

    #[test]
    fn test_mark_blocked_matches_rule_label() {
        let table = fixtures::table();
        let mut servers = all_servers(&table, false);
        let fra = table.get_server_by_name("fra", false).unwrap();
        let blocked = vec![label_to_name(&rule_label(fra))];

        mark_blocked(&mut servers, &blocked);
        let blocked: Vec<_> = servers
            .iter()
            .filter(|s| s.status == ServerStatus::Blocked)
            .map(|s| s.code.as_str())
            .collect();
        assert_eq!(blocked, vec!["fra"]);
    }

    #[test]
    fn test_mark_blocked_does_not_confuse_prefixes() {
        let table = fixtures::table();
        let mut servers = all_servers(&table, false);
        let sto2 = table.get_server_by_name("sto2", false).unwrap();
        mark_blocked(&mut servers, &[label_to_name(&rule_label(sto2))]);

        let sto = servers.iter().find(|s| s.code == "sto").unwrap();
        assert_ne!(sto.status, ServerStatus::Blocked);
    }

    #[test]
    fn test_render_server_table_sorting() {
        let mut a = Server::new("Alpha", "a", vec![]);
        a.status = ServerStatus::Available;
        a.latency_ms = Some(80);
        let mut b = Server::new("Beta", "b", vec![]);
        b.status = ServerStatus::Available;
        b.latency_ms = Some(20);
        let mut c = Server::new("Gamma", "c", vec![]);
        c.status = ServerStatus::Blocked;

        let out = render_server_table(&[a, c, b], true, &["c".to_string()]);
        let lines: Vec<&str> = out.lines().collect();
        assert!(lines[0].contains("Latency"));
        assert!(lines[2].contains("Beta (b)"));
        assert!(lines[2].contains("20ms"));
        assert!(lines[3].contains("Alpha (a)"));
        assert!(lines[4].starts_with("* Gamma (c)"));
        assert!(lines[4].contains("N/A"));
    }

    #[test]
    fn test_render_server_table_empty() {
        assert_eq!(render_server_table(&[], false, &[]), "No servers found.\n");
    }

    #[test]
    fn test_render_without_latency_column() {
        let out = render_server_table(&[Server::new("Alpha", "a", vec![])], false, &[]);
        assert!(!out.contains("Latency"));
        assert!(out.contains("unknown"));
    }

    #[test]
    fn test_require_servers() {
        assert!(require_servers(&[], "No valid servers to block.").is_err());
        assert!(require_servers(&[Server::new("A", "a", vec![])], "x").is_ok());
    }
}
