//! iptables backend implementation.
//!
//! All rules live in a dedicated chain that OUTPUT and FORWARD jump to.
//! Each server gets one DROP rule listing its relay IPs, tagged with a
//! `--comment` of the form `DEADLOCK_SERVER_PICKER_<label>`.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info, warn};

use super::{
    label_to_name, permission_message, pick_save_command, rule_label, BackendOptions,
    BatchOutcome, FirewallBackend, PermissionCheck,
};
use crate::cmd_abstraction::{find_binary, CommandExecutor, CommandRunner, RealCommandExecutor};
use crate::models::{Server, ServerStatus};

const CHAIN_NAME: &str = "DEADLOCK_SERVER_PICKER";
const RULE_PREFIX: &str = "DEADLOCK_SERVER_PICKER";
const PARENT_CHAINS: &[&str] = &["OUTPUT", "FORWARD"];
const IPTABLES_FALLBACKS: &[&str] = &["/sbin/iptables", "/usr/sbin/iptables"];

/// What `block_one` did for a server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockResult {
    Added,
    AlreadyBlocked,
    NoRelays,
}

const SAVE_COMMANDS: &[(&str, &str)] = &[
    (
        "/etc/iptables/rules.v4",
        "sudo iptables-save | sudo tee /etc/iptables/rules.v4",
    ),
    (
        "/etc/sysconfig/iptables",
        "sudo iptables-save | sudo tee /etc/sysconfig/iptables",
    ),
    (
        "/etc/iptables",
        "sudo iptables-save | sudo tee /etc/iptables/iptables.rules",
    ),
];
const SAVE_FALLBACK: &str = "sudo iptables-save > /path/to/rules.backup";

/// iptables backend (one commented DROP rule per server)
pub struct IptablesBackend<E: CommandExecutor = RealCommandExecutor> {
    runner: CommandRunner<E>,
    iptables: String,
}

impl IptablesBackend<RealCommandExecutor> {
    pub fn new(options: BackendOptions) -> Result<Self> {
        let path = find_binary("iptables", IPTABLES_FALLBACKS)?;
        Ok(Self::with_executor(
            RealCommandExecutor::new(),
            path.to_string_lossy().to_string(),
            options,
        ))
    }
}

impl<E: CommandExecutor> IptablesBackend<E> {
    pub fn with_executor(executor: E, iptables: impl Into<String>, options: BackendOptions) -> Self {
        Self {
            runner: CommandRunner::new(executor, options.use_sudo, options.dry_run),
            iptables: iptables.into(),
        }
    }

    fn comment_for(server: &Server) -> String {
        format!("{}_{}", RULE_PREFIX, rule_label(server))
    }

    /// Create the chain and the OUTPUT/FORWARD jumps if the chain is missing
    fn ensure_chain(&self) -> Result<()> {
        let check = self.runner.run(&self.iptables, &["-L", CHAIN_NAME, "-n"])?;
        if check.success {
            return Ok(());
        }

        debug!("Creating iptables chain {}", CHAIN_NAME);
        self.runner.run_checked(&self.iptables, &["-N", CHAIN_NAME])?;
        for parent in PARENT_CHAINS {
            self.runner.run_checked(
                &self.iptables,
                &[
                    "-I", parent, "1",
                    "-j", CHAIN_NAME,
                    "-m", "comment", "--comment", RULE_PREFIX,
                ],
            )?;
        }
        Ok(())
    }

    /// `-L CHAIN -n --line-numbers`, or None if the chain does not exist
    fn list_with_line_numbers(&self) -> Result<Option<String>> {
        let output = self
            .runner
            .run(&self.iptables, &["-L", CHAIN_NAME, "-n", "--line-numbers"])?;
        Ok(output.success.then_some(output.stdout))
    }

    fn block_one(&self, server: &Server) -> Result<BlockResult> {
        if self.is_blocked_sync(server)? {
            return Ok(BlockResult::AlreadyBlocked);
        }
        let ips = server.ip_addresses();
        if ips.is_empty() {
            warn!("{} has no relay addresses, skipping", server.display_name());
            return Ok(BlockResult::NoRelays);
        }

        let destinations = ips
            .iter()
            .map(|ip| ip.to_string())
            .collect::<Vec<_>>()
            .join(",");
        let comment = Self::comment_for(server);
        self.runner.run_checked(
            &self.iptables,
            &[
                "-A", CHAIN_NAME,
                "-d", &destinations,
                "-j", "DROP",
                "-m", "comment", "--comment", &comment,
            ],
        )?;
        debug!("Blocked {} ({} relays)", server.display_name(), ips.len());
        Ok(BlockResult::Added)
    }

    fn unblock_one(&self, server: &Server) -> Result<bool> {
        let Some(listing) = self.list_with_line_numbers()? else {
            return Ok(false);
        };
        let mut lines = matching_line_numbers(&listing, &Self::comment_for(server));
        if lines.is_empty() {
            return Ok(false);
        }

        // Delete bottom-up so earlier numbers stay valid
        lines.sort_unstable_by(|a, b| b.cmp(a));
        for line in lines {
            let line = line.to_string();
            self.runner
                .run_checked(&self.iptables, &["-D", CHAIN_NAME, &line])?;
        }
        debug!("Unblocked {}", server.display_name());
        Ok(true)
    }

    fn is_blocked_sync(&self, server: &Server) -> Result<bool> {
        Ok(self
            .list_with_line_numbers()?
            .map(|listing| !matching_line_numbers(&listing, &Self::comment_for(server)).is_empty())
            .unwrap_or(false))
    }
}

#[async_trait]
impl<E: CommandExecutor> FirewallBackend for IptablesBackend<E> {
    fn name(&self) -> &'static str {
        "iptables"
    }

    async fn is_server_blocked(&self, server: &Server) -> Result<bool> {
        self.is_blocked_sync(server)
    }

    async fn block_servers(&self, servers: &mut [Server]) -> Result<BatchOutcome> {
        self.ensure_chain()?;

        let mut outcome = BatchOutcome::default();
        for server in servers.iter_mut() {
            match self.block_one(server)? {
                BlockResult::Added => outcome.changed += 1,
                BlockResult::AlreadyBlocked => outcome.skipped += 1,
                BlockResult::NoRelays => {
                    outcome.skipped += 1;
                    continue;
                }
            }
            server.status = ServerStatus::Blocked;
        }
        info!(
            "iptables: blocked {} server(s), {} already blocked",
            outcome.changed, outcome.skipped
        );
        Ok(outcome)
    }

    async fn unblock_servers(&self, servers: &mut [Server]) -> Result<BatchOutcome> {
        let mut outcome = BatchOutcome::default();
        for server in servers.iter_mut() {
            if self.unblock_one(server)? {
                outcome.changed += 1;
            } else {
                outcome.skipped += 1;
            }
            server.status = ServerStatus::Available;
        }
        info!(
            "iptables: unblocked {} server(s), {} were not blocked",
            outcome.changed, outcome.skipped
        );
        Ok(outcome)
    }

    async fn blocked_servers(&self) -> Result<Vec<String>> {
        let output = self.runner.run(&self.iptables, &["-L", CHAIN_NAME, "-n", "-v"])?;
        if !output.success {
            return Ok(Vec::new());
        }
        Ok(parse_blocked_comments(&output.stdout))
    }

    async fn clear_all_rules(&self) -> Result<usize> {
        let count = self.blocked_servers().await?.len();
        self.runner.run_checked(&self.iptables, &["-F", CHAIN_NAME])?;
        info!("Flushed rules for {} server(s) from {}", count, CHAIN_NAME);
        Ok(count)
    }

    async fn reset(&self) -> Result<()> {
        self.runner.run(&self.iptables, &["-F", CHAIN_NAME])?;
        for parent in PARENT_CHAINS {
            self.runner.run(
                &self.iptables,
                &[
                    "-D", parent,
                    "-j", CHAIN_NAME,
                    "-m", "comment", "--comment", RULE_PREFIX,
                ],
            )?;
        }
        self.runner.run(&self.iptables, &["-X", CHAIN_NAME])?;
        info!("Removed iptables chain {}", CHAIN_NAME);
        Ok(())
    }

    async fn check_permissions(&self) -> Result<PermissionCheck> {
        let output = self.runner.run(&self.iptables, &["-L", "-n"])?;
        if output.success {
            return Ok(PermissionCheck {
                ok: true,
                message: "Firewall access OK".to_string(),
            });
        }
        Ok(permission_message(&output.stderr, self.runner.use_sudo()))
    }

    fn save_command(&self) -> String {
        pick_save_command(SAVE_COMMANDS, SAVE_FALLBACK, Path::exists)
    }
}

/// Line numbers of rules carrying exactly this comment.
///
/// iptables renders comments as `/* text */`; matching the delimiters keeps
/// `..._sto` from also matching `..._sto2`.
fn matching_line_numbers(listing: &str, comment: &str) -> Vec<u32> {
    let needle = format!("/* {} */", comment);
    listing
        .lines()
        .filter(|line| line.contains(&needle))
        .filter_map(|line| line.split_whitespace().next()?.parse().ok())
        .collect()
}

/// Decode server names from the `/* ... */` comments of a chain listing.
///
/// A multi-address `-d` becomes one rule per address, so names repeat;
/// each is kept once, in first-seen order.
fn parse_blocked_comments(listing: &str) -> Vec<String> {
    let prefix = format!("{}_", RULE_PREFIX);
    let mut seen = HashSet::new();
    listing
        .lines()
        .filter_map(|line| {
            let start = line.find("/* ")? + 3;
            let end = line[start..].find(" */")? + start;
            let comment = &line[start..end];
            comment.strip_prefix(&prefix).map(label_to_name)
        })
        .filter(|name| seen.insert(name.clone()))
        .collect()
}
