//! nftables backend implementation.
//!
//! Rules live in `table inet deadlock_server_picker` with two base chains,
//! `block` (hook output) and `forward_block` (hook forward). Every relay IP
//! gets one drop rule per chain, tagged `comment "dsp_<label>"`. Mutations
//! are sent as a single script on `nft -f -` so a batch applies atomically.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info, warn};

use super::{
    label_to_name, permission_message, pick_save_command, rule_label, BackendOptions,
    BatchOutcome, FirewallBackend, PermissionCheck,
};
use crate::cmd_abstraction::{find_binary, CommandExecutor, CommandRunner, RealCommandExecutor};
use crate::models::{Server, ServerStatus};

const TABLE_FAMILY: &str = "inet";
const TABLE_NAME: &str = "deadlock_server_picker";
const CHAIN_OUTPUT: &str = "block";
const CHAIN_FORWARD: &str = "forward_block";
const COMMENT_PREFIX: &str = "dsp_";
const NFT_FALLBACKS: &[&str] = &["/sbin/nft", "/usr/sbin/nft"];

const SAVE_COMMANDS: &[(&str, &str)] = &[
    (
        "/etc/nftables.conf",
        "sudo nft list ruleset | sudo tee /etc/nftables.conf",
    ),
    (
        "/etc/sysconfig/nftables.conf",
        "sudo nft list ruleset | sudo tee /etc/sysconfig/nftables.conf",
    ),
];
const SAVE_FALLBACK: &str = "sudo nft list ruleset > /path/to/rules.backup";

/// nftables backend
pub struct NftablesBackend<E: CommandExecutor = RealCommandExecutor> {
    runner: CommandRunner<E>,
    nft: String,
    /// Comments currently present in the table; cleared on every mutation
    cache: Mutex<Option<HashSet<String>>>,
}

impl NftablesBackend<RealCommandExecutor> {
    pub fn new(options: BackendOptions) -> Result<Self> {
        let path = find_binary("nft", NFT_FALLBACKS)?;
        Ok(Self::with_executor(
            RealCommandExecutor::new(),
            path.to_string_lossy().to_string(),
            options,
        ))
    }
}

impl<E: CommandExecutor> NftablesBackend<E> {
    pub fn with_executor(executor: E, nft: impl Into<String>, options: BackendOptions) -> Self {
        Self {
            runner: CommandRunner::new(executor, options.use_sudo, options.dry_run),
            nft: nft.into(),
            cache: Mutex::new(None),
        }
    }

    fn comment_for(server: &Server) -> String {
        format!("{}{}", COMMENT_PREFIX, rule_label(server))
    }

    fn invalidate_cache(&self) {
        if let Ok(mut cache) = self.cache.lock() {
            *cache = None;
        }
    }

    /// Generate the script that creates the table and both chains (idempotent)
    fn generate_setup_script(&self) -> String {
        let mut script = String::new();
        script.push_str(&format!("add table {} {}\n", TABLE_FAMILY, TABLE_NAME));
        for (chain, hook) in [(CHAIN_OUTPUT, "output"), (CHAIN_FORWARD, "forward")] {
            script.push_str(&format!(
                "add chain {} {} {} {{ type filter hook {} priority 0; policy accept; }}\n",
                TABLE_FAMILY, TABLE_NAME, chain, hook
            ));
        }
        script
    }

    fn exec_nft_script(&self, script: &str) -> Result<()> {
        debug!("Executing nft script:\n{}", script);
        self.runner
            .run_checked_with_stdin(&self.nft, &["-f", "-"], script)?;
        Ok(())
    }

    fn ensure_table(&self) -> Result<()> {
        self.exec_nft_script(&self.generate_setup_script())
    }

    /// Comments of all rules in our table (cached)
    fn blocked_comments(&self) -> Result<HashSet<String>> {
        if let Ok(cache) = self.cache.lock() {
            if let Some(ref comments) = *cache {
                return Ok(comments.clone());
            }
        }

        let output = self
            .runner
            .run(&self.nft, &["list", "table", TABLE_FAMILY, TABLE_NAME])?;
        let comments = if output.success {
            parse_comments(&output.stdout)
        } else {
            HashSet::new()
        };

        if let Ok(mut cache) = self.cache.lock() {
            *cache = Some(comments.clone());
        }
        Ok(comments)
    }

    /// Script with one drop rule per relay IP in each chain
    fn generate_block_script(&self, servers: &[&Server]) -> String {
        let mut script = String::new();
        for server in servers {
            let comment = Self::comment_for(server);
            for ip in server.ip_addresses() {
                for chain in [CHAIN_OUTPUT, CHAIN_FORWARD] {
                    script.push_str(&format!(
                        "add rule {} {} {} ip daddr {} drop comment \"{}\"\n",
                        TABLE_FAMILY, TABLE_NAME, chain, ip, comment
                    ));
                }
            }
        }
        script
    }

    fn generate_delete_script(&self, handles: &[RuleHandle]) -> String {
        handles
            .iter()
            .map(|h| {
                format!(
                    "delete rule {} {} {} handle {}\n",
                    TABLE_FAMILY, TABLE_NAME, h.chain, h.handle
                )
            })
            .collect()
    }
}

#[async_trait]
impl<E: CommandExecutor> FirewallBackend for NftablesBackend<E> {
    fn name(&self) -> &'static str {
        "nftables"
    }

    async fn is_server_blocked(&self, server: &Server) -> Result<bool> {
        Ok(self.blocked_comments()?.contains(&Self::comment_for(server)))
    }

    async fn block_servers(&self, servers: &mut [Server]) -> Result<BatchOutcome> {
        self.ensure_table()?;
        let existing = self.blocked_comments()?;

        let mut outcome = BatchOutcome::default();
        let mut to_block: Vec<&Server> = Vec::new();
        let mut unreachable: HashSet<String> = HashSet::new();
        for server in servers.iter() {
            if existing.contains(&Self::comment_for(server)) {
                outcome.skipped += 1;
            } else if server.relays.is_empty() {
                warn!("{} has no relay addresses, skipping", server.display_name());
                unreachable.insert(server.code.clone());
                outcome.skipped += 1;
            } else {
                to_block.push(server);
            }
        }

        if !to_block.is_empty() {
            let script = self.generate_block_script(&to_block);
            let result = self.exec_nft_script(&script);
            self.invalidate_cache();
            result?;
            outcome.changed = to_block.len();
        }

        for server in servers.iter_mut().filter(|s| !unreachable.contains(&s.code)) {
            server.status = ServerStatus::Blocked;
        }
        info!(
            "nftables: blocked {} server(s), {} already blocked",
            outcome.changed, outcome.skipped
        );
        Ok(outcome)
    }

    async fn unblock_servers(&self, servers: &mut [Server]) -> Result<BatchOutcome> {
        let mut outcome = BatchOutcome::default();
        let listing = self
            .runner
            .run(&self.nft, &["-a", "list", "table", TABLE_FAMILY, TABLE_NAME])?;

        if !listing.success {
            outcome.skipped = servers.len();
        } else {
            let wanted: HashSet<String> = servers.iter().map(Self::comment_for).collect();
            let handles = parse_rule_handles(&listing.stdout, &wanted);

            let mut by_comment: HashMap<&str, usize> = HashMap::new();
            for h in &handles {
                *by_comment.entry(h.comment.as_str()).or_default() += 1;
            }
            for server in servers.iter() {
                if by_comment.contains_key(Self::comment_for(server).as_str()) {
                    outcome.changed += 1;
                } else {
                    outcome.skipped += 1;
                }
            }

            if !handles.is_empty() {
                let script = self.generate_delete_script(&handles);
                let result = self.exec_nft_script(&script);
                self.invalidate_cache();
                result?;
            }
        }

        for server in servers.iter_mut() {
            server.status = ServerStatus::Available;
        }
        info!(
            "nftables: unblocked {} server(s), {} were not blocked",
            outcome.changed, outcome.skipped
        );
        Ok(outcome)
    }

    async fn blocked_servers(&self) -> Result<Vec<String>> {
        let names: BTreeSet<String> = self
            .blocked_comments()?
            .iter()
            .filter_map(|c| c.strip_prefix(COMMENT_PREFIX))
            .map(label_to_name)
            .collect();
        Ok(names.into_iter().collect())
    }

    async fn clear_all_rules(&self) -> Result<usize> {
        let count = self.blocked_comments()?.len();
        let script = [CHAIN_OUTPUT, CHAIN_FORWARD]
            .iter()
            .map(|chain| format!("flush chain {} {} {}\n", TABLE_FAMILY, TABLE_NAME, chain))
            .collect::<String>();
        let output = self.runner.run_with_stdin(&self.nft, &["-f", "-"], &script)?;
        self.invalidate_cache();
        if !output.success {
            return Ok(0);
        }
        info!("Flushed {} rule group(s) from table {}", count, TABLE_NAME);
        Ok(count)
    }

    async fn reset(&self) -> Result<()> {
        let output = self
            .runner
            .run(&self.nft, &["delete", "table", TABLE_FAMILY, TABLE_NAME])?;
        self.invalidate_cache();
        if output.success {
            info!("Removed nftables table {} {}", TABLE_FAMILY, TABLE_NAME);
        } else {
            debug!("Table {} not present: {}", TABLE_NAME, output.stderr.trim());
        }
        Ok(())
    }

    async fn check_permissions(&self) -> Result<PermissionCheck> {
        let output = self.runner.run(&self.nft, &["list", "tables"])?;
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

/// A rule located in `nft -a list table` output
#[derive(Debug, Clone, PartialEq, Eq)]
struct RuleHandle {
    chain: String,
    handle: u64,
    comment: String,
}

/// Extract the text of a `comment "..."` clause
fn extract_comment(line: &str) -> Option<&str> {
    let start = line.find("comment \"")? + "comment \"".len();
    let end = line[start..].find('"')? + start;
    Some(&line[start..end])
}

/// Extract the number following `# handle`
fn extract_handle(line: &str) -> Option<u64> {
    let idx = line.find("# handle ")?;
    line[idx + "# handle ".len()..]
        .split_whitespace()
        .next()?
        .parse()
        .ok()
}

/// All `dsp_` comments in a table listing
fn parse_comments(listing: &str) -> HashSet<String> {
    listing
        .lines()
        .filter_map(extract_comment)
        .filter(|c| c.starts_with(COMMENT_PREFIX))
        .map(str::to_string)
        .collect()
}

/// Handles of rules whose comment is in `wanted`, with the chain they sit in
fn parse_rule_handles(listing: &str, wanted: &HashSet<String>) -> Vec<RuleHandle> {
    let mut current_chain: Option<String> = None;
    let mut handles = Vec::new();

    for line in listing.lines() {
        let trimmed = line.trim();
        if let Some(rest) = trimmed.strip_prefix("chain ") {
            current_chain = rest.split_whitespace().next().map(str::to_string);
            continue;
        }
        let (Some(chain), Some(comment)) = (current_chain.as_ref(), extract_comment(trimmed)) else {
            continue;
        };
        if !wanted.contains(comment) {
            continue;
        }
        if let Some(handle) = extract_handle(trimmed) {
            handles.push(RuleHandle {
                chain: chain.clone(),
                handle,
                comment: comment.to_string(),
            });
        }
    }

    handles
}
