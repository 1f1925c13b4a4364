//! Firewall enforcement backends (iptables, nftables).
//!
//! Both backends are idempotent-by-check: before a rule is added or removed
//! the current ruleset is queried and matched by the rule comment.

mod iptables;
mod nftables;

use anyhow::Result;
use async_trait::async_trait;
use std::path::Path;

pub use iptables::IptablesBackend;
pub use nftables::NftablesBackend;

use crate::cmd_abstraction::binary_available;
use crate::config::Backend;
use crate::error::PickerError;
use crate::models::Server;

/// Counts from a batch block/unblock.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Servers whose rules were added or removed
    pub changed: usize,
    /// Servers that were already in the requested state
    pub skipped: usize,
}

/// Result of probing whether the firewall can be managed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionCheck {
    pub ok: bool,
    pub message: String,
}

/// How firewall commands are executed.
#[derive(Debug, Clone, Copy, Default)]
pub struct BackendOptions {
    pub use_sudo: bool,
    pub dry_run: bool,
}

/// Trait for firewall backends
#[async_trait]
pub trait FirewallBackend: Send + Sync {
    /// Short backend name ("iptables" or "nftables")
    fn name(&self) -> &'static str;

    /// Check whether a DROP rule for this server exists
    async fn is_server_blocked(&self, server: &Server) -> Result<bool>;

    /// Add DROP rules for every server not already blocked.
    /// Sets each server's status to blocked.
    async fn block_servers(&self, servers: &mut [Server]) -> Result<BatchOutcome>;

    /// Remove DROP rules for the given servers.
    /// Sets each server's status to available.
    async fn unblock_servers(&self, servers: &mut [Server]) -> Result<BatchOutcome>;

    /// Human-readable names of blocked servers, decoded from rule comments
    async fn blocked_servers(&self) -> Result<Vec<String>>;

    /// Remove every rule but keep the chains/table in place
    async fn clear_all_rules(&self) -> Result<usize>;

    /// Remove rules, chains and table entirely
    async fn reset(&self) -> Result<()>;

    /// Probe whether rules can be listed with the current privileges
    async fn check_permissions(&self) -> Result<PermissionCheck>;

    /// Shell command that persists the current rules across reboots
    fn save_command(&self) -> String;
}

/// Longest label placed in a rule comment. nft caps comments at 128 bytes
/// and the label follows a prefix.
pub const MAX_LABEL_LEN: usize = 120;

/// Longest server code kept in a label.
const MAX_CODE_LEN: usize = 40;

/// Label embedded in rule comments: `<name>_<code>` with parentheses dropped
/// and anything outside `[A-Za-z0-9_-]` turned into an underscore.
///
/// Names come from the relay API and end up inside a script run as root, so
/// nothing that could close the comment or start a new command survives.
pub fn rule_label(server: &Server) -> String {
    let mut code = sanitize_label(&server.code);
    code.truncate(MAX_CODE_LEN);
    let mut name = sanitize_label(&server.name);
    name.truncate(MAX_LABEL_LEN - 1 - code.len());
    format!("{}_{}", name, code)
}

/// Only ASCII survives, so byte truncation stays on a char boundary.
fn sanitize_label(raw: &str) -> String {
    raw.chars()
        .filter(|c| !matches!(c, '(' | ')'))
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Turn a rule label back into a readable name.
pub(crate) fn label_to_name(label: &str) -> String {
    label.replace('_', " ")
}

/// Detect available firewall backend
pub fn detect_backend() -> Result<Backend> {
    // nftables first (preferred)
    if binary_available("nft") {
        return Ok(Backend::Nftables);
    }

    if binary_available("iptables") {
        return Ok(Backend::Iptables);
    }

    Err(PickerError::BackendNotAvailable(
        "neither nft nor iptables was found".to_string(),
    )
    .into())
}

/// Create a firewall backend based on configuration
pub fn create_backend(backend: Backend, options: BackendOptions) -> Result<Box<dyn FirewallBackend>> {
    let actual_backend = match backend {
        Backend::Auto => detect_backend()?,
        other => other,
    };

    match actual_backend {
        Backend::Iptables => Ok(Box::new(IptablesBackend::new(options)?)),
        // Auto is resolved above; treat any leftover as nftables
        Backend::Nftables | Backend::Auto => Ok(Box::new(NftablesBackend::new(options)?)),
    }
}

/// Pick the first persistence command whose marker path exists.
pub(crate) fn pick_save_command(
    candidates: &[(&str, &str)],
    fallback: &str,
    exists: impl Fn(&Path) -> bool,
) -> String {
    candidates
        .iter()
        .find(|(path, _)| exists(Path::new(path)))
        .map(|(_, cmd)| cmd.to_string())
        .unwrap_or_else(|| fallback.to_string())
}

/// Message for a failed permission probe.
pub(crate) fn permission_message(stderr: &str, use_sudo: bool) -> PermissionCheck {
    let message = if stderr.contains("Permission denied") || stderr.contains("Operation not permitted") {
        if use_sudo {
            "Permission denied. Try running with sudo or as root.".to_string()
        } else {
            "Permission denied. Enable use_sudo or run as root.".to_string()
        }
    } else {
        format!("Unknown error: {}", stderr.trim())
    };
    PermissionCheck { ok: false, message }
}
