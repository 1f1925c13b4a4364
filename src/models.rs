//! Core data types: servers, relays and presets.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;

/// Server groups used in clustered mode.
///
/// A server joins the first cluster whose keyword appears in its name
/// (case-insensitive).
pub const DEFAULT_CLUSTERS: &[(&str, &[&str])] = &[
    ("China", &["Perfect", "Hong Kong", "Alibaba", "Tencent"]),
    ("Japan", &["Tokyo"]),
    ("Stockholm (Sweden)", &["Stockholm"]),
    ("India", &["Chennai", "Mumbai"]),
];

/// Reachability / firewall state of a server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerStatus {
    Available,
    Blocked,
    Timeout,
    #[default]
    Unknown,
}

impl ServerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServerStatus::Available => "available",
            ServerStatus::Blocked => "blocked",
            ServerStatus::Timeout => "timeout",
            ServerStatus::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A relay endpoint game traffic is routed through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relay {
    pub ipv4: Ipv4Addr,
    pub port_range: Option<(u16, u16)>,
}

impl fmt::Display for Relay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.ipv4)
    }
}

/// A game server location (a "pop") and its relays.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Server {
    pub name: String,
    pub code: String,
    pub relays: Vec<Relay>,
    pub latency_ms: Option<u32>,
    pub status: ServerStatus,
}

impl Server {
    pub fn new(name: impl Into<String>, code: impl Into<String>, relays: Vec<Relay>) -> Self {
        Self {
            name: name.into(),
            code: code.into(),
            relays,
            latency_ms: None,
            status: ServerStatus::Unknown,
        }
    }

    /// All relay IPs, in relay order.
    pub fn ip_addresses(&self) -> Vec<Ipv4Addr> {
        self.relays.iter().map(|r| r.ipv4).collect()
    }

    pub fn display_name(&self) -> String {
        format!("{} ({})", self.name, self.code)
    }
}

impl fmt::Display for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_name())?;
        if let Some(latency) = self.latency_ms {
            write!(f, " - {}ms", latency)?;
        }
        if self.status != ServerStatus::Unknown {
            write!(f, " [{}]", self.status)?;
        }
        Ok(())
    }
}

/// A saved selection of server codes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preset {
    #[serde(rename = "presetName")]
    pub name: String,
    pub servers: Vec<String>,
    #[serde(default)]
    pub clustered: bool,
}

impl fmt::Display for Preset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} servers)", self.name, self.servers.len())
    }
}

/// Code used for a cluster: lowercase, spaces to underscores, no parentheses.
pub fn cluster_code(cluster_name: &str) -> String {
    cluster_name
        .to_lowercase()
        .replace(' ', "_")
        .replace(['(', ')'], "")
}

/// Find the cluster a server name belongs to, if any.
pub fn cluster_for(server_name: &str) -> Option<&'static str> {
    let lower = server_name.to_lowercase();
    DEFAULT_CLUSTERS
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| lower.contains(&k.to_lowercase())))
        .map(|(name, _)| *name)
}
