//! HTTP fetcher for the relay configuration and the in-memory server table.

use anyhow::{Context, Result};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::net::Ipv4Addr;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::PickerError;
use crate::models::{cluster_code, cluster_for, Relay, Server};

/// Default relay configuration endpoint
pub const DEFAULT_API_URL: &str = "https://api.steampowered.com/ISteamApps/GetSDRConfig/v1/?appid=730";

const TIMEOUT_SECS: u64 = 30;
const USER_AGENT: &str = "deadlock-server-picker-linux/1.0";

/// Maximum accepted response size (10 MB). The real payload is well under 1 MB.
const MAX_RESPONSE_SIZE: usize = 10 * 1024 * 1024;

/// Servers keyed by lookup name, in insertion (API) order.
#[derive(Debug, Clone, Default)]
pub struct ServerMap {
    entries: Vec<(String, Server)>,
}

impl ServerMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the server stored under `key`
    pub fn insert(&mut self, key: impl Into<String>, server: Server) {
        let key = key.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = server,
            None => self.entries.push((key, server)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Server> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, s)| s)
    }

    fn get_mut(&mut self, key: &str) -> Option<&mut Server> {
        self.entries.iter_mut().find(|(k, _)| k == key).map(|(_, s)| s)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Server)> {
        self.entries.iter().map(|(k, s)| (k.as_str(), s))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn values(&self) -> impl Iterator<Item = &Server> {
        self.entries.iter().map(|(_, s)| s)
    }
}

/// Parsed relay configuration: one table per view.
#[derive(Debug, Clone, Default)]
pub struct ServerTable {
    pub revision: String,
    /// One entry per pop, keyed by pop code
    pub servers: ServerMap,
    /// Pops merged into clusters, plus unclustered pops keyed by display name
    pub clustered: ServerMap,
}

impl ServerTable {
    pub fn get_servers(&self, clustered: bool) -> &ServerMap {
        if clustered {
            &self.clustered
        } else {
            &self.servers
        }
    }

    /// Find a server by exact key, then by case-insensitive substring of
    /// name or key. The first match in table order wins.
    pub fn get_server_by_name(&self, query: &str, clustered: bool) -> Option<&Server> {
        let servers = self.get_servers(clustered);
        if let Some(server) = servers.get(query) {
            return Some(server);
        }

        let needle = query.to_lowercase();
        servers
            .iter()
            .find(|(key, server)| {
                server.name.to_lowercase().contains(&needle) || key.to_lowercase().contains(&needle)
            })
            .map(|(_, server)| server)
    }

    /// Resolve user-supplied names. Returns the found servers (cloned, without
    /// duplicates) and the names that matched nothing.
    pub fn resolve<S: AsRef<str>>(&self, names: &[S], clustered: bool) -> (Vec<Server>, Vec<String>) {
        let mut found: Vec<Server> = Vec::new();
        let mut missing = Vec::new();
        for name in names {
            match self.get_server_by_name(name.as_ref(), clustered) {
                Some(server) => {
                    if !found.iter().any(|s| s.code == server.code) {
                        found.push(server.clone());
                    }
                }
                None => missing.push(name.as_ref().to_string()),
            }
        }
        (found, missing)
    }
}

#[derive(Debug, Deserialize)]
struct PopEntry {
    desc: Option<String>,
    relays: Option<Vec<RelayEntry>>,
}

#[derive(Debug, Deserialize)]
struct RelayEntry {
    ipv4: Option<String>,
    port_range: Option<Value>,
}

/// HTTP client for the relay configuration endpoint
pub struct Fetcher {
    client: Client,
    api_url: String,
}

impl Fetcher {
    /// Create a new fetcher for the given endpoint
    pub fn new(api_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(TIMEOUT_SECS))
            .user_agent(USER_AGENT)
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            client,
            api_url: api_url.into(),
        })
    }

    /// Download and parse the relay configuration. No retries.
    pub async fn fetch(&self) -> Result<ServerTable> {
        info!("Fetching server list...");
        let body = self.fetch_body().await?;
        let data: Value = serde_json::from_str(&body)
            .map_err(|e| PickerError::Fetch(format!("Failed to parse server data: {}", e)))?;
        let table = parse_server_data(&data)?;
        info!(
            "Loaded {} servers (revision {})",
            table.servers.len(),
            table.revision
        );
        Ok(table)
    }

    async fn fetch_body(&self) -> Result<String> {
        let response = self
            .client
            .get(&self.api_url)
            .send()
            .await
            .map_err(|e| PickerError::Fetch(e.to_string()))?;

        if !response.status().is_success() {
            return Err(PickerError::Fetch(format!("HTTP {}", response.status())).into());
        }

        if let Some(content_length) = response.content_length() {
            if content_length as usize > MAX_RESPONSE_SIZE {
                return Err(PickerError::Fetch(format!(
                    "Response too large: {} bytes (max: {} bytes)",
                    content_length, MAX_RESPONSE_SIZE
                ))
                .into());
            }
        }

        let body = response
            .text()
            .await
            .map_err(|e| PickerError::Fetch(format!("Failed to read response body: {}", e)))?;

        // Content-Length can be absent with chunked encoding
        if body.len() > MAX_RESPONSE_SIZE {
            return Err(PickerError::Fetch(format!(
                "Downloaded content too large: {} bytes (max: {} bytes)",
                body.len(),
                MAX_RESPONSE_SIZE
            ))
            .into());
        }

        debug!("Downloaded {} bytes from {}", body.len(), self.api_url);
        Ok(body)
    }
}

/// Extract a non-empty revision string; numbers are stringified.
fn parse_revision(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) if n.as_f64() != Some(0.0) => Some(n.to_string()),
        _ => None,
    }
}

fn parse_port_range(value: Option<&Value>) -> Option<(u16, u16)> {
    let arr = value?.as_array()?;
    let low = u16::try_from(arr.first()?.as_u64()?).ok()?;
    let high = u16::try_from(arr.get(1)?.as_u64()?).ok()?;
    Some((low, high))
}

fn parse_relays(entries: &[RelayEntry]) -> Vec<Relay> {
    entries
        .iter()
        .filter_map(|entry| {
            let ipv4: Ipv4Addr = entry.ipv4.as_deref()?.trim().parse().ok()?;
            Some(Relay {
                ipv4,
                port_range: parse_port_range(entry.port_range.as_ref()),
            })
        })
        .collect()
}

/// Parse the relay configuration JSON into a [`ServerTable`].
pub fn parse_server_data(data: &Value) -> Result<ServerTable> {
    let revision = parse_revision(data.get("revision"))
        .ok_or_else(|| PickerError::Fetch("Server data missing revision field".to_string()))?;

    let empty = Map::new();
    let pops = data.get("pops").and_then(Value::as_object).unwrap_or(&empty);

    let mut table = ServerTable {
        revision,
        ..Default::default()
    };

    for (code, raw) in pops {
        let pop: PopEntry = match serde_json::from_value(raw.clone()) {
            Ok(pop) => pop,
            Err(e) => {
                debug!("Skipping malformed pop {}: {}", code, e);
                continue;
            }
        };
        let Some(relay_entries) = pop.relays.filter(|r| !r.is_empty()) else {
            continue;
        };
        let relays = parse_relays(&relay_entries);
        if relays.is_empty() {
            continue;
        }

        let name = pop.desc.unwrap_or_else(|| code.clone());
        let server = Server::new(name, code.clone(), relays);
        add_to_clusters(&mut table.clustered, &server);
        table.servers.insert(code.clone(), server);
    }

    Ok(table)
}

fn add_to_clusters(clustered: &mut ServerMap, server: &Server) {
    match cluster_for(&server.name) {
        Some(cluster) => match clustered.get_mut(cluster) {
            Some(existing) => existing.relays.extend(server.relays.iter().cloned()),
            None => clustered.insert(
                cluster,
                Server::new(cluster, cluster_code(cluster), server.relays.clone()),
            ),
        },
        None => clustered.insert(server.display_name(), server.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn sample() -> Value {
        json!({
            "revision": 1712345678,
            "pops": {
                "fra": {
                    "desc": "Frankfurt (Germany)",
                    "relays": [
                        {"ipv4": "155.133.226.71", "port_range": [27015, 27060]},
                        {"ipv4": "155.133.226.72", "port_range": [27015, 27060]}
                    ]
                },
                "tyo": {
                    "desc": "Tokyo (Japan)",
                    "relays": [{"ipv4": "45.121.184.1", "port_range": [27015, 27060]}]
                },
                "hkg": {
                    "desc": "Hong Kong",
                    "relays": [{"ipv4": "155.133.244.1"}]
                },
                "pwg": {
                    "desc": "Perfect World Guangdong",
                    "relays": [{"ipv4": "125.88.174.1"}]
                },
                "sto": {
                    "desc": "Stockholm - Kista",
                    "relays": [{"ipv4": "162.254.197.1"}]
                },
                "norelay": {"desc": "No Relays"},
                "empty": {"desc": "Empty", "relays": []},
                "v6only": {"desc": "Only IPv6", "relays": [{"ipv6": "::1"}]},
                "nodesc": {"relays": [{"ipv4": "10.0.0.1"}]}
            }
        })
    }

    #[test]
    fn test_parse_revision_variants() {
        assert_eq!(parse_revision(Some(&json!("abc"))), Some("abc".to_string()));
        assert_eq!(parse_revision(Some(&json!(42))), Some("42".to_string()));
        assert_eq!(parse_revision(Some(&json!(""))), None);
        assert_eq!(parse_revision(Some(&json!(0))), None);
        assert_eq!(parse_revision(Some(&Value::Null)), None);
        assert_eq!(parse_revision(None), None);
    }

    #[test]
    fn test_missing_revision_is_error() {
        let err = parse_server_data(&json!({"pops": {}})).unwrap_err();
        assert!(err.to_string().contains("missing revision"));
    }

    #[test]
    fn test_parse_skips_pops_without_ipv4_relays() {
        let table = parse_server_data(&sample()).unwrap();
        assert_eq!(table.revision, "1712345678");
        let codes: Vec<&str> = table.servers.keys().collect();
        assert_eq!(codes, vec!["fra", "tyo", "hkg", "pwg", "sto", "nodesc"]);
    }

    #[test]
    fn test_parse_relays_and_name_fallback() {
        let table = parse_server_data(&sample()).unwrap();
        let fra = table.servers.get("fra").unwrap();
        assert_eq!(fra.relays.len(), 2);
        assert_eq!(fra.relays[0].port_range, Some((27015, 27060)));
        assert_eq!(table.servers.get("hkg").unwrap().relays[0].port_range, None);
        assert_eq!(table.servers.get("nodesc").unwrap().name, "nodesc");
    }

    #[test]
    fn test_clustering_merges_relays() {
        let table = parse_server_data(&sample()).unwrap();
        let china = table.clustered.get("China").unwrap();
        assert_eq!(china.code, "china");
        assert_eq!(china.relays.len(), 2);

        let sweden = table.clustered.get("Stockholm (Sweden)").unwrap();
        assert_eq!(sweden.code, "stockholm_sweden");

        let fra = table.clustered.get("Frankfurt (Germany) (fra)").unwrap();
        assert_eq!(fra.code, "fra");
        assert!(table.clustered.get("Japan").is_some());
    }

    #[test]
    fn test_get_server_by_name_exact_then_substring() {
        let table = parse_server_data(&sample()).unwrap();
        assert_eq!(table.get_server_by_name("tyo", false).unwrap().code, "tyo");
        assert_eq!(table.get_server_by_name("frank", false).unwrap().code, "fra");
        assert_eq!(table.get_server_by_name("KONG", false).unwrap().code, "hkg");
        assert!(table.get_server_by_name("nowhere", false).is_none());
        assert_eq!(table.get_server_by_name("china", true).unwrap().name, "China");
    }

    #[test]
    fn test_resolve_dedups_and_reports_missing() {
        let table = parse_server_data(&sample()).unwrap();
        let (found, missing) = table.resolve(&["fra", "Frankfurt", "atlantis"], false);
        assert_eq!(found.len(), 1);
        assert_eq!(missing, vec!["atlantis"]);
    }

    #[test]
    fn test_server_map_insert_replaces() {
        let mut map = ServerMap::new();
        map.insert("a", Server::new("A", "a", vec![]));
        map.insert("a", Server::new("A2", "a", vec![]));
        assert_eq!(map.len(), 1);
        assert_eq!(map.get("a").unwrap().name, "A2");
    }

    #[tokio::test]
    async fn test_fetch_unreachable_endpoint_is_fetch_error() {
        let fetcher = Fetcher::new("http://127.0.0.1:9/sdr").unwrap();
        let err = fetcher.fetch().await.unwrap_err();
        assert!(err.downcast_ref::<PickerError>().is_some());
    }

    proptest! {
        #[test]
        fn prop_parse_never_panics(s in "\\PC{0,200}") {
            if let Ok(value) = serde_json::from_str::<Value>(&s) {
                let _ = parse_server_data(&value);
            }
        }
    }
}
