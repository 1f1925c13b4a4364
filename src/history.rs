//! Latency history, persisted as `latency_history.json`.
//!
//! Every ping run appends one record per server. Only the most recent
//! [`MAX_RECORDS_PER_SERVER`] records are kept.

use crate::error::PickerError;
use crate::utils::{read_json, write_json_atomic};
use anyhow::Result;
use chrono::Local;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tracing::warn;

pub const HISTORY_FILE_NAME: &str = "latency_history.json";
pub const MAX_RECORDS_PER_SERVER: usize = 100;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LatencyRecord {
    /// Local time, ISO 8601 without offset
    pub timestamp: String,
    pub latency_ms: Option<u32>,
    pub success: bool,
}

// Older files may omit `success`; derive it from the latency.
impl<'de> Deserialize<'de> for LatencyRecord {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct Raw {
            timestamp: String,
            #[serde(default)]
            latency_ms: Option<u32>,
            #[serde(default)]
            success: Option<bool>,
        }
        let raw = Raw::deserialize(deserializer)?;
        Ok(Self {
            success: raw.success.unwrap_or(raw.latency_ms.is_some()),
            timestamp: raw.timestamp,
            latency_ms: raw.latency_ms,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerHistory {
    #[serde(default)]
    pub server_code: String,
    #[serde(default)]
    pub records: Vec<LatencyRecord>,
}

impl ServerHistory {
    fn successful(&self) -> impl Iterator<Item = u32> + '_ {
        self.records
            .iter()
            .filter(|r| r.success)
            .filter_map(|r| r.latency_ms)
    }

    pub fn avg_latency(&self) -> Option<f64> {
        let (sum, n) = self
            .successful()
            .fold((0u64, 0u64), |(sum, n), ms| (sum + ms as u64, n + 1));
        (n > 0).then(|| sum as f64 / n as f64)
    }

    pub fn min_latency(&self) -> Option<u32> {
        self.successful().min()
    }

    pub fn max_latency(&self) -> Option<u32> {
        self.successful().max()
    }

    /// Fraction of successful probes in [0, 1]; 0 with no records.
    pub fn success_rate(&self) -> f64 {
        if self.records.is_empty() {
            return 0.0;
        }
        let ok = self.records.iter().filter(|r| r.success).count();
        ok as f64 / self.records.len() as f64
    }

    fn push(&mut self, record: LatencyRecord) {
        self.records.push(record);
        if self.records.len() > MAX_RECORDS_PER_SERVER {
            let excess = self.records.len() - MAX_RECORDS_PER_SERVER;
            self.records.drain(..excess);
        }
    }
}

/// Rounded statistics shown by `history show`.
#[derive(Debug, Clone, PartialEq)]
pub struct HistorySummary {
    pub server_code: String,
    pub measurements: usize,
    pub avg_latency: Option<f64>,
    pub min_latency: Option<u32>,
    pub max_latency: Option<u32>,
    /// Percent, one decimal
    pub success_rate: f64,
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

fn now_timestamp() -> String {
    Local::now()
        .naive_local()
        .format("%Y-%m-%dT%H:%M:%S%.6f")
        .to_string()
}

pub struct LatencyHistory {
    path: PathBuf,
    histories: BTreeMap<String, ServerHistory>,
    loaded: bool,
}

impl LatencyHistory {
    /// Nothing is read until the first access.
    pub fn open(config_dir: &Path) -> Self {
        Self {
            path: config_dir.join(HISTORY_FILE_NAME),
            histories: BTreeMap::new(),
            loaded: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn ensure_loaded(&mut self) {
        if self.loaded {
            return;
        }
        self.histories = match read_json::<BTreeMap<String, ServerHistory>>(&self.path) {
            Ok(Some(mut data)) => {
                for (code, history) in data.iter_mut() {
                    history.server_code = code.clone();
                }
                data
            }
            Ok(None) => BTreeMap::new(),
            Err(e) => {
                warn!("{:#}; starting with empty latency history", e);
                BTreeMap::new()
            }
        };
        self.loaded = true;
    }

    fn save(&self) -> Result<()> {
        write_json_atomic(&self.path, &self.histories)
            .map_err(|e| PickerError::History(format!("Failed to save history: {:#}", e)).into())
    }

    fn append(&mut self, code: &str, latency_ms: Option<u32>, timestamp: &str) {
        self.histories
            .entry(code.to_string())
            .or_insert_with(|| ServerHistory {
                server_code: code.to_string(),
                records: Vec::new(),
            })
            .push(LatencyRecord {
                timestamp: timestamp.to_string(),
                latency_ms,
                success: latency_ms.is_some(),
            });
    }

    pub fn record(&mut self, code: &str, latency_ms: Option<u32>) -> Result<()> {
        self.ensure_loaded();
        self.append(code, latency_ms, &now_timestamp());
        self.save()
    }

    /// Record a whole ping run under one shared timestamp.
    pub fn record_batch(&mut self, results: &HashMap<String, Option<u32>>) -> Result<()> {
        self.ensure_loaded();
        let timestamp = now_timestamp();
        let mut codes: Vec<_> = results.iter().collect();
        codes.sort_by(|a, b| a.0.cmp(b.0));
        for (code, latency) in codes {
            self.append(code, *latency, &timestamp);
        }
        self.save()
    }

    pub fn get(&mut self, code: &str) -> Option<&ServerHistory> {
        self.ensure_loaded();
        self.histories.get(code)
    }

    pub fn all(&mut self) -> &BTreeMap<String, ServerHistory> {
        self.ensure_loaded();
        &self.histories
    }

    pub fn summary(&mut self, code: &str) -> Option<HistorySummary> {
        let history = self.get(code)?;
        if history.records.is_empty() {
            return None;
        }
        Some(HistorySummary {
            server_code: code.to_string(),
            measurements: history.records.len(),
            avg_latency: history.avg_latency().map(round1),
            min_latency: history.min_latency(),
            max_latency: history.max_latency(),
            success_rate: round1(history.success_rate() * 100.0),
        })
    }

    /// The `count` servers with the lowest average latency.
    pub fn best_servers(&mut self, count: usize) -> Vec<(String, f64)> {
        self.ensure_loaded();
        let mut ranked: Vec<(String, f64)> = self
            .histories
            .iter()
            .filter_map(|(code, h)| h.avg_latency().map(|avg| (code.clone(), avg)))
            .collect();
        ranked.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        ranked.truncate(count);
        ranked
    }

    /// Clear one server's history, or everything when `code` is `None`.
    pub fn clear(&mut self, code: Option<&str>) -> Result<()> {
        self.ensure_loaded();
        match code {
            Some(code) => {
                self.histories.remove(code);
            }
            None => self.histories.clear(),
        }
        self.save()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn record(latency_ms: Option<u32>) -> LatencyRecord {
        LatencyRecord {
            timestamp: "2024-01-01T00:00:00.000000".into(),
            latency_ms,
            success: latency_ms.is_some(),
        }
    }

    #[test]
    fn test_server_history_stats() {
        let history = ServerHistory {
            server_code: "sto".into(),
            records: vec![record(Some(10)), record(None), record(Some(30)), record(Some(20))],
        };
        assert_eq!(history.avg_latency(), Some(20.0));
        assert_eq!(history.min_latency(), Some(10));
        assert_eq!(history.max_latency(), Some(30));
        assert_eq!(history.success_rate(), 0.75);
    }

    #[test]
    fn test_empty_history_stats() {
        let history = ServerHistory::default();
        assert_eq!(history.avg_latency(), None);
        assert_eq!(history.min_latency(), None);
        assert_eq!(history.success_rate(), 0.0);
    }

    #[test]
    fn test_record_caps_and_drops_oldest() {
        let dir = TempDir::new().unwrap();
        let mut history = LatencyHistory::open(dir.path());
        for ms in 0..(MAX_RECORDS_PER_SERVER as u32 + 5) {
            history.append("sto", Some(ms), "t");
        }
        let sto = history.get("sto").unwrap();
        assert_eq!(sto.records.len(), MAX_RECORDS_PER_SERVER);
        assert_eq!(sto.records[0].latency_ms, Some(5));
    }

    #[test]
    fn test_record_batch_shares_timestamp_and_persists() {
        let dir = TempDir::new().unwrap();
        let mut history = LatencyHistory::open(dir.path());
        let mut results = HashMap::new();
        results.insert("sto".to_string(), Some(25));
        results.insert("fra".to_string(), None);
        history.record_batch(&results).unwrap();

        let mut reopened = LatencyHistory::open(dir.path());
        let sto = reopened.get("sto").unwrap().records[0].clone();
        let fra = reopened.get("fra").unwrap().records[0].clone();
        assert_eq!(sto.timestamp, fra.timestamp);
        assert!(sto.success);
        assert!(!fra.success);
        assert_eq!(fra.latency_ms, None);
    }

    #[test]
    fn test_summary_rounding() {
        let dir = TempDir::new().unwrap();
        let mut history = LatencyHistory::open(dir.path());
        history.record("sto", Some(10)).unwrap();
        history.record("sto", Some(11)).unwrap();
        history.record("sto", Some(11)).unwrap();
        history.record("sto", None).unwrap();

        let summary = history.summary("sto").unwrap();
        assert_eq!(summary.measurements, 4);
        assert_eq!(summary.avg_latency, Some(10.7));
        assert_eq!(summary.min_latency, Some(10));
        assert_eq!(summary.max_latency, Some(11));
        assert_eq!(summary.success_rate, 75.0);
        assert!(history.summary("nope").is_none());
    }

    #[test]
    fn test_best_servers() {
        let dir = TempDir::new().unwrap();
        let mut history = LatencyHistory::open(dir.path());
        history.append("sto", Some(40), "t");
        history.append("fra", Some(20), "t");
        history.append("ams", Some(30), "t");
        history.append("dead", None, "t");

        let best = history.best_servers(2);
        assert_eq!(
            best,
            vec![("fra".to_string(), 20.0), ("ams".to_string(), 30.0)]
        );
    }

    #[test]
    fn test_clear_one_and_all() {
        let dir = TempDir::new().unwrap();
        let mut history = LatencyHistory::open(dir.path());
        history.record("sto", Some(1)).unwrap();
        history.record("fra", Some(2)).unwrap();

        history.clear(Some("sto")).unwrap();
        assert!(history.get("sto").is_none());
        assert!(history.get("fra").is_some());

        history.clear(None).unwrap();
        assert!(LatencyHistory::open(dir.path()).all().is_empty());
    }

    #[test]
    fn test_corrupt_file_yields_empty_history() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(HISTORY_FILE_NAME), "{{{").unwrap();
        let mut history = LatencyHistory::open(dir.path());
        assert!(history.all().is_empty());
    }

    #[test]
    fn test_loads_records_without_success_field() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join(HISTORY_FILE_NAME),
            r#"{"sto": {"records": [
                {"timestamp": "2024-01-01T00:00:00", "latency_ms": 12},
                {"timestamp": "2024-01-01T00:01:00", "latency_ms": null}
            ]}}"#,
        )
        .unwrap();
        let mut history = LatencyHistory::open(dir.path());
        let sto = history.get("sto").unwrap();
        assert_eq!(sto.server_code, "sto");
        assert!(sto.records[0].success);
        assert!(!sto.records[1].success);
    }
}
