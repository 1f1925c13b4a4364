//! # sdrpick - Deadlock Server Picker
//!
//! Chooses which game relay servers matchmaking may use by adding
//! firewall rules that drop outbound traffic to unwanted relays.
//!
//! ## Features
//!
//! - **Two backends** - iptables (one commented rule per relay IP) or
//!   nftables (a dedicated table with one counted rule per server)
//! - **Idempotent** - blocking a blocked server or unblocking a free one is a no-op
//! - **Regions and presets** - named server groups, saved to JSON
//! - **Latency** - concurrent probes with ICMP, TCP and UDP fallbacks, plus
//!   a bounded per-server history
//! - **Safe rule ownership** - only rules carrying the tool's marker are
//!   ever listed or removed
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        sdrpick                              │
//! ├─────────────────────────────────────────────────────────────┤
//! │  CLI (clap)                                                 │
//! │    └── Commands: list, block, ping, preset, region...      │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Config / Presets / History (serde_json, atomic writes)     │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Fetcher (reqwest + rustls)                                 │
//! │    └── Relay table with unclustered and clustered views    │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Ping (tokio, bounded concurrency)                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Enforcer (FirewallBackend trait)                           │
//! │    ├── IptablesBackend                                      │
//! │    └── NftablesBackend                                      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example Usage
//!
//! ```no_run
//! use sdrpick::config::Backend;
//! use sdrpick::enforcer::{create_backend, BackendOptions};
//! use sdrpick::fetcher::{Fetcher, DEFAULT_API_URL};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let table = Fetcher::new(DEFAULT_API_URL)?.fetch().await?;
//!     let (mut servers, _missing) = table.resolve(&["sgp", "tyo"], false);
//!
//!     let options = BackendOptions { use_sudo: true, dry_run: true };
//!     let backend = create_backend(Backend::Auto, options)?;
//!     backend.block_servers(&mut servers).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`cli`] - Command-line interface definitions
//! - [`cmd_abstraction`] - Subprocess execution behind a mockable trait
//! - [`commands`] - CLI command implementations
//! - [`config`] - User settings (`config.json`)
//! - [`elevation`] - Root detection and sudo credential keepalive
//! - [`enforcer`] - Firewall backend abstraction (iptables, nftables)
//! - [`error`] - Typed error kinds
//! - [`fetcher`] - Relay configuration download and parsing
//! - [`history`] - Latency history persistence
//! - [`lock`] - Single-instance lock for rule changes
//! - [`models`] - Servers, relays and presets
//! - [`ping`] - Latency measurement
//! - [`presets`] - Named server lists (`presets.json`)
//! - [`regions`] - Built-in region table
//! - [`signal`] - Graceful shutdown signal handling
//! - [`utils`] - JSON persistence and formatting helpers
//! - [`validation`] - Input parsing for names and config values

pub mod cli;
pub mod cmd_abstraction;
pub mod commands;
pub mod config;
pub mod elevation;
pub mod enforcer;
pub mod error;
pub mod fetcher;
pub mod history;
pub mod lock;
pub mod models;
pub mod ping;
pub mod presets;
pub mod regions;
pub mod signal;
pub mod utils;
pub mod validation;

pub use cli::{Cli, Commands, ConfigAction, HistoryAction, PresetAction};
pub use config::Config;
pub use error::PickerError;
