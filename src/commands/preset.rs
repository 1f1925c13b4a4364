//! Preset management commands.

use anyhow::Result;
use std::path::Path;
use tracing::debug;

use super::block::block_except;
use super::{resolve_reporting, Context};
use crate::cli::PresetAction;
use crate::enforcer::{BatchOutcome, FirewallBackend};
use crate::error::PickerError;
use crate::fetcher::ServerTable;
use crate::models::Server;
use crate::presets::PresetStore;

const LIST_PREVIEW: usize = 5;

pub fn list(store: &PresetStore, clustered: bool) -> usize {
    // The clustered view shows only clustered presets; otherwise show all
    let presets = store.list(clustered.then_some(true));
    if presets.is_empty() {
        println!("No presets found.");
        return 0;
    }

    println!("Saved Presets:");
    println!("{}", "-".repeat(50));
    for preset in &presets {
        let mode = if preset.clustered {
            "clustered"
        } else {
            "unclustered"
        };
        println!("  {} ({} servers, {})", preset.name, preset.servers.len(), mode);
        for server in preset.servers.iter().take(LIST_PREVIEW) {
            println!("    - {}", server);
        }
        if preset.servers.len() > LIST_PREVIEW {
            println!("    ... and {} more", preset.servers.len() - LIST_PREVIEW);
        }
    }
    presets.len()
}

/// Create a preset from server names, storing the resolved codes.
pub fn create(
    store: &mut PresetStore,
    table: &ServerTable,
    name: &str,
    servers: &[String],
    clustered: bool,
) -> Result<()> {
    let codes: Vec<String> = resolve_reporting(table, servers, clustered)
        .into_iter()
        .map(|s| s.code)
        .collect();
    if codes.is_empty() {
        anyhow::bail!("No valid servers for preset.");
    }
    let preset = store.add(name, codes, clustered)?;
    println!(
        "Created preset '{}' with {} servers",
        preset.name,
        preset.servers.len()
    );
    Ok(())
}

pub fn delete(store: &mut PresetStore, name: &str) -> Result<()> {
    if !store.delete(name)? {
        return Err(PickerError::Preset(format!("Preset '{}' not found", name)).into());
    }
    println!("Deleted preset '{}'", name);
    Ok(())
}

/// Unblock the preset's servers, or with `block_others` allow only them.
pub async fn apply(
    store: &PresetStore,
    table: &ServerTable,
    firewall: &dyn FirewallBackend,
    name: &str,
    block_others: bool,
    clustered: bool,
) -> Result<BatchOutcome> {
    let preset = store
        .get(name)
        .ok_or_else(|| PickerError::Preset(format!("Preset '{}' not found", name)))?;

    let (mut servers, missing): (Vec<Server>, _) = table.resolve(&preset.servers, clustered);
    for code in missing {
        debug!("Preset server {} is no longer in the relay list", code);
    }

    if block_others {
        let codes: Vec<String> = servers.iter().map(|s| s.code.clone()).collect();
        return block_except(table, firewall, &codes, clustered).await;
    }

    let outcome = firewall.unblock_servers(&mut servers).await?;
    println!(
        "Unblocked {} server(s) from preset '{}'",
        outcome.changed, name
    );
    Ok(outcome)
}

pub fn export(store: &PresetStore, path: &Path) -> Result<()> {
    store.export(path)?;
    println!("Exported {} preset(s) to {}", store.len(), path.display());
    Ok(())
}

pub fn import(store: &mut PresetStore, path: &Path, overwrite: bool) -> Result<usize> {
    let count = store.import(path, overwrite)?;
    println!("Imported {} preset(s) from {}", count, path.display());
    Ok(count)
}

pub fn clear(store: &mut PresetStore) -> Result<usize> {
    let count = store.clear_all()?;
    println!("Deleted {} preset(s)", count);
    Ok(count)
}

pub async fn run(ctx: &Context, action: PresetAction) -> Result<()> {
    let mut store = PresetStore::open(&ctx.config_dir)?;
    match action {
        PresetAction::List => {
            list(&store, ctx.clustered);
            Ok(())
        }
        PresetAction::Create { name, servers } => {
            let table = ctx.load_servers().await?;
            create(&mut store, &table, &name, &servers, ctx.clustered)
        }
        PresetAction::Delete { name } => delete(&mut store, &name),
        PresetAction::Apply { name, block_others } => {
            // Fail on an unknown preset before touching the network
            if store.get(&name).is_none() {
                return Err(PickerError::Preset(format!("Preset '{}' not found", name)).into());
            }
            let _guard = ctx.begin_mutation().await?;
            let table = ctx.load_servers().await?;
            let firewall = ctx.firewall()?;
            apply(&store, &table, firewall.as_ref(), &name, block_others, ctx.clustered).await?;
            Ok(())
        }
        PresetAction::Export { path } => export(&store, &path),
        PresetAction::Import { path, overwrite } => {
            import(&mut store, &path, overwrite)?;
            Ok(())
        }
        PresetAction::Clear => {
            clear(&mut store)?;
            Ok(())
        }
    }
}
