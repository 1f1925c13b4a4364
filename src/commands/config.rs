//! Config command implementation.

use anyhow::Result;

use crate::cli::ConfigAction;
use crate::config::{Config, ConfigManager};

fn or_placeholder(value: String, placeholder: &str) -> String {
    if value.is_empty() {
        placeholder.to_string()
    } else {
        value
    }
}

pub fn show(config: &Config, manager: &ConfigManager) {
    println!("Current Configuration:");
    println!("{}", "-".repeat(40));
    println!(
        "  default_region:     {}",
        config.default_region.as_deref().unwrap_or("(not set)")
    );
    println!("  auto_reset_on_exit: {}", config.auto_reset_on_exit);
    println!("  ping_timeout:       {}s", config.ping_timeout);
    println!("  clustered:          {}", config.clustered);
    println!("  use_sudo:           {}", config.use_sudo);
    println!("  firewall_backend:   {}", config.firewall_backend);
    println!(
        "  favorites:          {}",
        or_placeholder(config.favorites.join(", "), "(none)")
    );
    println!(
        "  always_block:       {}",
        or_placeholder(config.always_block.join(", "), "(none)")
    );
    println!(
        "  never_block:        {}",
        or_placeholder(config.never_block.join(", "), "(none)")
    );
    println!("  api_url:            {}", config.api_url);
    println!("\nConfig file: {}", manager.path().display());
}

pub fn run(manager: &mut ConfigManager, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let config = manager.load().clone();
            show(&config, manager);
        }
        ConfigAction::Set { key, value } => {
            let stored = manager.set(&key, &value)?;
            println!("Set {} = {}", key, stored);
        }
        ConfigAction::Reset => {
            manager.reset()?;
            println!("Configuration reset to defaults");
        }
        ConfigAction::Path => println!("{}", manager.path().display()),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_set_then_reset() {
        let dir = TempDir::new().unwrap();
        let mut manager = ConfigManager::new(dir.path());
        run(
            &mut manager,
            ConfigAction::Set {
                key: "never_block".into(),
                value: "sto,fra".into(),
            },
        )
        .unwrap();
        assert_eq!(manager.load().never_block.len(), 2);

        run(&mut manager, ConfigAction::Reset).unwrap();
        assert!(manager.load().never_block.is_empty());
    }

    #[test]
    fn test_set_unknown_key_fails() {
        let dir = TempDir::new().unwrap();
        let mut manager = ConfigManager::new(dir.path());
        let result = run(
            &mut manager,
            ConfigAction::Set {
                key: "bogus".into(),
                value: "1".into(),
            },
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_show_and_path_do_not_write() {
        let dir = TempDir::new().unwrap();
        let mut manager = ConfigManager::new(dir.path());
        run(&mut manager, ConfigAction::Show).unwrap();
        run(&mut manager, ConfigAction::Path).unwrap();
        assert!(!manager.path().exists());
    }

    #[test]
    fn test_or_placeholder() {
        assert_eq!(or_placeholder(String::new(), "(none)"), "(none)");
        assert_eq!(or_placeholder("a, b".into(), "(none)"), "a, b");
    }
}
