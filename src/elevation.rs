//! sudo credential handling.
//!
//! Mutating commands ask for the password once up front, then a background
//! task refreshes the sudo timestamp so long runs never prompt mid-way.

use crate::error::PickerError;
use anyhow::Result;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::debug;

pub const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(60);

pub fn is_root() -> bool {
    // SAFETY: geteuid has no preconditions and cannot fail.
    unsafe { libc::geteuid() == 0 }
}

/// Run `sudo -v` on the terminal so the user can enter their password.
pub async fn validate_sudo() -> Result<()> {
    let status = Command::new("sudo")
        .arg("-v")
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .status()
        .await
        .map_err(|e| PickerError::BinaryNotFound(format!("sudo: {}", e)))?;

    if !status.success() {
        return Err(PickerError::Permission(
            "sudo authentication failed. Run as root or pass --no-sudo if already privileged"
                .into(),
        )
        .into());
    }
    Ok(())
}

/// Ask for credentials only when sudo will actually be used.
pub async fn ensure_privileges(use_sudo: bool, dry_run: bool) -> Result<()> {
    if !use_sudo || dry_run || is_root() {
        return Ok(());
    }
    validate_sudo().await
}

/// Refreshes sudo credentials in the background until dropped.
pub struct SudoKeepalive {
    handle: JoinHandle<()>,
}

impl SudoKeepalive {
    pub fn start(interval: Duration) -> Self {
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // First tick completes immediately; credentials were just validated.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let refreshed = Command::new("sudo")
                    .args(["-n", "-v"])
                    .stdin(Stdio::null())
                    .stdout(Stdio::null())
                    .stderr(Stdio::null())
                    .status()
                    .await;
                match refreshed {
                    Ok(status) if status.success() => debug!("sudo credentials refreshed"),
                    Ok(status) => debug!("sudo refresh exited with {}", status),
                    Err(e) => debug!("sudo refresh failed: {}", e),
                }
            }
        });
        Self { handle }
    }
}

impl Drop for SudoKeepalive {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ensure_privileges_skips_without_sudo() {
        assert!(ensure_privileges(false, false).await.is_ok());
        assert!(ensure_privileges(true, true).await.is_ok());
    }

    #[tokio::test]
    async fn test_keepalive_aborts_on_drop() {
        let keepalive = SudoKeepalive::start(Duration::from_secs(3600));
        let handle_finished = {
            let h = &keepalive.handle;
            h.is_finished()
        };
        assert!(!handle_finished);
        drop(keepalive);
    }

    #[test]
    fn test_is_root_matches_libc() {
        assert_eq!(is_root(), unsafe { libc::geteuid() } == 0);
    }
}
