//! Command execution abstraction for testability.
//!
//! Firewall backends never spawn processes directly. They go through a
//! [`CommandRunner`], which wraps a [`CommandExecutor`] and adds the `sudo`
//! prefix and dry-run handling. Unit tests swap in `MockCommandExecutor`.

use anyhow::Result;
use std::env;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::{debug, info};

#[cfg(test)]
use mockall::automock;

use crate::error::PickerError;

/// stderr text iptables prints when the rule or chain is already gone.
pub const MISSING_TARGET_MARKER: &str = "No chain/target/match by that name";

/// Output from command execution
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    /// Standard output from the command
    pub stdout: String,
    /// Standard error from the command
    pub stderr: String,
    /// Whether the command succeeded (exit code 0)
    pub success: bool,
    /// The exit code, if available
    pub code: Option<i32>,
}

impl CommandOutput {
    /// Output returned for commands skipped in dry-run mode.
    pub fn dry_run() -> Self {
        Self {
            success: true,
            code: Some(0),
            ..Default::default()
        }
    }
}

/// Trait for command execution, allowing dependency injection for testing.
#[cfg_attr(test, automock)]
pub trait CommandExecutor: Send + Sync {
    /// Execute a command with the given arguments.
    fn execute(&self, cmd: &str, args: &[String]) -> Result<CommandOutput>;

    /// Execute a command, writing `stdin` to its standard input.
    fn execute_with_stdin(&self, cmd: &str, args: &[String], stdin: &str) -> Result<CommandOutput>;
}

/// Real implementation of CommandExecutor that runs actual system commands.
#[derive(Debug, Clone, Default)]
pub struct RealCommandExecutor;

impl RealCommandExecutor {
    pub fn new() -> Self {
        Self
    }
}

impl CommandExecutor for RealCommandExecutor {
    fn execute(&self, cmd: &str, args: &[String]) -> Result<CommandOutput> {
        let output = Command::new(cmd)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| PickerError::BinaryNotFound(format!("{}: {}", cmd, e)))?;

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            success: output.status.success(),
            code: output.status.code(),
        })
    }

    fn execute_with_stdin(
        &self,
        cmd: &str,
        args: &[String],
        stdin_data: &str,
    ) -> Result<CommandOutput> {
        let mut child = Command::new(cmd)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| PickerError::BinaryNotFound(format!("{}: {}", cmd, e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(stdin_data.as_bytes())?;
        }

        let output = child.wait_with_output()?;

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            success: output.status.success(),
            code: output.status.code(),
        })
    }
}

/// Runs privileged firewall commands through an executor.
///
/// When `use_sudo` is set every command is prefixed with `sudo`. In dry-run
/// mode nothing is executed: the command line is logged and an empty
/// successful output is returned.
pub struct CommandRunner<E: CommandExecutor> {
    executor: E,
    use_sudo: bool,
    dry_run: bool,
}

impl<E: CommandExecutor> CommandRunner<E> {
    pub fn new(executor: E, use_sudo: bool, dry_run: bool) -> Self {
        Self {
            executor,
            use_sudo,
            dry_run,
        }
    }

    pub fn use_sudo(&self) -> bool {
        self.use_sudo
    }

    pub fn dry_run(&self) -> bool {
        self.dry_run
    }

    /// Resolve the program and argument list, adding `sudo` if needed.
    fn command_line(&self, program: &str, args: &[&str]) -> (String, Vec<String>) {
        if self.use_sudo {
            let mut full = Vec::with_capacity(args.len() + 1);
            full.push(program.to_string());
            full.extend(args_to_strings(args));
            ("sudo".to_string(), full)
        } else {
            (program.to_string(), args_to_strings(args))
        }
    }

    /// Run a command. A non-zero exit status is reported in the output, not as an error.
    pub fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput> {
        let (cmd, full_args) = self.command_line(program, args);
        if self.dry_run {
            info!("[DRY RUN] Would execute: {} {}", cmd, full_args.join(" "));
            return Ok(CommandOutput::dry_run());
        }
        debug!("Executing: {} {}", cmd, full_args.join(" "));
        self.executor.execute(&cmd, &full_args)
    }

    /// Run a command with data on stdin.
    pub fn run_with_stdin(&self, program: &str, args: &[&str], stdin: &str) -> Result<CommandOutput> {
        let (cmd, full_args) = self.command_line(program, args);
        if self.dry_run {
            info!(
                "[DRY RUN] Would execute: {} {} <<EOF\n{}EOF",
                cmd,
                full_args.join(" "),
                stdin
            );
            return Ok(CommandOutput::dry_run());
        }
        debug!("Executing: {} {} (with stdin)", cmd, full_args.join(" "));
        self.executor.execute_with_stdin(&cmd, &full_args, stdin)
    }

    /// Run a command and fail on a non-zero exit, except when the failure only
    /// says the chain, target or rule does not exist.
    pub fn run_checked(&self, program: &str, args: &[&str]) -> Result<CommandOutput> {
        let output = self.run(program, args)?;
        check_output(program, args, output)
    }

    /// Same as [`run_checked`](Self::run_checked) with data on stdin.
    pub fn run_checked_with_stdin(
        &self,
        program: &str,
        args: &[&str],
        stdin: &str,
    ) -> Result<CommandOutput> {
        let output = self.run_with_stdin(program, args, stdin)?;
        check_output(program, args, output)
    }
}

fn check_output(program: &str, args: &[&str], output: CommandOutput) -> Result<CommandOutput> {
    if output.success || output.stderr.contains(MISSING_TARGET_MARKER) {
        return Ok(output);
    }
    Err(PickerError::Firewall(format!(
        "Command failed: {} {}\nstdout: {}\nstderr: {}",
        program,
        args.join(" "),
        output.stdout.trim(),
        output.stderr.trim()
    ))
    .into())
}

/// Locate a binary on `PATH`, falling back to well-known sbin locations.
pub fn find_binary(name: &str, fallbacks: &[&str]) -> Result<PathBuf> {
    if let Some(path) = search_path(name, env::var_os("PATH").as_deref()) {
        return Ok(path);
    }
    fallbacks
        .iter()
        .map(Path::new)
        .find(|p| p.is_file())
        .map(Path::to_path_buf)
        .ok_or_else(|| PickerError::BinaryNotFound(name.to_string()).into())
}

/// Whether a binary can be found on `PATH` or in the usual sbin directories.
pub fn binary_available(name: &str) -> bool {
    let fallbacks = [format!("/sbin/{}", name), format!("/usr/sbin/{}", name)];
    let refs: Vec<&str> = fallbacks.iter().map(String::as_str).collect();
    find_binary(name, &refs).is_ok()
}

fn search_path(name: &str, path_var: Option<&std::ffi::OsStr>) -> Option<PathBuf> {
    let path_var = path_var?;
    env::split_paths(path_var)
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
}

/// Helper function to convert a slice of &str to Vec<String>.
///
/// mockall has issues with lifetimes in `&[&str]`, so the trait takes `&[String]`.
pub fn args_to_strings(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::CommandOutput;

    pub fn success_output(stdout: &str) -> CommandOutput {
        CommandOutput {
            stdout: stdout.to_string(),
            stderr: String::new(),
            success: true,
            code: Some(0),
        }
    }

    pub fn failure_output(stderr: &str) -> CommandOutput {
        CommandOutput {
            stdout: String::new(),
            stderr: stderr.to_string(),
            success: false,
            code: Some(1),
        }
    }

    pub fn args_eq(args: &[String], expected: &[&str]) -> bool {
        args.len() == expected.len() && args.iter().zip(expected).all(|(a, e)| a == e)
    }

    pub fn args_has(args: &[String], needle: &str) -> bool {
        args.iter().any(|a| a == needle)
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn test_args_to_strings() {
        let args = args_to_strings(&["arg1", "arg2", "arg3"]);
        assert_eq!(args, vec!["arg1", "arg2", "arg3"]);
    }

    #[test]
    fn test_command_output_default() {
        let output = CommandOutput::default();
        assert!(output.stdout.is_empty());
        assert!(!output.success);
        assert!(output.code.is_none());
    }

    #[test]
    fn test_real_command_executor_execute_echo() {
        let executor = RealCommandExecutor::new();
        let output = executor.execute("echo", &args_to_strings(&["-n", "hello"])).unwrap();
        assert!(output.success);
        assert_eq!(output.stdout, "hello");
    }

    #[test]
    fn test_real_command_executor_with_stdin() {
        let executor = RealCommandExecutor::new();
        let output = executor.execute_with_stdin("cat", &[], "hello world").unwrap();
        assert!(output.success);
        assert_eq!(output.stdout, "hello world");
    }

    #[test]
    fn test_real_command_executor_missing_binary() {
        let executor = RealCommandExecutor::new();
        let err = executor
            .execute("definitely-not-a-real-binary-sdrpick", &[])
            .unwrap_err();
        assert!(err.to_string().contains("Command not found"));
    }

    #[test]
    fn test_runner_prefixes_sudo() {
        let mut mock = MockCommandExecutor::new();
        mock.expect_execute()
            .withf(|cmd, args| cmd == "sudo" && args_eq(args, &["iptables", "-L", "-n"]))
            .times(1)
            .returning(|_, _| Ok(success_output("")));

        let runner = CommandRunner::new(mock, true, false);
        assert!(runner.run("iptables", &["-L", "-n"]).unwrap().success);
    }

    #[test]
    fn test_runner_without_sudo() {
        let mut mock = MockCommandExecutor::new();
        mock.expect_execute()
            .withf(|cmd, args| cmd == "nft" && args_eq(args, &["list", "tables"]))
            .times(1)
            .returning(|_, _| Ok(success_output("")));

        let runner = CommandRunner::new(mock, false, false);
        assert!(runner.run("nft", &["list", "tables"]).is_ok());
    }

    #[test]
    fn test_runner_dry_run_executes_nothing() {
        let mut mock = MockCommandExecutor::new();
        mock.expect_execute().times(0);
        mock.expect_execute_with_stdin().times(0);

        let runner = CommandRunner::new(mock, true, true);
        let output = runner.run("iptables", &["-F", "CHAIN"]).unwrap();
        assert!(output.success);
        assert!(output.stdout.is_empty());
        let output = runner.run_with_stdin("nft", &["-f", "-"], "flush ruleset").unwrap();
        assert!(output.success);
    }

    #[test]
    fn test_run_checked_fails_on_error() {
        let mut mock = MockCommandExecutor::new();
        mock.expect_execute()
            .returning(|_, _| Ok(failure_output("iptables: Bad rule")));

        let runner = CommandRunner::new(mock, false, false);
        let err = runner.run_checked("iptables", &["-A", "X"]).unwrap_err();
        assert!(err.to_string().contains("Bad rule"));
    }

    #[test]
    fn test_run_checked_tolerates_missing_target() {
        let mut mock = MockCommandExecutor::new();
        mock.expect_execute().returning(|_, _| {
            Ok(failure_output(
                "iptables: No chain/target/match by that name.",
            ))
        });

        let runner = CommandRunner::new(mock, false, false);
        let output = runner.run_checked("iptables", &["-D", "OUTPUT", "1"]).unwrap();
        assert!(!output.success);
    }

    #[test]
    fn test_search_path_finds_binary() {
        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path().join("fakebin");
        std::fs::write(&bin, "#!/bin/sh\n").unwrap();
        let found = search_path("fakebin", Some(dir.path().as_os_str()));
        assert_eq!(found, Some(bin));
        assert_eq!(search_path("nothere", Some(dir.path().as_os_str())), None);
        assert_eq!(search_path("fakebin", None), None);
    }

    #[test]
    fn test_find_binary_uses_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path().join("sdrpick-fallback-bin");
        std::fs::write(&bin, "").unwrap();
        let bin_str = bin.to_str().unwrap();
        let found = find_binary("sdrpick-fallback-bin", &[bin_str]).unwrap();
        assert_eq!(found, bin);
    }

    #[test]
    fn test_find_binary_missing() {
        let err = find_binary("sdrpick-no-such-binary", &["/nonexistent/x"]).unwrap_err();
        assert!(err.to_string().contains("sdrpick-no-such-binary"));
    }
}
