//! System command execution.
//!
//! All external programs (`ip`, `wg`, `resolvconf`, hook shells) are run
//! through [`SystemCommands`] so the kernel backend can be exercised without
//! touching the host.

use async_trait::async_trait;
use std::collections::HashSet;
use std::process::Stdio;
use std::sync::{Mutex, PoisonError};
use tokio::io::AsyncWriteExt;
use tokio::process::Command as TokioCommand;
use tracing::{debug, error, info};

use super::{PlatformError, PlatformResult};

/// Runs a program and returns its standard output.
#[async_trait]
pub trait SystemCommands: Send + Sync {
    async fn run(&self, program: &str, args: &[String], stdin: Option<&str>)
    -> PlatformResult<String>;
}

/// Render a command line the way it is logged.
pub fn command_line(program: &str, args: &[String]) -> String {
    if args.is_empty() {
        program.to_string()
    } else {
        format!("{} {}", program, args.join(" "))
    }
}

/// Executes commands on the host.
#[derive(Debug, Default, Clone, Copy)]
pub struct HostCommands;

impl HostCommands {
    pub fn new() -> Self {
        HostCommands
    }
}

#[async_trait]
impl SystemCommands for HostCommands {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        stdin: Option<&str>,
    ) -> PlatformResult<String> {
        let line = command_line(program, args);
        info!("[#] {}", line);

        let mut child = TokioCommand::new(program)
            .args(args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::PermissionDenied => {
                    PlatformError::Permission(format!("cannot execute {}: {}", program, e))
                }
                _ => PlatformError::Spawn {
                    program: program.to_string(),
                    source: e,
                },
            })?;

        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(input.as_bytes()).await?;
            pipe.shutdown().await?;
        }

        let output = child.wait_with_output().await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            error!("Command failed: {} {}", output.status, stderr.trim());
            let lowered = stderr.to_ascii_lowercase();
            if lowered.contains("operation not permitted") || lowered.contains("permission denied")
            {
                return Err(PlatformError::Permission(format!(
                    "{}: {}",
                    line,
                    stderr.trim()
                )));
            }
            return Err(PlatformError::SystemCommand(format!(
                "`{}` failed with status {}: {}",
                line,
                output.status,
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        debug!("Command output: {}", stdout.trim_end());

        Ok(stdout)
    }
}

#[derive(Debug, Default)]
struct Recording {
    lines: Vec<String>,
    stdin: Vec<(String, String)>,
    failures: Vec<String>,
    missing: Vec<String>,
    responses: Vec<(String, String)>,
    links: HashSet<String>,
}

/// Records commands instead of running them.
///
/// Link creation and deletion are tracked so `ip link show` answers the way
/// the host would. A command whose line starts with a registered failure
/// prefix fails; one matching a registered response prefix prints that
/// response.
#[derive(Debug, Default)]
pub struct RecordingCommands {
    inner: Mutex<Recording>,
}

impl RecordingCommands {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every command starting with `prefix` fail.
    pub fn fail_when(&self, prefix: impl Into<String>) {
        self.lock().failures.push(prefix.into());
    }

    /// Make `program` fail to start, as if it were not installed.
    pub fn missing_program(&self, program: impl Into<String>) {
        self.lock().missing.push(program.into());
    }

    /// Print `output` for every command starting with `prefix`.
    pub fn respond(&self, prefix: impl Into<String>, output: impl Into<String>) {
        self.lock().responses.push((prefix.into(), output.into()));
    }

    /// Command lines run so far, in order.
    pub fn lines(&self) -> Vec<String> {
        self.lock().lines.clone()
    }

    /// Input written to the standard input of the command starting with `prefix`.
    pub fn stdin_for(&self, prefix: &str) -> Option<String> {
        self.lock()
            .stdin
            .iter()
            .find(|(line, _)| line.starts_with(prefix))
            .map(|(_, input)| input.clone())
    }

    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.lines.clear();
        inner.stdin.clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Recording> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl SystemCommands for RecordingCommands {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        stdin: Option<&str>,
    ) -> PlatformResult<String> {
        let line = command_line(program, args);
        info!("[#] {}", line);

        let mut inner = self.lock();
        inner.lines.push(line.clone());
        if let Some(input) = stdin {
            inner.stdin.push((line.clone(), input.to_string()));
        }

        if inner.missing.iter().any(|missing| missing == program) {
            return Err(PlatformError::Spawn {
                program: program.to_string(),
                source: std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "No such file or directory",
                ),
            });
        }
        if inner.failures.iter().any(|prefix| line.starts_with(prefix)) {
            return Err(PlatformError::SystemCommand(format!("`{}` failed", line)));
        }

        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        match (program, args.as_slice()) {
            ("ip", ["link", "add", name, "type", "wireguard"]) => {
                if !inner.links.insert(name.to_string()) {
                    return Err(PlatformError::SystemCommand(format!(
                        "`{}` failed: File exists",
                        line
                    )));
                }
            }
            ("ip", ["link", "delete", "dev", name]) => {
                if !inner.links.remove(*name) {
                    return Err(PlatformError::SystemCommand(format!(
                        "`{}` failed: Cannot find device \"{}\"",
                        line, name
                    )));
                }
            }
            ("ip", ["link", "show", "dev", name]) => {
                if !inner.links.contains(*name) {
                    return Err(PlatformError::NotFound(name.to_string()));
                }
            }
            ("ip", ["-o", "link", "show", "type", "wireguard"]) => {
                let mut names: Vec<&String> = inner.links.iter().collect();
                names.sort();
                let listing: String = names
                    .iter()
                    .enumerate()
                    .map(|(i, name)| {
                        format!("{}: {}: <POINTOPOINT,NOARP,UP> mtu 1420\n", i + 1, name)
                    })
                    .collect();
                return Ok(listing);
            }
            _ => {}
        }

        let response = inner
            .responses
            .iter()
            .find(|(prefix, _)| line.starts_with(prefix.as_str()))
            .map(|(_, output)| output.clone());
        Ok(response.unwrap_or_default())
    }
}
