//! OpenSSH-backed transport.
//!
//! Commands go through `ssh`, files through `scp`. Password targets are
//! wrapped in `sshpass -e`, which reads the secret from the `SSHPASS`
//! environment variable of the child so it never appears in argv.

use crate::error::TransportError;
use crate::interrupt::InterruptToken;
use crate::process::{ProcessOutput, run_interruptible};
use crate::target::{Credential, RemoteTarget};
use crate::transport::{CommandOutput, Transport};
use std::path::Path;
use std::process::Command;
use std::time::Duration;

/// ssh exits with 255 when it could not connect or authenticate.
const SSH_CONNECTION_FAILURE: i32 = 255;
/// sshpass: wrong password.
const SSHPASS_BAD_PASSWORD: i32 = 5;
/// sshpass: host public key unknown.
const SSHPASS_HOST_KEY_UNKNOWN: i32 = 6;

const CONNECTION_PATTERNS: &[&str] = &[
    "Could not resolve",
    "Connection refused",
    "Connection timed out",
    "Connection closed",
    "Permission denied",
    "Host key verification failed",
    "No route to host",
    "Network is unreachable",
];

/// Transport that shells out to the OpenSSH client tools.
#[derive(Debug, Clone)]
pub struct SshTransport {
    connect_timeout: Duration,
    strict_host_keys: bool,
}

impl Default for SshTransport {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            strict_host_keys: false,
        }
    }
}

impl SshTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Refuse unknown host keys instead of accepting new ones.
    pub fn with_strict_host_keys(mut self, strict: bool) -> Self {
        self.strict_host_keys = strict;
        self
    }

    /// `-o` options shared by ssh and scp.
    fn common_options(&self, target: &RemoteTarget) -> Vec<String> {
        let mut options = vec![
            "-o".to_string(),
            format!("ConnectTimeout={}", self.connect_timeout.as_secs().max(1)),
            "-o".to_string(),
            format!(
                "StrictHostKeyChecking={}",
                if self.strict_host_keys {
                    "yes"
                } else {
                    "accept-new"
                }
            ),
            "-o".to_string(),
            "LogLevel=ERROR".to_string(),
        ];

        match &target.credential {
            Credential::Password(_) => {
                options.push("-o".to_string());
                options.push("PubkeyAuthentication=no".to_string());
            }
            Credential::Key { identity_file } => {
                options.push("-o".to_string());
                options.push("BatchMode=yes".to_string());
                if let Some(path) = identity_file {
                    options.push("-i".to_string());
                    options.push(path.display().to_string());
                }
            }
        }

        options
    }

    /// Command for `program`, wrapped in sshpass for password targets.
    fn client(&self, program: &str, target: &RemoteTarget) -> Command {
        match &target.credential {
            Credential::Password(secret) => {
                let mut command = Command::new("sshpass");
                command.arg("-e").arg(program).env("SSHPASS", secret);
                command
            }
            Credential::Key { .. } => Command::new(program),
        }
    }

    fn ssh_command(&self, target: &RemoteTarget, remote_command: &str) -> Command {
        let mut command = self.client("ssh", target);
        command
            .args(self.common_options(target))
            .arg("-p")
            .arg(target.port.to_string())
            .arg(target.destination())
            .arg("--")
            .arg(remote_command);
        command
    }

    fn scp_command(&self, target: &RemoteTarget, from: &str, to: &str) -> Command {
        let mut command = self.client("scp", target);
        command
            .arg("-q")
            .args(self.common_options(target))
            .arg("-P")
            .arg(target.port.to_string())
            .arg(from)
            .arg(to);
        command
    }

    fn copy(
        &self,
        target: &RemoteTarget,
        command: Command,
        interrupt: &InterruptToken,
    ) -> Result<(), TransportError> {
        let output = run_interruptible(command, interrupt)?;
        if output.status.success() {
            return Ok(());
        }

        let message = output.stderr.trim().to_string();
        if is_connection_failure(&output) {
            return Err(TransportError::Connection {
                target: target.name.clone(),
                message,
            });
        }
        Err(TransportError::Transfer {
            target: target.name.clone(),
            message,
        })
    }
}

impl Transport for SshTransport {
    fn exec(
        &self,
        target: &RemoteTarget,
        command: &str,
        interrupt: &InterruptToken,
    ) -> Result<CommandOutput, TransportError> {
        log::trace!("[{}] exec: {command}", target.name);
        let output = run_interruptible(self.ssh_command(target, command), interrupt)?;

        if is_connection_failure(&output) {
            return Err(TransportError::Connection {
                target: target.name.clone(),
                message: output.stderr.trim().to_string(),
            });
        }

        Ok(CommandOutput {
            exit_code: output.exit_code(),
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }

    fn send(
        &self,
        target: &RemoteTarget,
        local_path: &Path,
        remote_path: &str,
        interrupt: &InterruptToken,
    ) -> Result<(), TransportError> {
        log::trace!(
            "[{}] send: {} -> {remote_path}",
            target.name,
            local_path.display()
        );
        let to = format!("{}:{remote_path}", target.destination());
        let command = self.scp_command(target, &local_path.display().to_string(), &to);
        self.copy(target, command, interrupt)
    }

    fn fetch(
        &self,
        target: &RemoteTarget,
        remote_path: &str,
        local_path: &Path,
        interrupt: &InterruptToken,
    ) -> Result<(), TransportError> {
        log::trace!(
            "[{}] fetch: {remote_path} -> {}",
            target.name,
            local_path.display()
        );
        let from = format!("{}:{remote_path}", target.destination());
        let command = self.scp_command(target, &from, &local_path.display().to_string());
        self.copy(target, command, interrupt)
    }
}

/// Whether a finished ssh/scp/sshpass run failed at the connection layer.
fn is_connection_failure(output: &ProcessOutput) -> bool {
    match output.exit_code() {
        0 => false,
        SSH_CONNECTION_FAILURE | SSHPASS_BAD_PASSWORD | SSHPASS_HOST_KEY_UNKNOWN => true,
        _ => {
            let stderr = output.stderr.to_lowercase();
            CONNECTION_PATTERNS
                .iter()
                .any(|p| stderr.contains(&p.to_lowercase()))
        }
    }
}
