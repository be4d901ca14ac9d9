//! The remote-shell and file-transfer contract the dispatcher depends on.

use crate::error::TransportError;
use crate::interrupt::InterruptToken;
use crate::target::RemoteTarget;
use std::path::Path;

/// Output of a remote command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Trimmed stderr, or stdout when stderr is empty.
    pub fn message(&self) -> String {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            self.stdout.trim().to_string()
        } else {
            stderr.to_string()
        }
    }
}

/// Authenticated remote shell plus file copy.
///
/// Every call blocks until it finishes. Implementations must return
/// [`TransportError::Interrupted`] promptly once `interrupt` is set, killing
/// any child process they own.
pub trait Transport: Send + Sync {
    /// Run `command` through the remote shell.
    ///
    /// A command that ran and exited non-zero is `Ok` with its exit code.
    fn exec(
        &self,
        target: &RemoteTarget,
        command: &str,
        interrupt: &InterruptToken,
    ) -> Result<CommandOutput, TransportError>;

    /// Copy a local file to `remote_path`.
    fn send(
        &self,
        target: &RemoteTarget,
        local_path: &Path,
        remote_path: &str,
        interrupt: &InterruptToken,
    ) -> Result<(), TransportError>;

    /// Copy `remote_path` to a local file.
    fn fetch(
        &self,
        target: &RemoteTarget,
        remote_path: &str,
        local_path: &Path,
        interrupt: &InterruptToken,
    ) -> Result<(), TransportError>;
}
