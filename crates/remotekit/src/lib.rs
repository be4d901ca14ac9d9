//! # remotekit
//!
//! Ship a script to remote hosts, run it, and find out how it really ended.
//!
//! ## Core Concepts
//!
//! - **Transport**: exec/send/fetch against one target. [`SshTransport`] drives
//!   the system `ssh` and `scp` clients
//! - **Payload**: the script plus support files, packed into one archive
//! - **RemoteSession**: the per-target remote paths and shell commands
//! - **Dispatcher**: provisions, transfers, executes, collects and cleans up,
//!   one target after another
//! - **InterruptToken**: set once by SIGINT/SIGTERM, checked between steps
//!
//! The payload's exit code is written to a marker file on the target and
//! read back afterwards. The status of the ssh invocation is only used when
//! the marker cannot be retrieved.

pub mod dispatcher;
pub mod error;
pub mod interrupt;
pub mod payload;
mod process;
pub mod session;
pub mod ssh;
pub mod target;
pub mod transport;

pub use dispatcher::{
    DispatchObserver, DispatchOptions, DispatchRun, Dispatcher, NoObserver, PerTargetResult,
    Stage, TargetStatus, new_run_id,
};
pub use error::{Error, ErrorCategory, Result, TransportError};
pub use interrupt::{InterruptToken, install_signal_handlers};
pub use payload::{PackagedArchive, Payload, PayloadEntry};
pub use session::{ExecEnv, RemoteSession};
pub use ssh::SshTransport;
pub use target::{Credential, RemoteTarget};
pub use transport::{CommandOutput, Transport};
