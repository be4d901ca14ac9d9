//! Child processes that can be killed mid-flight.

use crate::error::TransportError;
use crate::interrupt::InterruptToken;
use std::io::Read;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::Duration;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Captured result of a finished child.
#[derive(Debug)]
pub(crate) struct ProcessOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    /// Exit code, with death-by-signal mapped to `128 + signal` on unix.
    pub fn exit_code(&self) -> i32 {
        if let Some(code) = self.status.code() {
            return code;
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = self.status.signal() {
                return 128 + signal;
            }
        }
        -1
    }
}

/// Run `command` to completion, killing it if `interrupt` becomes set.
pub(crate) fn run_interruptible(
    mut command: Command,
    interrupt: &InterruptToken,
) -> Result<ProcessOutput, TransportError> {
    let program = command.get_program().to_string_lossy().into_owned();

    if interrupt.is_set() {
        return Err(TransportError::Interrupted);
    }

    // Own process group: a terminal Ctrl-C reaches only us, and children
    // end through the token.
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }

    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| TransportError::Spawn {
            program: program.clone(),
            source,
        })?;

    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => {}
            Err(source) => {
                kill(&mut child, &program);
                return Err(TransportError::Wait { program, source });
            }
        }

        if interrupt.is_set() {
            kill(&mut child, &program);
            return Err(TransportError::Interrupted);
        }

        thread::sleep(POLL_INTERVAL);
    };

    // The child may have exited because of the same signal.
    if interrupt.is_set() {
        log::debug!("{program} exited with {status} after interrupt");
        return Err(TransportError::Interrupted);
    }

    Ok(ProcessOutput {
        status,
        stdout: collect(stdout),
        stderr: collect(stderr),
    })
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<Vec<u8>>> {
    pipe.map(|mut pipe| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = pipe.read_to_end(&mut buf);
            buf
        })
    })
}

fn collect(handle: Option<JoinHandle<Vec<u8>>>) -> String {
    handle
        .and_then(|h| h.join().ok())
        .map(|buf| String::from_utf8_lossy(&buf).into_owned())
        .unwrap_or_default()
}

fn kill(child: &mut Child, program: &str) {
    log::warn!("Killing {program} (pid {})", child.id());
    if let Err(e) = child.kill() {
        log::debug!("kill {program}: {e}");
    }
    let _ = child.wait();
}
