//! Remote execution dispatcher
//!
//! Each target goes through the same steps, strictly in order:
//!
//! 1. Provisioning - recreate the remote work dir
//! 2. Transferring - upload the payload archive (or each file on fallback)
//! 3. Executing - run the script, writing its exit code to a marker file
//! 4. Collecting - fetch the marker and both logs
//! 5. CleaningUp - remove every remote path
//!
//! Targets are independent: one failing does not stop the next. The
//! interrupt token is checked before every step; once it is set the current
//! target is abandoned and no further target is started.

use crate::error::{Error, Result, TransportError};
use crate::interrupt::InterruptToken;
use crate::payload::{self, PackagedArchive, Payload, PayloadEntry};
use crate::session::{ExecEnv, RemoteSession, parse_exit_marker};
use crate::target::RemoteTarget;
use crate::transport::Transport;
use bulkops::{Outcome, RunRecorder, RunResult, SkipReason};
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// Step of the per-target state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Provisioning,
    Transferring,
    Executing,
    Collecting,
    CleaningUp,
    Done,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Provisioning => "provisioning",
            Self::Transferring => "transferring",
            Self::Executing => "executing",
            Self::Collecting => "collecting",
            Self::CleaningUp => "cleaning up",
            Self::Done => "done",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a target's execution ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetStatus {
    /// The payload ran; `exit_code` says whether it succeeded
    Completed,
    /// Could not connect or authenticate during provisioning
    Unreachable { message: String },
    /// A step failed after the target was reached
    Failed { stage: Stage, message: String },
    /// Abandoned because of an interrupt; `None` if never started
    NotAttempted { stage: Option<Stage> },
}

/// Final record for one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PerTargetResult {
    pub target: String,
    pub exit_code: Option<i32>,
    pub success: bool,
    pub status: TargetStatus,
    /// Whether `exit_code` came from the marker file
    pub exit_verified: bool,
    pub log_path: Option<PathBuf>,
    pub debug_log_path: Option<PathBuf>,
}

impl PerTargetResult {
    fn new(target: &str, status: TargetStatus) -> Self {
        Self {
            target: target.to_string(),
            exit_code: None,
            success: false,
            status,
            exit_verified: false,
            log_path: None,
            debug_log_path: None,
        }
    }

    fn not_attempted(target: &str, stage: Option<Stage>) -> Self {
        Self::new(target, TargetStatus::NotAttempted { stage })
    }

    pub fn was_attempted(&self) -> bool {
        !matches!(self.status, TargetStatus::NotAttempted { .. })
    }

    /// Outcome entry for reports.
    pub fn outcome(&self) -> Outcome {
        match &self.status {
            TargetStatus::NotAttempted { .. } => Outcome::skipped(SkipReason::NotAttempted),
            _ if self.success => Outcome::Success,
            TargetStatus::Completed => match self.exit_code {
                Some(code) => Outcome::failure(format!("exited with {code}")),
                None => Outcome::failure("exit code unknown"),
            },
            TargetStatus::Unreachable { message } => {
                Outcome::failure(format!("unreachable: {message}"))
            }
            TargetStatus::Failed { stage, message } => {
                Outcome::failure(format!("{stage} failed: {message}"))
            }
        }
    }
}

/// Callbacks for progress display.
pub trait DispatchObserver {
    fn on_target_start(&self, _target: &RemoteTarget, _index: usize, _total: usize) {}
    fn on_stage(&self, _target: &RemoteTarget, _stage: Stage) {}
    fn on_target_complete(&self, _result: &PerTargetResult) {}
}

/// Observer that ignores everything.
pub struct NoObserver;

impl DispatchObserver for NoObserver {}

/// Dispatcher settings
#[derive(Debug, Clone)]
pub struct DispatchOptions {
    /// Remote directory under which work dirs and logs are created
    pub remote_base: String,
    /// Local directory receiving `<run_id>/<target>.log` files
    pub log_dir: PathBuf,
    /// Local directory for the staging archive
    pub staging_dir: PathBuf,
    /// Namespaces remote paths and local logs
    pub run_id: String,
    /// Environment for the payload
    pub env: ExecEnv,
}

impl DispatchOptions {
    pub fn new(log_dir: impl Into<PathBuf>) -> Self {
        Self {
            remote_base: "/tmp".to_string(),
            log_dir: log_dir.into(),
            staging_dir: std::env::temp_dir(),
            run_id: new_run_id(),
            env: ExecEnv::default(),
        }
    }

    /// Local directory holding this run's logs.
    pub fn run_log_dir(&self) -> PathBuf {
        self.log_dir.join(&self.run_id)
    }
}

/// Unique id for a dispatch: local time plus pid.
pub fn new_run_id() -> String {
    format!(
        "{}-{}",
        chrono::Local::now().format("%Y%m%d-%H%M%S"),
        std::process::id()
    )
}

/// Everything a dispatch produced.
#[derive(Debug, Clone)]
pub struct DispatchRun {
    pub run_id: String,
    pub targets: Vec<PerTargetResult>,
    pub summary: RunResult<String>,
    pub interrupted: bool,
}

impl DispatchRun {
    pub fn is_success(&self) -> bool {
        self.summary.is_success() && !self.interrupted
    }
}

/// Why a target stopped before the collecting step.
enum Abort {
    Interrupted(Stage),
    Unreachable(String),
    Failed(Stage, String),
}

/// Runs a payload on a list of targets.
pub struct Dispatcher<'a> {
    transport: &'a dyn Transport,
    options: DispatchOptions,
    interrupt: InterruptToken,
    observer: &'a dyn DispatchObserver,
}

impl<'a> Dispatcher<'a> {
    pub fn new(
        transport: &'a dyn Transport,
        options: DispatchOptions,
        interrupt: InterruptToken,
    ) -> Self {
        Self {
            transport,
            options,
            interrupt,
            observer: &NoObserver,
        }
    }

    pub fn with_observer(mut self, observer: &'a dyn DispatchObserver) -> Self {
        self.observer = observer;
        self
    }

    pub fn options(&self) -> &DispatchOptions {
        &self.options
    }

    /// Run `payload` with `args` on each target, in order.
    ///
    /// Only local problems (missing payload files, unwritable log dir) are
    /// errors. Target failures are recorded in the returned run.
    pub fn execute_on_targets(
        &self,
        targets: &[RemoteTarget],
        payload: &Payload,
        args: &[String],
    ) -> Result<DispatchRun> {
        let mut seen = HashSet::new();
        if let Some(dup) = targets.iter().find(|t| !seen.insert(t.name.as_str())) {
            return Err(Error::DuplicateTarget(dup.name.clone()));
        }
        payload.validate()?;
        let script = payload.script_name()?;
        let entries = payload.entries()?;

        let run_log_dir = self.options.run_log_dir();
        fs::create_dir_all(&run_log_dir).map_err(|source| Error::Io {
            action: "Failed to create log directory",
            path: run_log_dir.clone(),
            source,
        })?;

        let archive_path = self
            .options
            .staging_dir
            .join(format!("fleetops-{}.tar.gz", self.options.run_id));
        let archive = match payload::package(payload, &archive_path) {
            Ok(archive) => Some(archive),
            Err(e) => {
                log::warn!("Packaging failed, falling back to per-file transfer: {e}");
                None
            }
        };

        log::info!(
            "Dispatching {} to {} targets (run {})",
            script,
            targets.len(),
            self.options.run_id
        );

        let mut recorder = RunRecorder::start(targets.len());
        let mut results = Vec::with_capacity(targets.len());

        for (index, target) in targets.iter().enumerate() {
            if self.interrupt.is_set() {
                log::warn!(
                    "Interrupted: {} of {} targets not attempted",
                    targets.len() - index,
                    targets.len()
                );
                for skipped in &targets[index..] {
                    let result = PerTargetResult::not_attempted(&skipped.name, None);
                    recorder.record(result.target.clone(), result.outcome());
                    results.push(result);
                }
                break;
            }

            self.observer.on_target_start(target, index, targets.len());
            let result = self.run_target(target, &script, &entries, archive.as_ref(), args);
            self.observer.on_target_complete(&result);

            recorder.record(result.target.clone(), result.outcome());
            results.push(result);
        }

        // removes the staging archive
        drop(archive);

        Ok(DispatchRun {
            run_id: self.options.run_id.clone(),
            targets: results,
            summary: recorder.finish(),
            interrupted: self.interrupt.is_set(),
        })
    }

    fn run_target(
        &self,
        target: &RemoteTarget,
        script: &str,
        entries: &[PayloadEntry],
        archive: Option<&PackagedArchive>,
        args: &[String],
    ) -> PerTargetResult {
        let session = RemoteSession::new(
            &self.options.remote_base,
            &self.options.run_id,
            &target.name,
        );

        let outcome =
            self.provision_transfer_execute(target, &session, script, entries, archive, args);
        let wrapper_code = match outcome {
            Ok(code) => code,
            Err(Abort::Interrupted(stage)) => {
                log::warn!("[{}] abandoned while {stage}", target.name);
                return PerTargetResult::not_attempted(&target.name, Some(stage));
            }
            Err(Abort::Unreachable(message)) => {
                log::error!("[{}] could not reach target: {message}", target.name);
                return PerTargetResult::new(&target.name, TargetStatus::Unreachable { message });
            }
            Err(Abort::Failed(stage, message)) => {
                log::error!("[{}] {stage} failed: {message}", target.name);
                let result =
                    PerTargetResult::new(&target.name, TargetStatus::Failed { stage, message });
                return self.clean_up(target, &session, result);
            }
        };

        let mut result = PerTargetResult::new(&target.name, TargetStatus::Completed);

        // Collecting
        if self.interrupted(target, Stage::Collecting) {
            return PerTargetResult::not_attempted(&target.name, Some(Stage::Collecting));
        }
        self.observer.on_stage(target, Stage::Collecting);

        match self.read_exit_marker(target, &session) {
            Some(code) => {
                result.exit_code = Some(code);
                result.exit_verified = true;
            }
            None => {
                log::warn!(
                    "[{}] exit marker unavailable, using transport status {wrapper_code} (unverified)",
                    target.name
                );
                result.exit_code = Some(wrapper_code);
            }
        }
        result.success = result.exit_code == Some(0);

        if result.success {
            log::info!("[{}] payload succeeded", target.name);
        } else {
            log::error!(
                "[{}] target ran and failed with exit code {}",
                target.name,
                result.exit_code.unwrap_or(-1)
            );
        }

        let dir = self.options.run_log_dir();
        result.log_path = self.fetch_log(
            target,
            &session.log_path,
            &dir.join(format!("{}.log", target.name)),
        );
        result.debug_log_path = self.fetch_log(
            target,
            &session.debug_log_path,
            &dir.join(format!("{}.debug.log", target.name)),
        );

        if self.interrupt.is_set() {
            log::warn!("[{}] abandoned while collecting", target.name);
            return PerTargetResult {
                status: TargetStatus::NotAttempted {
                    stage: Some(Stage::Collecting),
                },
                success: false,
                ..result
            };
        }

        self.clean_up(target, &session, result)
    }

    /// Steps 1-3. Returns the wrapper's own exit status on success.
    fn provision_transfer_execute(
        &self,
        target: &RemoteTarget,
        session: &RemoteSession,
        script: &str,
        entries: &[PayloadEntry],
        archive: Option<&PackagedArchive>,
        args: &[String],
    ) -> std::result::Result<i32, Abort> {
        // Provisioning
        self.step(target, Stage::Provisioning)?;
        let provision = session.provision_command();
        match self.transport.exec(target, &provision, &self.interrupt) {
            Ok(out) if out.success() => {}
            Ok(out) => return Err(Abort::Failed(Stage::Provisioning, out.message())),
            Err(e) if e.is_connection() => return Err(Abort::Unreachable(e.to_string())),
            Err(e) => return Err(abort(Stage::Provisioning, e)),
        }

        // Transferring
        self.step(target, Stage::Transferring)?;
        match archive {
            Some(archive) => self.send_archive(target, session, archive)?,
            None => self.send_files(target, session, entries)?,
        }

        // Executing
        self.step(target, Stage::Executing)?;
        let command = session.execute_command(script, args, &self.options.env);
        match self.transport.exec(target, &command, &self.interrupt) {
            Ok(out) => {
                log::debug!(
                    "[{}] remote invocation returned {}",
                    target.name,
                    out.exit_code
                );
                Ok(out.exit_code)
            }
            Err(e) => Err(abort(Stage::Executing, e)),
        }
    }

    fn step(&self, target: &RemoteTarget, stage: Stage) -> std::result::Result<(), Abort> {
        if self.interrupted(target, stage) {
            return Err(Abort::Interrupted(stage));
        }
        log::debug!("[{}] {stage}", target.name);
        self.observer.on_stage(target, stage);
        Ok(())
    }

    fn interrupted(&self, target: &RemoteTarget, stage: Stage) -> bool {
        let set = self.interrupt.is_set();
        if set {
            log::debug!("[{}] interrupt seen before {stage}", target.name);
        }
        set
    }

    fn send_archive(
        &self,
        target: &RemoteTarget,
        session: &RemoteSession,
        archive: &PackagedArchive,
    ) -> std::result::Result<(), Abort> {
        let remote = session.archive_path();
        self.transport
            .send(target, archive.path(), &remote, &self.interrupt)
            .map_err(|e| abort(Stage::Transferring, e))?;

        match self.transport.exec(target, &session.unpack_command(), &self.interrupt) {
            Ok(out) if out.success() => Ok(()),
            Ok(out) => Err(Abort::Failed(
                Stage::Transferring,
                format!("unpacking archive: {}", out.message()),
            )),
            Err(e) => Err(abort(Stage::Transferring, e)),
        }
    }

    fn send_files(
        &self,
        target: &RemoteTarget,
        session: &RemoteSession,
        entries: &[PayloadEntry],
    ) -> std::result::Result<(), Abort> {
        let dirs = payload::parent_dirs(entries);
        if !dirs.is_empty() {
            let command = session.mkdirs_command(dirs.iter().map(String::as_str));
            match self.transport.exec(target, &command, &self.interrupt) {
                Ok(out) if out.success() => {}
                Ok(out) => return Err(Abort::Failed(Stage::Transferring, out.message())),
                Err(e) => return Err(abort(Stage::Transferring, e)),
            }
        }

        for entry in entries {
            if self.interrupt.is_set() {
                return Err(Abort::Interrupted(Stage::Transferring));
            }
            let remote = session.remote_path(&entry.relative);
            self.transport
                .send(target, &entry.local, &remote, &self.interrupt)
                .map_err(|e| abort(Stage::Transferring, e))?;
        }
        Ok(())
    }

    /// Fetch and parse the exit marker. `None` if either step fails.
    fn read_exit_marker(&self, target: &RemoteTarget, session: &RemoteSession) -> Option<i32> {
        let local = self
            .options
            .run_log_dir()
            .join(format!("{}.exit", target.name));

        if let Err(e) = self
            .transport
            .fetch(target, &session.exit_marker_path, &local, &self.interrupt)
        {
            log::warn!("[{}] could not fetch exit marker: {e}", target.name);
            return None;
        }

        let content = fs::read_to_string(&local);
        let _ = fs::remove_file(&local);
        match content {
            Ok(content) => {
                let code = parse_exit_marker(&content);
                if code.is_none() {
                    log::warn!(
                        "[{}] exit marker is not a number: {:?}",
                        target.name,
                        content.trim()
                    );
                }
                code
            }
            Err(e) => {
                log::warn!("[{}] could not read exit marker: {e}", target.name);
                None
            }
        }
    }

    /// Best-effort log download.
    fn fetch_log(&self, target: &RemoteTarget, remote: &str, local: &Path) -> Option<PathBuf> {
        if self.interrupt.is_set() {
            return None;
        }
        match self.transport.fetch(target, remote, local, &self.interrupt) {
            Ok(()) => Some(local.to_path_buf()),
            Err(e) => {
                log::warn!("[{}] could not retrieve {remote}: {e}", target.name);
                None
            }
        }
    }

    /// Best-effort removal of remote state. Never changes `result`'s verdict.
    fn clean_up(
        &self,
        target: &RemoteTarget,
        session: &RemoteSession,
        result: PerTargetResult,
    ) -> PerTargetResult {
        if self.interrupted(target, Stage::CleaningUp) {
            log::warn!(
                "[{}] interrupted before clean-up, remote files left in {}",
                target.name,
                session.work_dir
            );
            // a failure already recorded stands
            if result.status != TargetStatus::Completed {
                return result;
            }
            return PerTargetResult {
                status: TargetStatus::NotAttempted {
                    stage: Some(Stage::CleaningUp),
                },
                success: false,
                ..result
            };
        }
        self.observer.on_stage(target, Stage::CleaningUp);

        match self.transport.exec(target, &session.cleanup_command(), &self.interrupt) {
            Ok(out) if out.success() => log::debug!("[{}] remote files removed", target.name),
            Ok(out) => log::warn!("[{}] clean-up failed: {}", target.name, out.message()),
            Err(e) => log::warn!("[{}] clean-up failed: {e}", target.name),
        }

        self.observer.on_stage(target, Stage::Done);
        result
    }
}

fn abort(stage: Stage, error: TransportError) -> Abort {
    if error.is_interrupted() {
        Abort::Interrupted(stage)
    } else {
        Abort::Failed(stage, error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::CommandOutput;
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Transport that answers from a script instead of a network.
    #[derive(Default)]
    struct FakeTransport {
        unreachable: HashSet<String>,
        /// Exit code written to each target's marker
        exit_codes: HashMap<String, i32>,
        missing_marker: HashSet<String>,
        failing_cleanup: bool,
        failing_send: HashSet<String>,
        /// Reachable, but the work directory cannot be created
        failing_provision: HashSet<String>,
        /// Triggered while sending to the named target
        interrupt_on_send: Option<(String, InterruptToken)>,
        /// Triggered while cleaning up the named target
        interrupt_on_cleanup: Option<(String, InterruptToken)>,
        calls: Mutex<Vec<String>>,
    }

    impl FakeTransport {
        fn log(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn calls_for(&self, target: &str) -> Vec<String> {
            let prefix = format!("{target} ");
            self.calls()
                .into_iter()
                .filter(|c| c.starts_with(&prefix))
                .collect()
        }
    }

    fn output(exit_code: i32, stderr: &str) -> CommandOutput {
        CommandOutput {
            stdout: String::new(),
            stderr: stderr.to_string(),
            exit_code,
        }
    }

    impl Transport for FakeTransport {
        fn exec(
            &self,
            target: &RemoteTarget,
            command: &str,
            _interrupt: &InterruptToken,
        ) -> std::result::Result<CommandOutput, TransportError> {
            if self.unreachable.contains(&target.name) {
                self.log(format!("{} unreachable", target.name));
                return Err(TransportError::Connection {
                    target: target.name.clone(),
                    message: "Connection refused".to_string(),
                });
            }

            let kind = if command.contains("mkdir -p") && command.starts_with("rm -rf") {
                "provision"
            } else if command.starts_with("rm -rf") {
                "cleanup"
            } else if command.starts_with("tar ") {
                "unpack"
            } else if command.starts_with("mkdir -p") {
                "mkdirs"
            } else if command.contains(" bash ") {
                "execute"
            } else {
                "other"
            };
            self.log(format!("{} {kind}", target.name));

            match kind {
                "cleanup" => {
                    if let Some((name, token)) = &self.interrupt_on_cleanup {
                        if *name == target.name {
                            token.trigger();
                        }
                    }
                    if self.failing_cleanup {
                        return Ok(output(1, "rm: permission denied"));
                    }
                    Ok(output(0, ""))
                }
                "provision" if self.failing_provision.contains(&target.name) => {
                    Ok(output(1, "mkdir: cannot create directory: Read-only file system"))
                }
                // the wrapper itself always exits 0
                _ => Ok(output(0, "")),
            }
        }

        fn send(
            &self,
            target: &RemoteTarget,
            local_path: &Path,
            remote_path: &str,
            _interrupt: &InterruptToken,
        ) -> std::result::Result<(), TransportError> {
            let name = local_path.file_name().unwrap().to_string_lossy();
            self.log(format!("{} send {name} -> {remote_path}", target.name));
            if let Some((victim, token)) = &self.interrupt_on_send {
                if *victim == target.name {
                    token.trigger();
                    return Err(TransportError::Interrupted);
                }
            }
            if self.failing_send.contains(&target.name) {
                return Err(TransportError::Transfer {
                    target: target.name.clone(),
                    message: "No space left on device".to_string(),
                });
            }
            Ok(())
        }

        fn fetch(
            &self,
            target: &RemoteTarget,
            remote_path: &str,
            local_path: &Path,
            _interrupt: &InterruptToken,
        ) -> std::result::Result<(), TransportError> {
            self.log(format!("{} fetch {remote_path}", target.name));
            if remote_path.ends_with(".exit") {
                if self.missing_marker.contains(&target.name) {
                    return Err(TransportError::Transfer {
                        target: target.name.clone(),
                        message: "No such file".to_string(),
                    });
                }
                let code = self.exit_codes.get(&target.name).copied().unwrap_or(0);
                fs::write(local_path, format!("{code}\n")).unwrap();
            } else {
                fs::write(local_path, format!("log of {}\n", target.name)).unwrap();
            }
            Ok(())
        }
    }

    struct Fixture {
        dir: TempDir,
        payload: Payload,
        targets: Vec<RemoteTarget>,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let scripts = dir.path().join("scripts");
            fs::create_dir_all(scripts.join("utils")).unwrap();
            fs::write(scripts.join("update.sh"), "#!/bin/bash\nexit 0\n").unwrap();
            fs::write(scripts.join("utils").join("common.sh"), "log() { :; }\n").unwrap();

            let payload = Payload::new(scripts.join("update.sh")).with_support(scripts.join("utils"));
            let targets = ["alpha", "bravo", "charlie"]
                .iter()
                .enumerate()
                .map(|(i, name)| RemoteTarget::new(*name, format!("10.0.0.{}", i + 1)))
                .collect();

            Self {
                dir,
                payload,
                targets,
            }
        }

        fn options(&self) -> DispatchOptions {
            let mut options = DispatchOptions::new(self.dir.path().join("logs"));
            options.staging_dir = self.dir.path().join("staging");
            options.run_id = "test-run".to_string();
            options
        }
    }

    fn codes(run: &DispatchRun) -> Vec<Option<i32>> {
        run.targets.iter().map(|r| r.exit_code).collect()
    }

    #[test]
    fn test_targets_are_independent() {
        let fixture = Fixture::new();
        let transport = FakeTransport {
            unreachable: HashSet::from(["bravo".to_string()]),
            exit_codes: HashMap::from([("charlie".to_string(), 3)]),
            ..FakeTransport::default()
        };
        let dispatcher = Dispatcher::new(&transport, fixture.options(), InterruptToken::new());

        let run = dispatcher
            .execute_on_targets(&fixture.targets, &fixture.payload, &[])
            .unwrap();

        assert_eq!(run.targets.len(), 3);
        assert!(run.targets[0].success);
        assert!(matches!(
            run.targets[1].status,
            TargetStatus::Unreachable { .. }
        ));
        assert_eq!(run.targets[2].status, TargetStatus::Completed);
        assert!(!run.targets[2].success);
        assert_eq!(codes(&run), vec![Some(0), None, Some(3)]);

        assert_eq!(run.summary.succeeded(), 1);
        assert_eq!(run.summary.failed(), 2);
        assert!(!run.is_success());
        assert!(!run.interrupted);
    }

    #[test]
    fn test_steps_run_in_order() {
        let fixture = Fixture::new();
        let transport = FakeTransport::default();
        let dispatcher = Dispatcher::new(&transport, fixture.options(), InterruptToken::new());

        let args = vec!["--force".to_string()];
        dispatcher
            .execute_on_targets(&fixture.targets[..1], &fixture.payload, &args)
            .unwrap();

        let calls = transport.calls_for("alpha");
        let kinds: Vec<&str> = calls
            .iter()
            .map(|c| c.split_whitespace().nth(1).unwrap())
            .collect();
        assert_eq!(
            kinds,
            vec!["provision", "send", "unpack", "execute", "fetch", "fetch", "fetch", "cleanup"]
        );
        assert!(calls[1].contains("payload.tar.gz"));
        assert!(calls[4].ends_with(".exit"));
    }

    #[test]
    fn test_unreachable_target_is_not_cleaned_up() {
        let fixture = Fixture::new();
        let transport = FakeTransport {
            unreachable: HashSet::from(["alpha".to_string()]),
            ..FakeTransport::default()
        };
        let dispatcher = Dispatcher::new(&transport, fixture.options(), InterruptToken::new());

        let run = dispatcher
            .execute_on_targets(&fixture.targets[..1], &fixture.payload, &[])
            .unwrap();

        assert_eq!(transport.calls_for("alpha"), vec!["alpha unreachable"]);
        let outcome = run.targets[0].outcome();
        assert!(outcome.detail().unwrap().starts_with("unreachable"));
    }

    #[test]
    fn test_interrupt_between_targets() {
        let fixture = Fixture::new();
        let token = InterruptToken::new();
        let transport = FakeTransport {
            exit_codes: HashMap::from([("alpha".to_string(), 0)]),
            interrupt_on_cleanup: Some(("alpha".to_string(), token.clone())),
            ..FakeTransport::default()
        };
        let dispatcher = Dispatcher::new(&transport, fixture.options(), token);

        let run = dispatcher
            .execute_on_targets(&fixture.targets, &fixture.payload, &[])
            .unwrap();

        assert!(run.interrupted);
        assert_eq!(run.targets.len(), 3);
        assert!(run.targets[0].success);
        assert_eq!(run.targets[0].exit_code, Some(0));
        for result in &run.targets[1..] {
            assert_eq!(result.status, TargetStatus::NotAttempted { stage: None });
            assert!(!result.was_attempted());
        }
        assert!(transport.calls_for("bravo").is_empty());
        assert!(transport.calls_for("charlie").is_empty());

        assert_eq!(run.summary.succeeded(), 1);
        assert_eq!(run.summary.skipped(), 2);
        assert!(!run.is_success());
    }

    #[test]
    fn test_provisioning_failure_is_not_unreachable() {
        let fixture = Fixture::new();
        let transport = FakeTransport {
            failing_provision: HashSet::from(["bravo".to_string()]),
            exit_codes: HashMap::from([("charlie".to_string(), 4)]),
            ..FakeTransport::default()
        };
        let dispatcher = Dispatcher::new(&transport, fixture.options(), InterruptToken::new());

        let run = dispatcher
            .execute_on_targets(&fixture.targets, &fixture.payload, &[])
            .unwrap();

        match &run.targets[1].status {
            TargetStatus::Failed { stage, message } => {
                assert_eq!(*stage, Stage::Provisioning);
                assert!(message.contains("Read-only file system"));
            }
            other => panic!("expected provisioning failure, got {other:?}"),
        }
        assert_eq!(
            run.targets[1].outcome().detail(),
            Some("provisioning failed: mkdir: cannot create directory: Read-only file system")
        );
        let bravo = transport.calls_for("bravo");
        assert!(!bravo.iter().any(|c| c.contains(" send ")));
        assert_eq!(bravo.last().unwrap(), "bravo cleanup");

        assert!(run.targets[0].success);
        assert_eq!(run.targets[2].exit_code, Some(4));
        assert_eq!(run.summary.failed_keys(), vec!["bravo".to_string(), "charlie".to_string()]);
    }

    #[test]
    fn test_interrupt_mid_transfer_abandons_target() {
        let fixture = Fixture::new();
        let token = InterruptToken::new();
        let transport = FakeTransport {
            interrupt_on_send: Some(("bravo".to_string(), token.clone())),
            ..FakeTransport::default()
        };
        let dispatcher = Dispatcher::new(&transport, fixture.options(), token);

        let run = dispatcher
            .execute_on_targets(&fixture.targets, &fixture.payload, &[])
            .unwrap();

        assert!(run.interrupted);
        assert!(run.targets[0].success);
        assert_eq!(
            run.targets[1].status,
            TargetStatus::NotAttempted {
                stage: Some(Stage::Transferring)
            }
        );
        assert!(!run.targets[1].was_attempted());
        assert_eq!(
            run.targets[2].status,
            TargetStatus::NotAttempted { stage: None }
        );

        let bravo = transport.calls_for("bravo");
        assert!(!bravo.iter().any(|c| c.ends_with("execute")));
        assert!(transport.calls_for("charlie").is_empty());
        assert_eq!(run.summary.succeeded(), 1);
        assert_eq!(run.summary.failed(), 0);
        assert_eq!(run.summary.skipped(), 2);
    }

    #[test]
    fn test_duplicate_targets_rejected() {
        let fixture = Fixture::new();
        let transport = FakeTransport::default();
        let dispatcher = Dispatcher::new(&transport, fixture.options(), InterruptToken::new());
        let targets = vec![
            fixture.targets[0].clone(),
            fixture.targets[1].clone(),
            RemoteTarget::new("alpha", "10.0.0.9"),
        ];

        let err = dispatcher
            .execute_on_targets(&targets, &fixture.payload, &[])
            .unwrap_err();

        assert!(matches!(err, Error::DuplicateTarget(ref name) if name == "alpha"));
        assert!(transport.calls().is_empty());
    }

    #[test]
    fn test_interrupt_before_start_attempts_nothing() {
        let fixture = Fixture::new();
        let token = InterruptToken::new();
        token.trigger();
        let transport = FakeTransport::default();
        let dispatcher = Dispatcher::new(&transport, fixture.options(), token);

        let run = dispatcher
            .execute_on_targets(&fixture.targets, &fixture.payload, &[])
            .unwrap();

        assert!(transport.calls().is_empty());
        assert_eq!(run.summary.skipped(), 3);
    }

    #[test]
    fn test_exit_marker_is_source_of_truth() {
        let fixture = Fixture::new();
        // wrapper returns 0 but the payload wrote 7
        let transport = FakeTransport {
            exit_codes: HashMap::from([("alpha".to_string(), 7)]),
            ..FakeTransport::default()
        };
        let dispatcher = Dispatcher::new(&transport, fixture.options(), InterruptToken::new());

        let run = dispatcher
            .execute_on_targets(&fixture.targets[..1], &fixture.payload, &[])
            .unwrap();

        let result = &run.targets[0];
        assert_eq!(result.exit_code, Some(7));
        assert!(result.exit_verified);
        assert!(!result.success);
        assert_eq!(result.outcome().detail(), Some("exited with 7"));
    }

    #[test]
    fn test_missing_marker_falls_back_unverified() {
        let fixture = Fixture::new();
        let transport = FakeTransport {
            missing_marker: HashSet::from(["alpha".to_string()]),
            ..FakeTransport::default()
        };
        let dispatcher = Dispatcher::new(&transport, fixture.options(), InterruptToken::new());

        let run = dispatcher
            .execute_on_targets(&fixture.targets[..1], &fixture.payload, &[])
            .unwrap();

        let result = &run.targets[0];
        assert_eq!(result.exit_code, Some(0));
        assert!(!result.exit_verified);
        assert!(result.success);
    }

    #[test]
    fn test_cleanup_failure_keeps_verdict() {
        let fixture = Fixture::new();
        let transport = FakeTransport {
            failing_cleanup: true,
            ..FakeTransport::default()
        };
        let dispatcher = Dispatcher::new(&transport, fixture.options(), InterruptToken::new());

        let run = dispatcher
            .execute_on_targets(&fixture.targets, &fixture.payload, &[])
            .unwrap();

        assert!(run.is_success());
        assert!(run.targets.iter().all(|r| r.success));
    }

    #[test]
    fn test_transfer_failure_still_cleans_up() {
        let fixture = Fixture::new();
        let transport = FakeTransport {
            failing_send: HashSet::from(["alpha".to_string()]),
            ..FakeTransport::default()
        };
        let dispatcher = Dispatcher::new(&transport, fixture.options(), InterruptToken::new());

        let run = dispatcher
            .execute_on_targets(&fixture.targets[..2], &fixture.payload, &[])
            .unwrap();

        assert!(matches!(
            run.targets[0].status,
            TargetStatus::Failed {
                stage: Stage::Transferring,
                ..
            }
        ));
        let calls = transport.calls_for("alpha");
        assert_eq!(calls.last().unwrap(), "alpha cleanup");
        assert!(!calls.iter().any(|c| c.ends_with("execute")));
        assert!(run.targets[1].success);
    }

    #[test]
    fn test_logs_are_retrieved_locally() {
        let fixture = Fixture::new();
        let transport = FakeTransport::default();
        let options = fixture.options();
        let run_log_dir = options.run_log_dir();
        let dispatcher = Dispatcher::new(&transport, options, InterruptToken::new());

        let run = dispatcher
            .execute_on_targets(&fixture.targets[..1], &fixture.payload, &[])
            .unwrap();

        let result = &run.targets[0];
        assert_eq!(result.log_path, Some(run_log_dir.join("alpha.log")));
        assert_eq!(
            result.debug_log_path,
            Some(run_log_dir.join("alpha.debug.log"))
        );
        assert_eq!(
            fs::read_to_string(run_log_dir.join("alpha.log")).unwrap(),
            "log of alpha\n"
        );
        // marker copy is not kept
        assert!(!run_log_dir.join("alpha.exit").exists());
    }

    #[test]
    fn test_staging_archive_removed_after_run() {
        let fixture = Fixture::new();
        let transport = FakeTransport::default();
        let options = fixture.options();
        let staging = options.staging_dir.clone();
        let dispatcher = Dispatcher::new(&transport, options, InterruptToken::new());

        dispatcher
            .execute_on_targets(&fixture.targets, &fixture.payload, &[])
            .unwrap();

        assert!(!staging.join("fleetops-test-run.tar.gz").exists());
    }

    #[test]
    fn test_packaging_failure_falls_back_to_files() {
        let fixture = Fixture::new();
        let mut options = fixture.options();
        // a file where the staging directory should be
        let blocker = fixture.dir.path().join("blocked");
        fs::write(&blocker, "").unwrap();
        options.staging_dir = blocker;

        let transport = FakeTransport::default();
        let dispatcher = Dispatcher::new(&transport, options, InterruptToken::new());

        let run = dispatcher
            .execute_on_targets(&fixture.targets[..1], &fixture.payload, &[])
            .unwrap();

        assert!(run.targets[0].success);
        let calls = transport.calls_for("alpha");
        assert!(calls.contains(&"alpha mkdirs".to_string()));
        assert!(!calls.iter().any(|c| c.ends_with("unpack")));
        let sends: Vec<&String> = calls.iter().filter(|c| c.contains(" send ")).collect();
        assert_eq!(sends.len(), 2);
        assert!(sends[0].ends_with("/utils/common.sh"));
        assert!(sends[1].ends_with("/update.sh"));
    }

    #[test]
    fn test_missing_script_is_an_error() {
        let fixture = Fixture::new();
        let transport = FakeTransport::default();
        let dispatcher = Dispatcher::new(&transport, fixture.options(), InterruptToken::new());
        let payload = Payload::new(fixture.dir.path().join("absent.sh"));

        let err = dispatcher
            .execute_on_targets(&fixture.targets, &payload, &[])
            .unwrap_err();

        assert!(matches!(err, Error::ScriptNotFound(_)));
        assert!(transport.calls().is_empty());
    }

    #[test]
    fn test_observer_sees_every_stage() {
        #[derive(Default)]
        struct Recorder(Mutex<Vec<String>>);

        impl DispatchObserver for Recorder {
            fn on_target_start(&self, target: &RemoteTarget, index: usize, total: usize) {
                self.0
                    .lock()
                    .unwrap()
                    .push(format!("start {} {}/{total}", target.name, index + 1));
            }
            fn on_stage(&self, _target: &RemoteTarget, stage: Stage) {
                self.0.lock().unwrap().push(stage.to_string());
            }
            fn on_target_complete(&self, result: &PerTargetResult) {
                self.0.lock().unwrap().push(format!("done {}", result.target));
            }
        }

        let fixture = Fixture::new();
        let transport = FakeTransport::default();
        let recorder = Recorder::default();
        let dispatcher = Dispatcher::new(&transport, fixture.options(), InterruptToken::new())
            .with_observer(&recorder);

        dispatcher
            .execute_on_targets(&fixture.targets[..1], &fixture.payload, &[])
            .unwrap();

        assert_eq!(
            *recorder.0.lock().unwrap(),
            vec![
                "start alpha 1/1".to_string(),
                "provisioning".to_string(),
                "transferring".to_string(),
                "executing".to_string(),
                "collecting".to_string(),
                "cleaning up".to_string(),
                "done".to_string(),
                "done alpha".to_string(),
            ]
        );
    }

    #[test]
    fn test_run_id_shape() {
        let id = new_run_id();
        let pid = std::process::id().to_string();
        assert!(id.ends_with(&pid));
        assert_eq!(id.split('-').count(), 3);
    }
}
