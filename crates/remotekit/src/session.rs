//! Per-target remote paths and the commands that act on them.

/// Remote paths owned by one target's execution.
///
/// Everything here is removed again in the clean-up step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteSession {
    pub work_dir: String,
    pub log_path: String,
    pub debug_log_path: String,
    pub exit_marker_path: String,
}

/// Environment handed to the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecEnv {
    /// Value of `LOG_LEVEL` on the remote side
    pub log_level: String,
}

impl Default for ExecEnv {
    fn default() -> Self {
        Self {
            log_level: "INFO".to_string(),
        }
    }
}

impl RemoteSession {
    /// Paths under `base` for `target`, namespaced by `run_id`.
    pub fn new(base: &str, run_id: &str, target: &str) -> Self {
        let base = base.trim_end_matches('/');
        let stem = format!("{base}/fleetops-{}-{}", sanitize(run_id), sanitize(target));
        Self {
            work_dir: stem.clone(),
            log_path: format!("{stem}.log"),
            debug_log_path: format!("{stem}.debug.log"),
            exit_marker_path: format!("{stem}.exit"),
        }
    }

    /// Where the payload archive is uploaded.
    pub fn archive_path(&self) -> String {
        format!("{}/payload.tar.gz", self.work_dir)
    }

    /// Remove any stale directory with the same name, then recreate it.
    pub fn provision_command(&self) -> String {
        let dir = shell_quote(&self.work_dir);
        format!("rm -rf {dir} && mkdir -p {dir}")
    }

    /// Unpack the uploaded archive into the work dir and delete it.
    pub fn unpack_command(&self) -> String {
        let archive = shell_quote(&self.archive_path());
        format!(
            "tar -xzf {archive} -C {} && rm -f {archive}",
            shell_quote(&self.work_dir)
        )
    }

    /// Create subdirectories of the work dir for individual uploads.
    pub fn mkdirs_command<'a>(&self, relative_dirs: impl IntoIterator<Item = &'a str>) -> String {
        let dirs: Vec<String> = relative_dirs
            .into_iter()
            .map(|d| shell_quote(&self.remote_path(d)))
            .collect();
        format!("mkdir -p {}", dirs.join(" "))
    }

    /// Absolute remote path of a payload entry.
    pub fn remote_path(&self, relative: &str) -> String {
        format!("{}/{}", self.work_dir, relative.trim_start_matches('/'))
    }

    /// Run the payload and record its exit code in the marker file.
    ///
    /// The marker is written as a separate step after the payload returns.
    /// The exit status of the whole ssh invocation is not a reliable stand-in
    /// once `cd`, the environment and redirection are chained in front of it.
    pub fn execute_command(&self, script: &str, args: &[String], env: &ExecEnv) -> String {
        let work_dir = shell_quote(&self.work_dir);
        let mut invocation = format!(
            "cd {work_dir} && env NON_INTERACTIVE=1 UTILITYPATH={work_dir} LOG_FILE={} LOG_LEVEL={} bash {}",
            shell_quote(&self.debug_log_path),
            shell_quote(&env.log_level),
            shell_quote(&self.remote_path(script)),
        );
        for arg in args {
            invocation.push(' ');
            invocation.push_str(&shell_quote(arg));
        }

        format!(
            "{invocation} > {} 2>&1; echo $? > {}",
            shell_quote(&self.log_path),
            shell_quote(&self.exit_marker_path)
        )
    }

    /// Remove the work dir, both logs and the marker.
    pub fn cleanup_command(&self) -> String {
        format!(
            "rm -rf {} {} {} {}",
            shell_quote(&self.work_dir),
            shell_quote(&self.log_path),
            shell_quote(&self.debug_log_path),
            shell_quote(&self.exit_marker_path)
        )
    }
}

/// Parse the contents of an exit marker file.
pub fn parse_exit_marker(content: &str) -> Option<i32> {
    content.trim().parse().ok()
}

/// Quote `value` for a POSIX shell.
pub fn shell_quote(value: &str) -> String {
    let safe = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:@%+,".contains(c));
    if safe {
        value.to_string()
    } else {
        format!("'{}'", value.replace('\'', "'\\''"))
    }
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> RemoteSession {
        RemoteSession::new("/tmp/", "20260101-120000-42", "pve1")
    }

    #[test]
    fn test_paths() {
        let s = session();
        assert_eq!(s.work_dir, "/tmp/fleetops-20260101-120000-42-pve1");
        assert_eq!(s.log_path, "/tmp/fleetops-20260101-120000-42-pve1.log");
        assert_eq!(s.debug_log_path, "/tmp/fleetops-20260101-120000-42-pve1.debug.log");
        assert_eq!(s.exit_marker_path, "/tmp/fleetops-20260101-120000-42-pve1.exit");
        assert_eq!(s.archive_path(), "/tmp/fleetops-20260101-120000-42-pve1/payload.tar.gz");
    }

    #[test]
    fn test_target_name_is_sanitized() {
        let s = RemoteSession::new("/tmp", "r1", "node 1/../x");
        assert_eq!(s.work_dir, "/tmp/fleetops-r1-node_1____x");
    }

    #[test]
    fn test_provision_is_idempotent_command() {
        assert_eq!(
            session().provision_command(),
            "rm -rf /tmp/fleetops-20260101-120000-42-pve1 && mkdir -p /tmp/fleetops-20260101-120000-42-pve1"
        );
    }

    #[test]
    fn test_execute_writes_marker_after_payload() {
        let s = RemoteSession::new("/tmp", "r1", "pve1");
        let command = s.execute_command(
            "update.sh",
            &["--force".to_string(), "it's".to_string()],
            &ExecEnv::default(),
        );

        assert_eq!(
            command,
            "cd /tmp/fleetops-r1-pve1 && env NON_INTERACTIVE=1 UTILITYPATH=/tmp/fleetops-r1-pve1 \
             LOG_FILE=/tmp/fleetops-r1-pve1.debug.log LOG_LEVEL=INFO bash /tmp/fleetops-r1-pve1/update.sh \
             --force 'it'\\''s' > /tmp/fleetops-r1-pve1.log 2>&1; echo $? > /tmp/fleetops-r1-pve1.exit"
        );
    }

    #[test]
    fn test_cleanup_removes_everything() {
        let s = RemoteSession::new("/tmp", "r1", "pve1");
        let command = s.cleanup_command();
        for path in [&s.work_dir, &s.log_path, &s.debug_log_path, &s.exit_marker_path] {
            assert!(command.contains(path.as_str()));
        }
    }

    #[test]
    fn test_mkdirs() {
        let s = RemoteSession::new("/tmp", "r1", "pve1");
        assert_eq!(
            s.mkdirs_command(["utils", "utils/net"]),
            "mkdir -p /tmp/fleetops-r1-pve1/utils /tmp/fleetops-r1-pve1/utils/net"
        );
    }

    #[test]
    fn test_parse_exit_marker() {
        assert_eq!(parse_exit_marker("0\n"), Some(0));
        assert_eq!(parse_exit_marker(" 127 "), Some(127));
        assert_eq!(parse_exit_marker(""), None);
        assert_eq!(parse_exit_marker("oops"), None);
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("plain-file.sh"), "plain-file.sh");
        assert_eq!(shell_quote(""), "''");
        assert_eq!(shell_quote("two words"), "'two words'");
        assert_eq!(shell_quote("$(rm -rf /)"), "'$(rm -rf /)'");
        assert_eq!(shell_quote("it's"), "'it'\\''s'");
    }
}
