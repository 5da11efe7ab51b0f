//! Shell scripts standing in for the `docker` and `git` CLIs in tests.
//!
//! Every invocation appends its arguments to a log file next to the script.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

/// Stderr printed by a failing `docker start`
pub const COMPILE_ERROR: &str = "./main.go:3:1: syntax error";

/// Behavior of a fake `docker`.
#[derive(Debug, Clone, Default)]
pub struct FakeDocker {
    /// Seconds `docker create` sleeps before succeeding
    pub create_delay: Option<&'static str>,
    /// Seconds `docker rm` sleeps
    pub rm_delay: Option<&'static str>,
    /// Exit code of `docker start --attach`
    pub start_exit: i32,
    pub copy_out_fails: bool,
}

/// An installed fake tool.
#[derive(Debug)]
pub struct Installed {
    pub path: PathBuf,
    log: PathBuf,
}

impl Installed {
    /// Logged invocations, oldest first.
    pub fn calls(&self) -> Vec<String> {
        std::fs::read_to_string(&self.log)
            .map(|log| log.lines().map(str::to_string).collect())
            .unwrap_or_default()
    }

    /// First word of every logged invocation.
    pub fn subcommands(&self) -> Vec<String> {
        self.calls()
            .iter()
            .filter_map(|call| call.split_whitespace().next().map(str::to_string))
            .collect()
    }
}

impl FakeDocker {
    pub fn install(&self, dir: &Path) -> Installed {
        let sleep = |delay: Option<&str>| {
            delay.map(|secs| format!("sleep {secs}")).unwrap_or_default()
        };
        let start = if self.start_exit == 0 {
            "exit 0".to_string()
        } else {
            format!("echo '{COMPILE_ERROR}' >&2; exit {}", self.start_exit)
        };
        let copy_out = if self.copy_out_fails {
            "echo 'Error: No such container:path' >&2; exit 1"
        } else {
            r#"mkdir -p "$3" && echo binary > "$3/app""#
        };

        let body = format!(
            r#"case "$1" in
  create) {create} ;;
  start) {start} ;;
  inspect) echo false ;;
  cp)
    case "$2" in
      *:*) {copy_out} ;;
    esac ;;
  rm) {rm} ;;
esac
exit 0
"#,
            create = sleep(self.create_delay),
            rm = sleep(self.rm_delay),
        );
        install(dir, "docker", &body)
    }
}

/// A fake `git` that creates the clone destination, its last argument.
pub fn fake_git(dir: &Path) -> Installed {
    install(dir, "git", "eval dest=\\${$#}\nmkdir -p \"$dest\"\n")
}

/// A fake `git` that always fails like an unknown repository.
pub fn failing_git(dir: &Path) -> Installed {
    install(dir, "git", "echo 'fatal: repository not found' >&2\nexit 128\n")
}

fn install(dir: &Path, name: &str, body: &str) -> Installed {
    let path = dir.join(name);
    let log = dir.join(format!("{name}.log"));
    let script = format!("#!/bin/sh\necho \"$*\" >> '{}'\n{}", log.display(), body);

    std::fs::write(&path, script).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    Installed { path, log }
}
