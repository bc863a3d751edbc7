//! The Git Invoker (§2 item 2, §4.0): a uniform subprocess runner for git commands.
//!
//! Mirrors the "capture stdout/stderr/status, never inherit" discipline used
//! throughout this codebase's other subprocess helpers.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;

/// The all-zero oid sentinel meaning "no such object".
pub const ZERO_OID: &str = "0000000000000000000000000000000000000000";

#[derive(Debug, Clone)]
pub struct GitOutput {
    pub status_ok: bool,
    pub stdout: String,
    pub stderr: String,
}

impl GitOutput {
    pub fn stdout_lines(&self) -> impl Iterator<Item = &str> {
        self.stdout.lines().filter(|l| !l.trim().is_empty())
    }
}

/// How to build the environment for a git subprocess invocation.
pub enum Env<'a> {
    /// Merge these variables onto the ambient process environment.
    Overlay(&'a HashMap<String, String>),
    /// Replace the environment entirely with these variables. Used for the
    /// upstream push so the git-http-backend's quarantine variable cannot leak
    /// through (§5, §9).
    Replace(&'a HashMap<String, String>),
}

/// Runs `git <args>` in `work_dir`, capturing output rather than inheriting it.
pub async fn run(work_dir: &Path, args: &[&str], env: Env<'_>) -> std::io::Result<GitOutput> {
    let mut cmd = Command::new("git");
    cmd.args(args)
        .current_dir(work_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    match env {
        Env::Overlay(vars) => {
            for (k, v) in vars {
                cmd.env(k, v);
            }
        }
        Env::Replace(vars) => {
            cmd.env_clear();
            for (k, v) in vars {
                cmd.env(k, v);
            }
        }
    }

    let output = cmd.output().await?;
    Ok(GitOutput {
        status_ok: output.status.success(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

/// Convenience wrapper for read-only commands that only care about success/failure,
/// e.g. `git merge-base --is-ancestor` and `git rev-parse --verify`.
pub async fn succeeds(work_dir: &Path, args: &[&str], env: &HashMap<String, String>) -> bool {
    run(work_dir, args, Env::Overlay(env))
        .await
        .map(|o| o.status_ok)
        .unwrap_or(false)
}

/// Runs a command and returns trimmed stdout if it exits zero, `None` otherwise.
pub async fn capture(
    work_dir: &Path,
    args: &[&str],
    env: &HashMap<String, String>,
) -> Option<String> {
    let out = run(work_dir, args, Env::Overlay(env)).await.ok()?;
    if out.status_ok {
        Some(out.stdout.trim().to_string())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[tokio::test]
    async fn runs_git_version() {
        let dir = tempfile::tempdir().unwrap();
        let env = HashMap::new();
        let out = run(dir.path(), &["--version"], Env::Overlay(&env))
            .await
            .unwrap();
        assert!(out.status_ok);
        assert!(out.stdout.starts_with("git version"));
    }

    #[tokio::test]
    async fn capture_none_on_failure() {
        let dir = tempfile::tempdir().unwrap();
        let env = HashMap::new();
        let result = capture(dir.path(), &["rev-parse", "--verify", "nope"], &env).await;
        assert!(result.is_none());
    }
}
