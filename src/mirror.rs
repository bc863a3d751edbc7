//! Mirror Store, Upstream Syncer, and Bootstrap (§2 items 1/4, §4.2, §4.10).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::config::RepoPolicy;
use crate::git::{self, Env};

pub struct Mirror {
    pub path: PathBuf,
}

impl Mirror {
    pub fn for_repo(repos_dir: &Path, name: &str) -> Self {
        Mirror {
            path: repos_dir.join(format!("{name}.git")),
        }
    }

    pub fn exists(&self) -> bool {
        self.path.is_dir()
    }

    /// `git fetch origin --prune` against the mirror (§4.2). A failure here is
    /// surfaced by the caller as HTTP 500 with the fixed text in §4.2.
    pub async fn sync(&self, ssh_env: &HashMap<String, String>) -> Result<(), String> {
        let out = git::run(&self.path, &["fetch", "origin", "--prune"], Env::Overlay(ssh_env))
            .await
            .map_err(|e| e.to_string())?;
        if out.status_ok {
            Ok(())
        } else {
            Err(out.stderr)
        }
    }
}

/// Idempotent bootstrap for one repo (§4.10): creates the bare mirror, configures
/// `origin`, installs the pre-receive hook, and performs an initial sync.
pub async fn bootstrap_repo(
    repos_dir: &Path,
    name: &str,
    policy: &RepoPolicy,
    ssh_env: &HashMap<String, String>,
    proxy_binary: &Path,
) -> anyhow::Result<()> {
    let mirror = Mirror::for_repo(repos_dir, name);

    if !mirror.exists() {
        std::fs::create_dir_all(&mirror.path)?;
        let env = HashMap::new();
        let init = git::run(&mirror.path, &["init", "--bare"], Env::Overlay(&env)).await?;
        if !init.status_ok {
            anyhow::bail!("git init --bare failed for {name}: {}", init.stderr);
        }

        let remote_add = git::run(
            &mirror.path,
            &["remote", "add", "origin", &policy.upstream],
            Env::Overlay(&env),
        )
        .await?;
        if !remote_add.status_ok {
            anyhow::bail!("git remote add failed for {name}: {}", remote_add.stderr);
        }

        for (key, value) in [
            (
                "remote.origin.fetch",
                "+refs/heads/*:refs/heads/*".to_string(),
            ),
            ("http.receivepack", "true".to_string()),
        ] {
            let out = git::run(&mirror.path, &["config", key, &value], Env::Overlay(&env)).await?;
            if !out.status_ok {
                anyhow::bail!("git config {key} failed for {name}: {}", out.stderr);
            }
        }
    }

    install_pre_receive_hook(&mirror.path, name, proxy_binary)?;

    if let Err(stderr) = mirror.sync(ssh_env).await {
        log::warn!("initial sync for repo '{name}' failed (will retry on next request): {stderr}");
    }

    Ok(())
}

/// Writes `hooks/pre-receive` as a shell wrapper invoking this binary's
/// `pre-receive <repo-name>` mode, rewritten on every bootstrap so upgrades
/// also upgrade the hook in place (§4.10).
fn install_pre_receive_hook(mirror_path: &Path, name: &str, proxy_binary: &Path) -> anyhow::Result<()> {
    let hooks_dir = mirror_path.join("hooks");
    std::fs::create_dir_all(&hooks_dir)?;
    let hook_path = hooks_dir.join("pre-receive");
    let script = format!(
        "#!/bin/sh\nexec {} pre-receive {}\n",
        shell_quote(&proxy_binary.display().to_string()),
        shell_quote(name),
    );
    std::fs::write(&hook_path, script)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = std::fs::metadata(&hook_path)?.permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&hook_path, perms)?;
    }

    Ok(())
}

fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "'\\''"))
}
