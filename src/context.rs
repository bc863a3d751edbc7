//! Process-wide shared state (§3 AppState, §6 SSH environment).

use std::collections::HashMap;
use std::path::PathBuf;

use crate::config::Config;
use crate::serializer::PerRepoSerializer;

pub struct AppState {
    pub config: Config,
    pub repos_dir: PathBuf,
    pub serializer: PerRepoSerializer,
    /// Overlay applied to every git invocation that may reach upstream.
    pub ssh_env: HashMap<String, String>,
}

impl AppState {
    pub fn new(config: Config, repos_dir: PathBuf) -> Self {
        let ssh_env = build_ssh_env(&config);
        AppState {
            config,
            repos_dir,
            serializer: PerRepoSerializer::new(),
            ssh_env,
        }
    }
}

/// Computes `GIT_SSH_COMMAND` per §6: runtime config wins over the config file,
/// falling back to any ambient `GIT_SSH_COMMAND`, warning and proceeding with an
/// empty overlay if neither is set.
pub fn build_ssh_env(config: &Config) -> HashMap<String, String> {
    let key_path = std::env::var("GIT_SSH_KEY_PATH")
        .ok()
        .or_else(|| config.ssh_key_path.clone());

    let mut env = HashMap::new();
    if let Some(key_path) = key_path {
        env.insert(
            "GIT_SSH_COMMAND".to_string(),
            format!(
                "ssh -i {key_path} -o StrictHostKeyChecking=accept-new -o UserKnownHostsFile=/dev/null"
            ),
        );
    } else if let Ok(ambient) = std::env::var("GIT_SSH_COMMAND") {
        env.insert("GIT_SSH_COMMAND".to_string(), ambient);
    } else {
        log::warn!("no GIT_SSH_KEY_PATH configured and no ambient GIT_SSH_COMMAND set; upstream git operations will use the default SSH configuration");
    }
    env
}

/// The git-backend variables that expose the receive-pack quarantine area to
/// hooks. All must be dropped before the Forwarder's `git push`, or the push
/// would see the quarantine's temporary object store instead of the mirror's
/// real one (§5, §9).
pub const QUARANTINE_VARS: &[&str] = &[
    "GIT_QUARANTINE_PATH",
    "GIT_OBJECT_DIRECTORY",
    "GIT_ALTERNATE_OBJECT_DIRECTORIES",
];

/// Builds the ambient-environment-minus-quarantine map used as the base for
/// the Forwarder's full-replacement environment (§5, §9).
pub fn forward_env(ssh_env: &HashMap<String, String>) -> HashMap<String, String> {
    let mut env: HashMap<String, String> = std::env::vars()
        .filter(|(k, _)| !QUARANTINE_VARS.contains(&k.as_str()))
        .collect();
    for (k, v) in ssh_env {
        env.insert(k.clone(), v.clone());
    }
    env
}
