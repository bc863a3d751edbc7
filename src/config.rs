//! Configuration file loading and schema validation (§6, §4.8).
//!
//! Validation happens eagerly at load time: a repo with both or neither of
//! `allowed_branches`/`blocked_branches` is a fatal config error, not something
//! discovered the first time a push touches it.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ForcePush {
    #[default]
    Deny,
    Allow,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RepoPolicy {
    pub upstream: String,
    #[serde(default)]
    pub protected_paths: Vec<String>,
    #[serde(default)]
    pub allowed_branches: Option<Vec<String>>,
    #[serde(default)]
    pub blocked_branches: Option<Vec<String>>,
    #[serde(default)]
    pub force_push: ForcePush,
    #[serde(default = "default_base_branch")]
    pub base_branch: String,
}

fn default_base_branch() -> String {
    "main".to_string()
}

/// Which branch-admission rule a repo uses, enforced to be exactly one at load time.
pub enum BranchPolicy<'a> {
    Allowed(&'a [String]),
    Blocked(&'a [String]),
}

impl RepoPolicy {
    pub fn branch_policy(&self) -> BranchPolicy<'_> {
        match (&self.allowed_branches, &self.blocked_branches) {
            (Some(a), None) => BranchPolicy::Allowed(a),
            (None, Some(b)) => BranchPolicy::Blocked(b),
            // Validated exclusively-one-of at load time; unreachable afterwards.
            _ => unreachable!("RepoPolicy branch policy invariant violated after validation"),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default)]
    ssh_key_path: Option<String>,
    repos: BTreeMap<String, RepoPolicy>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub ssh_key_path: Option<String>,
    pub repos: BTreeMap<String, RepoPolicy>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("repo '{repo}' must set exactly one of allowed_branches/blocked_branches (got {0})", .detail)]
    AmbiguousBranchPolicy { repo: String, detail: AmbiguityKind },
    #[error("repo '{repo}' has an empty upstream")]
    EmptyUpstream { repo: String },
}

#[derive(Debug)]
pub enum AmbiguityKind {
    Both,
    Neither,
}

impl fmt::Display for AmbiguityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AmbiguityKind::Both => write!(f, "both set"),
            AmbiguityKind::Neither => write!(f, "neither set"),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let raw: RawConfig = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;

        for (name, policy) in &raw.repos {
            if policy.upstream.trim().is_empty() {
                return Err(ConfigError::EmptyUpstream { repo: name.clone() });
            }
            match (&policy.allowed_branches, &policy.blocked_branches) {
                (Some(_), Some(_)) => {
                    return Err(ConfigError::AmbiguousBranchPolicy {
                        repo: name.clone(),
                        detail: AmbiguityKind::Both,
                    })
                }
                (None, None) => {
                    return Err(ConfigError::AmbiguousBranchPolicy {
                        repo: name.clone(),
                        detail: AmbiguityKind::Neither,
                    })
                }
                _ => {}
            }
        }

        Ok(Config {
            ssh_key_path: raw.ssh_key_path,
            repos: raw.repos,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        f
    }

    #[test]
    fn loads_valid_config() {
        let f = write_config(
            r#"{
                "repos": {
                    "demo": {
                        "upstream": "git@example.com:demo.git",
                        "allowed_branches": ["agent/*"],
                        "protected_paths": [".github/**"]
                    }
                }
            }"#,
        );
        let cfg = Config::load(f.path()).unwrap();
        let repo = cfg.repos.get("demo").unwrap();
        assert_eq!(repo.base_branch, "main");
        assert_eq!(repo.force_push, ForcePush::Deny);
        assert!(matches!(repo.branch_policy(), BranchPolicy::Allowed(_)));
    }

    #[test]
    fn rejects_both_branch_policies() {
        let f = write_config(
            r#"{
                "repos": {
                    "demo": {
                        "upstream": "git@example.com:demo.git",
                        "allowed_branches": ["agent/*"],
                        "blocked_branches": ["main"]
                    }
                }
            }"#,
        );
        assert!(matches!(
            Config::load(f.path()),
            Err(ConfigError::AmbiguousBranchPolicy { .. })
        ));
    }

    #[test]
    fn rejects_neither_branch_policy() {
        let f = write_config(
            r#"{
                "repos": {
                    "demo": {
                        "upstream": "git@example.com:demo.git"
                    }
                }
            }"#,
        );
        assert!(matches!(
            Config::load(f.path()),
            Err(ConfigError::AmbiguousBranchPolicy { .. })
        ));
    }
}
