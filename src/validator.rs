//! Validator / Forwarder (§4.5): the core push-validation and
//! upstream-forwarding state machine.

use std::collections::HashMap;
use std::path::Path;

use crate::config::{BranchPolicy, ForcePush, RepoPolicy};
use crate::git::{self, Env, ZERO_OID};
use crate::glob::PatternSet;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefUpdate {
    pub old_oid: String,
    pub new_oid: String,
    pub ref_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateClass {
    Create,
    Delete,
    FastForward,
    ForceUpdate,
}

impl RefUpdate {
    pub fn branch_name(&self) -> Option<&str> {
        self.ref_name.strip_prefix("refs/heads/")
    }

    fn is_create(&self) -> bool {
        self.old_oid == ZERO_OID && self.new_oid != ZERO_OID
    }

    fn is_delete(&self) -> bool {
        self.old_oid != ZERO_OID && self.new_oid == ZERO_OID
    }
}

fn short(oid: &str) -> &str {
    &oid[..oid.len().min(8)]
}

pub struct ValidatorContext<'a> {
    pub mirror_path: &'a Path,
    pub policy: &'a RepoPolicy,
    pub ssh_env: &'a HashMap<String, String>,
    /// Ambient environment with the CGI quarantine variable already stripped,
    /// used as the base for the upstream push's full-replacement environment (§5, §9).
    pub forward_env: &'a HashMap<String, String>,
}

pub struct ValidationOutcome {
    pub allowed: bool,
    pub message: String,
}

struct Accepted {
    update: RefUpdate,
    class: UpdateClass,
    is_force_push: bool,
}

/// Two-pass protocol: validate everything (collecting every failure), then,
/// only on full success, forward everything to upstream in order.
pub async fn validate_and_push(updates: Vec<RefUpdate>, ctx: &ValidatorContext<'_>) -> ValidationOutcome {
    let mut errors: Vec<String> = Vec::new();
    let mut accepted: Vec<Accepted> = Vec::new();

    for update in updates {
        match validate_one(&update, ctx).await {
            Ok((class, is_force_push)) => accepted.push(Accepted {
                update,
                class,
                is_force_push,
            }),
            Err(msg) => errors.push(msg),
        }
    }

    if !errors.is_empty() {
        return ValidationOutcome {
            allowed: false,
            message: crate::error::rejection_envelope(&errors),
        };
    }

    for item in &accepted {
        if let Err(stderr) = push_one(item, ctx).await {
            let msg = format!("Failed to push to upstream:\n{stderr}");
            return ValidationOutcome {
                allowed: false,
                message: crate::error::rejection_envelope(&[msg]),
            };
        }
    }

    ValidationOutcome {
        allowed: true,
        message: "All refs validated and pushed successfully".to_string(),
    }
}

/// Runs the four checks of §4.5 for a single update. Returns the classification
/// and whether this is a force push on success, or the rejection message on failure.
async fn validate_one(
    update: &RefUpdate,
    ctx: &ValidatorContext<'_>,
) -> Result<(UpdateClass, bool), String> {
    // 1. Branch admission.
    let Some(branch) = update.branch_name() else {
        return Err(format!(
            "Only branch pushes allowed (refs/heads/*), got: {}",
            update.ref_name
        ));
    };

    match ctx.policy.branch_policy() {
        BranchPolicy::Allowed(patterns) => {
            let set = PatternSet::branches(patterns);
            if !set.is_match(branch) {
                return Err(format!(
                    "Branch '{branch}' is not in allowed list. Allowed patterns: {}",
                    set.joined()
                ));
            }
        }
        BranchPolicy::Blocked(patterns) => {
            let set = PatternSet::branches(patterns);
            if set.is_match(branch) {
                return Err(format!(
                    "Branch '{branch}' is blocked. Blocked patterns: {}",
                    set.joined()
                ));
            }
        }
    }

    // 2. Force-push classification.
    let (class, is_force_push) = classify(update, ctx).await?;

    // 3. Divergence check (skipped for force pushes and creates).
    if !is_force_push && class != UpdateClass::Create {
        if let Some(branch) = update.branch_name() {
            let remote_ref = format!("refs/remotes/origin/{branch}");
            if let Some(remote_oid) =
                git::capture(ctx.mirror_path, &["rev-parse", "--verify", &remote_ref], ctx.ssh_env).await
            {
                if remote_oid != update.old_oid {
                    return Err(format!(
                        "Upstream has diverged. Expected: {}, Actual: {}. Please fetch and rebase.",
                        short(&update.old_oid),
                        short(&remote_oid)
                    ));
                }
            }
            // No such branch upstream yet — accept.
        }
    }

    // 4. Protected-path check.
    check_protected_paths(update, class, ctx).await?;

    Ok((class, is_force_push))
}

async fn classify(
    update: &RefUpdate,
    ctx: &ValidatorContext<'_>,
) -> Result<(UpdateClass, bool), String> {
    if update.is_create() {
        return Ok((UpdateClass::Create, false));
    }
    if update.is_delete() {
        if ctx.policy.force_push == ForcePush::Deny {
            return Err("Branch deletion is not allowed (force_push: deny)".to_string());
        }
        return Ok((UpdateClass::Delete, false));
    }

    let is_ancestor = git::succeeds(
        ctx.mirror_path,
        &[
            "merge-base",
            "--is-ancestor",
            &update.old_oid,
            &update.new_oid,
        ],
        ctx.ssh_env,
    )
    .await;

    if is_ancestor {
        Ok((UpdateClass::FastForward, false))
    } else if ctx.policy.force_push == ForcePush::Deny {
        Err(format!(
            "Force push detected and not allowed. Old: {}, New: {}",
            short(&update.old_oid),
            short(&update.new_oid)
        ))
    } else {
        Ok((UpdateClass::ForceUpdate, true))
    }
}

async fn check_protected_paths(
    update: &RefUpdate,
    class: UpdateClass,
    ctx: &ValidatorContext<'_>,
) -> Result<(), String> {
    if ctx.policy.protected_paths.is_empty() {
        return Ok(());
    }
    if class == UpdateClass::Delete {
        return Ok(());
    }

    let base_ref = format!("refs/remotes/origin/{}", ctx.policy.base_branch);
    let Some(base_oid) =
        git::capture(ctx.mirror_path, &["rev-parse", "--verify", &base_ref], ctx.ssh_env).await
    else {
        return Err(format!(
            "Base branch origin/{} not found. Cannot validate protected paths.",
            ctx.policy.base_branch
        ));
    };

    let base_spec = format!("origin/{}", ctx.policy.base_branch);

    let rev_list = git::run(
        ctx.mirror_path,
        &["rev-list", &update.new_oid, "--not", &base_spec],
        Env::Overlay(ctx.ssh_env),
    )
    .await
    .map_err(|e| e.to_string())?;
    if !rev_list.status_ok {
        return Err(format!(
            "Failed to compute new commits against origin/{}: {}",
            ctx.policy.base_branch, rev_list.stderr
        ));
    }
    if rev_list.stdout_lines().next().is_none() {
        // New tip already reachable from base: fast-forwarding to or past base.
        return Ok(());
    }

    let diff = git::run(
        ctx.mirror_path,
        &["diff", "--name-only", &base_spec, &update.new_oid],
        Env::Overlay(ctx.ssh_env),
    )
    .await
    .map_err(|e| e.to_string())?;
    if !diff.status_ok {
        return Err(format!("Failed to diff against origin/{}: {}", ctx.policy.base_branch, diff.stderr));
    }

    let _ = base_oid; // only needed to confirm the base ref resolves
    let patterns = PatternSet::protected_paths(&ctx.policy.protected_paths);
    let violations: Vec<&str> = diff.stdout_lines().filter(|p| patterns.is_match(p)).collect();

    if violations.is_empty() {
        Ok(())
    } else {
        let mut msg = String::from("Changes to protected paths detected:\n");
        for path in violations {
            msg.push_str(&format!("  - {path}\n"));
        }
        Err(msg.trim_end().to_string())
    }
}

async fn push_one(item: &Accepted, ctx: &ValidatorContext<'_>) -> Result<(), String> {
    let branch = item
        .update
        .branch_name()
        .expect("branch admission already validated this is a refs/heads/* update");

    let args: Vec<String> = match item.class {
        UpdateClass::Delete => vec!["push".into(), "origin".into(), "--delete".into(), branch.into()],
        UpdateClass::ForceUpdate => vec![
            "push".into(),
            "--force".into(),
            "origin".into(),
            format!("{}:refs/heads/{branch}", item.update.new_oid),
        ],
        UpdateClass::Create | UpdateClass::FastForward => vec![
            "push".into(),
            "origin".into(),
            format!("{}:refs/heads/{branch}", item.update.new_oid),
        ],
    };
    let args_ref: Vec<&str> = args.iter().map(|s| s.as_str()).collect();

    let out = git::run(ctx.mirror_path, &args_ref, Env::Replace(ctx.forward_env))
        .await
        .map_err(|e| e.to_string())?;
    if out.status_ok {
        Ok(())
    } else {
        Err(out.stderr)
    }
}
