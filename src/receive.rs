//! Receive Callback (§4.4): invoked by the git backend during receive-pack,
//! re-entrant into this same binary as `pre-receive <repo-name>`.

use std::io::Read;
use std::path::Path;

use crate::config::Config;
use crate::context::forward_env;
use crate::validator::{validate_and_push, RefUpdate, ValidatorContext};

/// Parses stdin's `<old> <new> <ref>` lines (§4.4). A malformed line is a
/// fatal diagnostic (§7 kind 6), not a collected validation error.
fn parse_updates(input: &str) -> Result<Vec<RefUpdate>, String> {
    let mut updates = Vec::new();
    for line in input.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let mut parts = line.splitn(3, ' ');
        let (Some(old), Some(new), Some(ref_name)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(format!("malformed pre-receive input line: {line:?}"));
        };
        if old.len() != 40 || new.len() != 40 {
            return Err(format!("malformed oid in pre-receive input line: {line:?}"));
        }
        updates.push(RefUpdate {
            old_oid: old.to_string(),
            new_oid: new.to_string(),
            ref_name: ref_name.to_string(),
        });
    }
    Ok(updates)
}

/// Runs the pre-receive hook for `repo_name`, reading ref updates from `stdin`,
/// returning the process exit code per §4.4/§6: 0 on accept, 1 on reject or
/// unknown-repo.
pub async fn run(repos_dir: &Path, config: &Config, repo_name: &str) -> i32 {
    let mut input = String::new();
    if std::io::stdin().read_to_string(&mut input).is_err() {
        eprintln!("error: failed to read pre-receive input from stdin");
        return 1;
    }

    if input.trim().is_empty() {
        println!("ok");
        return 0;
    }

    let updates = match parse_updates(&input) {
        Ok(u) => u,
        Err(msg) => {
            eprintln!("error: {msg}");
            return 1;
        }
    };

    let Some(policy) = config.repos.get(repo_name) else {
        eprintln!("error: unknown repo: {repo_name}");
        return 1;
    };

    let mirror_path = repos_dir.join(format!("{repo_name}.git"));
    let ssh_env = crate::context::build_ssh_env(config);
    let fwd_env = forward_env(&ssh_env);

    let ctx = ValidatorContext {
        mirror_path: &mirror_path,
        policy,
        ssh_env: &ssh_env,
        forward_env: &fwd_env,
    };

    let outcome = validate_and_push(updates, &ctx).await;

    if outcome.allowed {
        println!("ok - {}", outcome.message);
        0
    } else {
        eprint!("{}", outcome.message);
        1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_lines() {
        let old = "0".repeat(40);
        let new = "a".repeat(40);
        let input = format!("{old} {new} refs/heads/main\n");
        let updates = parse_updates(&input).unwrap();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].ref_name, "refs/heads/main");
    }

    #[test]
    fn empty_input_is_empty_list() {
        assert_eq!(parse_updates("").unwrap().len(), 0);
        assert_eq!(parse_updates("   \n  \n").unwrap().len(), 0);
    }

    #[test]
    fn rejects_malformed_line() {
        assert!(parse_updates("not a valid line").is_err());
    }
}
