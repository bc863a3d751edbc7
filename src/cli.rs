//! CLI & Process Entry Point (§4.7, §6): one binary, two modes.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "git-guard-proxy", version, about = "Guarding git proxy")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run as a git pre-receive hook for the named repo, reading ref updates from stdin.
    PreReceive { repo_name: String },
}

pub fn config_path() -> PathBuf {
    std::env::var("GIT_PROXY_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/etc/git-proxy/config.json"))
}

pub fn repos_dir() -> PathBuf {
    std::env::var("REPOS_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/var/lib/git-proxy/repos"))
}

pub fn http_port() -> u16 {
    std::env::var("HTTP_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(8080)
}

pub fn init_logging() {
    let level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    let mut builder = env_logger::Builder::new();
    builder.parse_filters(&level);
    let _ = builder.try_init();
}
