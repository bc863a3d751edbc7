mod cgi;
mod cli;
mod config;
mod context;
mod error;
mod git;
mod glob;
mod mirror;
mod receive;
mod serializer;
mod server;
mod validator;

use clap::Parser;

use cli::{Cli, Command};
use config::Config;
use context::AppState;

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Some(Command::PreReceive { repo_name }) => {
            // Independent minimal logger: stdout/stderr are the hook's
            // contract channel, so informational logs stay on stderr (§4.7).
            cli::init_logging();
            let code = tokio::runtime::Runtime::new()
                .expect("failed to create Tokio runtime")
                .block_on(run_pre_receive(&repo_name));
            std::process::exit(code);
        }
        None => {
            cli::init_logging();
            tokio::runtime::Runtime::new()
                .expect("failed to create Tokio runtime")
                .block_on(run_server());
        }
    }
}

async fn run_pre_receive(repo_name: &str) -> i32 {
    let config = match Config::load(&cli::config_path()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: failed to load config: {e}");
            return 1;
        }
    };
    server::run_pre_receive(cli::repos_dir(), config, repo_name).await
}

async fn run_server() {
    let config = match Config::load(&cli::config_path()) {
        Ok(c) => c,
        Err(e) => {
            log::error!("fatal config error: {e}");
            std::process::exit(1);
        }
    };

    let repos_dir = cli::repos_dir();
    if let Err(e) = std::fs::create_dir_all(&repos_dir) {
        log::error!("fatal: could not create REPOS_DIR {}: {e}", repos_dir.display());
        std::process::exit(1);
    }

    let proxy_binary = std::env::current_exe().unwrap_or_else(|_| "git-guard-proxy".into());
    let state = AppState::new(config, repos_dir.clone());

    for (name, policy) in &state.config.repos {
        if let Err(e) = mirror::bootstrap_repo(&repos_dir, name, policy, &state.ssh_env, &proxy_binary).await {
            log::error!("fatal: bootstrap failed for repo '{name}': {e:#}");
            std::process::exit(1);
        }
    }

    let port = cli::http_port();
    log::info!("listening on 0.0.0.0:{port}");
    if let Err(e) = server::run(state, port).await {
        log::error!("fatal: server error: {e}");
        std::process::exit(1);
    }
}
