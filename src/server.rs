//! HTTP Router (§4.6, §4.11): demultiplexes `/<repo>.git[/<tail>]` into the
//! gated git path, with `/health` and `/healthz` served first.

use actix_web::{web, App, HttpRequest, HttpResponse, HttpServer, ResponseError};

use crate::cgi::{self, CgiRequest};
use crate::context::AppState;
use crate::error::ProxyError;
use crate::mirror::Mirror;
use crate::receive;

/// Non-greedy match to the first `.git` boundary, allowing namespaced repo
/// names containing `/`.
fn split_repo_path(path: &str) -> Option<(String, String)> {
    let path = path.strip_prefix('/')?;
    let idx = path.find(".git")?;
    let repo = &path[..idx];
    if repo.is_empty() {
        return None;
    }
    let rest = &path[idx + 4..];
    Some((repo.to_string(), rest.to_string()))
}

async fn health() -> HttpResponse {
    HttpResponse::Ok()
        .content_type("application/json")
        .body(r#"{"status":"ok"}"#)
}

async fn git_handler(
    req: HttpRequest,
    body: web::Bytes,
    state: web::Data<AppState>,
) -> HttpResponse {
    let Some((repo, tail)) = split_repo_path(req.path()) else {
        return ProxyError::InvalidPath.error_response();
    };

    let Some(policy) = state.config.repos.get(&repo) else {
        return ProxyError::UnknownRepo(repo).error_response();
    };

    let result = state
        .serializer
        .with_exclusive(&repo, || async {
            serve_git_request(&req, &body, &state, &repo, policy, &tail).await
        })
        .await;

    match result {
        Ok(resp) => resp,
        Err(()) => ProxyError::HandlerFailure.error_response(),
    }
}

async fn serve_git_request(
    req: &HttpRequest,
    body: &web::Bytes,
    state: &AppState,
    repo: &str,
    policy: &crate::config::RepoPolicy,
    tail: &str,
) -> Result<HttpResponse, ()> {
    let mirror = Mirror::for_repo(&state.repos_dir, repo);

    if let Err(stderr) = mirror.sync(&state.ssh_env).await {
        log::error!("sync failed for repo '{repo}': {stderr}");
        return Ok(ProxyError::SyncFailed.error_response());
    }

    // The Receive Callback re-reads the same config by path and calls the
    // Validator directly (as the backend's pre-receive hook subprocess);
    // this handler only needs to run the CGI backend itself.
    let _ = policy;

    let script_name = format!("/{repo}.git");
    let query_string = req.query_string().to_string();
    let content_type = req
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());
    let content_length = req
        .headers()
        .get("content-length")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());
    let server_name = req.connection_info().host().to_string();
    let server_port = req
        .uri()
        .port_u16()
        .map(|p| p.to_string())
        .unwrap_or_else(|| "80".to_string());

    let cgi_req = CgiRequest {
        method: req.method().as_str(),
        query_string: &query_string,
        path_info: tail,
        script_name,
        server_name: &server_name,
        server_port: &server_port,
        headers: req.headers(),
        content_type,
        content_length,
        body: body.to_vec(),
    };

    match cgi::invoke(&mirror.path, cgi_req).await {
        Ok(resp) => {
            let mut builder = HttpResponse::build(
                actix_web::http::StatusCode::from_u16(resp.status)
                    .unwrap_or(actix_web::http::StatusCode::INTERNAL_SERVER_ERROR),
            );
            for (name, value) in &resp.headers {
                builder.insert_header((name.as_str(), value.as_str()));
            }
            Ok(builder.body(resp.body))
        }
        Err(e) => {
            log::error!("CGI gateway failed for repo '{repo}': {e:#}");
            Err(())
        }
    }
}

pub async fn run(state: AppState, port: u16) -> std::io::Result<()> {
    let state = web::Data::new(state);
    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .app_data(web::PayloadConfig::new(1024 * 1024 * 1024))
            .route("/health", web::get().to(health))
            .route("/healthz", web::get().to(health))
            .default_service(web::route().to(git_handler))
    })
    .bind(("0.0.0.0", port))?
    .run()
    .await
}

/// Entry point for `pre-receive <repo-name>` mode, delegated here so `main`
/// stays a thin dispatcher (§4.7).
pub async fn run_pre_receive(repos_dir: std::path::PathBuf, config: crate::config::Config, repo: &str) -> i32 {
    receive::run(&repos_dir, &config, repo).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_simple_repo() {
        let (repo, tail) = split_repo_path("/demo.git/info/refs").unwrap();
        assert_eq!(repo, "demo");
        assert_eq!(tail, "/info/refs");
    }

    #[test]
    fn splits_namespaced_repo() {
        let (repo, tail) = split_repo_path("/team/demo.git/git-upload-pack").unwrap();
        assert_eq!(repo, "team/demo");
        assert_eq!(tail, "/git-upload-pack");
    }

    #[test]
    fn rejects_path_without_dot_git() {
        assert!(split_repo_path("/health").is_none());
    }

    #[test]
    fn bare_repo_path_has_empty_tail() {
        let (repo, tail) = split_repo_path("/demo.git").unwrap();
        assert_eq!(repo, "demo");
        assert_eq!(tail, "");
    }
}
