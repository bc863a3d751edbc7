//! CGI Gateway (§4.3): wraps `git-http-backend` as a CGI child process.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use actix_web::http::header::HeaderMap;
use once_cell::sync::OnceCell;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;

const CANDIDATE_BACKENDS: &[&str] = &[
    "/usr/lib/git-core/git-http-backend",
    "/usr/libexec/git-core/git-http-backend",
];

static BACKEND_PATH: OnceCell<PathBuf> = OnceCell::new();

/// Locates `git-http-backend` once and caches the result (§4.3, §5: the
/// backend-locator cache is read-mostly and populated on first use).
pub async fn locate_backend() -> anyhow::Result<&'static Path> {
    if let Some(p) = BACKEND_PATH.get() {
        return Ok(p.as_path());
    }

    for candidate in CANDIDATE_BACKENDS {
        if tokio::fs::metadata(candidate).await.is_ok() {
            let _ = BACKEND_PATH.set(PathBuf::from(candidate));
            return Ok(BACKEND_PATH.get().unwrap().as_path());
        }
    }

    if let Ok(out) = Command::new("git").arg("--exec-path").output().await {
        if out.status.success() {
            let exec_path = String::from_utf8_lossy(&out.stdout).trim().to_string();
            let candidate = PathBuf::from(exec_path).join("git-http-backend");
            if tokio::fs::metadata(&candidate).await.is_ok() {
                let _ = BACKEND_PATH.set(candidate);
                return Ok(BACKEND_PATH.get().unwrap().as_path());
            }
        }
    }

    anyhow::bail!("could not locate git-http-backend in any candidate path")
}

pub struct CgiRequest<'a> {
    pub method: &'a str,
    pub query_string: &'a str,
    pub path_info: &'a str,
    pub script_name: String,
    pub server_name: &'a str,
    pub server_port: &'a str,
    pub headers: &'a HeaderMap,
    pub content_type: Option<String>,
    pub content_length: Option<String>,
    pub body: Vec<u8>,
}

pub struct CgiResponse {
    pub status: u16,
    pub reason: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

/// Spawns the backend with `GIT_PROJECT_ROOT` = `mirror_path`, streams the
/// request body to its stdin, and parses the CGI-framed stdout per §4.3.
pub async fn invoke(
    mirror_path: &Path,
    req: CgiRequest<'_>,
) -> anyhow::Result<CgiResponse> {
    let backend = locate_backend().await?;

    let mut cmd = Command::new(backend);
    cmd.current_dir(mirror_path)
        .env_clear()
        .env("PATH", std::env::var("PATH").unwrap_or_default())
        .env("REQUEST_METHOD", req.method)
        .env("QUERY_STRING", req.query_string)
        .env("PATH_INFO", req.path_info)
        .env("PATH_TRANSLATED", format!("{}{}", mirror_path.display(), req.path_info))
        .env("SCRIPT_NAME", &req.script_name)
        .env("SERVER_NAME", req.server_name)
        .env("SERVER_PORT", req.server_port)
        .env("SERVER_PROTOCOL", "HTTP/1.1")
        .env("GATEWAY_INTERFACE", "CGI/1.1")
        .env("SERVER_SOFTWARE", "git-guard-proxy")
        .env("GIT_PROJECT_ROOT", mirror_path.display().to_string())
        .env("GIT_HTTP_EXPORT_ALL", "1")
        .env("GIT_HTTP_RECEIVE_PACK", "true")
        .env("GIT_HTTP_UPLOAD_PACK", "true")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    if let Some(ct) = &req.content_type {
        cmd.env("CONTENT_TYPE", ct);
    }
    if let Some(cl) = &req.content_length {
        cmd.env("CONTENT_LENGTH", cl);
    }

    for (name, value) in req.headers.iter() {
        let env_name = format!(
            "HTTP_{}",
            name.as_str().to_uppercase().replace('-', "_")
        );
        if let Ok(v) = value.to_str() {
            cmd.env(env_name, v);
        }
    }

    let mut child = cmd.spawn()?;

    let stdin = child.stdin.take();
    let stdout_pipe = child.stdout.take();
    let stderr_pipe = child.stderr.take();
    let body = req.body;

    // Write the request body and drain both output pipes concurrently: the
    // backend can emit stdout/stderr before it has consumed all of stdin, and
    // with nothing draining those pipes yet both sides would block on full
    // OS pipe buffers.
    let write_stdin = async move {
        if let Some(mut stdin) = stdin {
            stdin.write_all(&body).await?;
        }
        Ok::<(), std::io::Error>(())
    };
    let read_stdout = async move {
        let mut buf = Vec::new();
        if let Some(mut out) = stdout_pipe {
            out.read_to_end(&mut buf).await?;
        }
        Ok::<Vec<u8>, std::io::Error>(buf)
    };
    let read_stderr = async move {
        let mut buf = Vec::new();
        if let Some(mut err) = stderr_pipe {
            err.read_to_end(&mut buf).await?;
        }
        Ok::<Vec<u8>, std::io::Error>(buf)
    };

    let (stdin_result, stdout, stderr) = tokio::join!(write_stdin, read_stdout, read_stderr);
    stdin_result?;
    let stdout = stdout?;
    let stderr = stderr?;

    let status = child.wait().await?;
    if !status.success() {
        log::warn!(
            "git-http-backend exited with {:?}: {}",
            status.code(),
            String::from_utf8_lossy(&stderr)
        );
    }

    Ok(parse_cgi_output(&stdout))
}

/// Scans for the first `\r\n\r\n` or `\n\n` separator, parses the preceding
/// bytes as `Name: value` header lines (honoring `Status`), and returns the
/// remainder as an opaque body (§4.3 steps 1-5).
fn parse_cgi_output(raw: &[u8]) -> CgiResponse {
    let (header_bytes, body): (&[u8], &[u8]) = match find_separator(raw) {
        Some((idx, len)) => (&raw[..idx], &raw[idx + len..]),
        None => (raw, &[]),
    };

    let header_text = String::from_utf8_lossy(header_bytes);
    let mut status = 200u16;
    let mut reason = "OK".to_string();
    let mut headers = Vec::new();

    for line in header_text.lines() {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let name = name.trim();
        let value = value.trim();
        if name.eq_ignore_ascii_case("status") {
            if let Some((code, rest)) = value.split_once(' ') {
                if let Ok(code) = code.parse() {
                    status = code;
                    reason = rest.trim().to_string();
                }
            } else if let Ok(code) = value.parse() {
                status = code;
                reason.clear();
            }
        } else {
            headers.push((name.to_string(), value.to_string()));
        }
    }

    CgiResponse {
        status,
        reason,
        headers,
        body: body.to_vec(),
    }
}

fn find_separator(raw: &[u8]) -> Option<(usize, usize)> {
    let mut i = 0;
    while i < raw.len() {
        if raw[i..].starts_with(b"\r\n\r\n") {
            return Some((i, 4));
        }
        if raw[i..].starts_with(b"\n\n") {
            return Some((i, 2));
        }
        i += 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_crlf_framed_output() {
        let raw = b"Content-Type: application/x-git-upload-pack-result\r\n\r\nPACKDATA";
        let resp = parse_cgi_output(raw);
        assert_eq!(resp.status, 200);
        assert_eq!(resp.body, b"PACKDATA");
        assert_eq!(resp.headers[0].0, "Content-Type");
    }

    #[test]
    fn parses_lf_framed_output_with_status() {
        let raw = b"Status: 404 Not Found\n\nmissing";
        let resp = parse_cgi_output(raw);
        assert_eq!(resp.status, 404);
        assert_eq!(resp.reason, "Not Found");
        assert_eq!(resp.body, b"missing");
    }

    #[test]
    fn no_separator_means_all_headers_empty_body() {
        let raw = b"Content-Type: text/plain";
        let resp = parse_cgi_output(raw);
        assert_eq!(resp.body, b"");
        assert_eq!(resp.headers[0].1, "text/plain");
    }
}
