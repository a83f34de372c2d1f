//! Network operations through the system `git` binary.
//!
//! Each invocation runs as a child process that is killed when the caller's
//! cancellation token fires. Access tokens are injected into HTTPS URLs for
//! the duration of one command and scrubbed from everything that is logged
//! or stored.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use url::Url;

use crate::credentials::Credential;
use crate::error::LoctrailError;
use crate::Result;

/// Clone `url` into `dest`. The stored `origin` never contains the token.
pub async fn clone(
    url: &str,
    dest: &Path,
    credential: Option<&Credential>,
    cancel: &CancellationToken,
) -> Result<PathBuf> {
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    info!(url = %url, dest = %dest.display(), "Cloning repository");

    let clone_url = authenticated_url(url, credential);
    let dest_arg = dest.to_string_lossy().into_owned();
    run_git(
        None,
        &["clone", "--quiet", clone_url.as_str(), dest_arg.as_str()],
        url,
        credential,
        cancel,
    )
    .await?;

    if credential.is_some() {
        run_git(
            Some(dest),
            &["remote", "set-url", "origin", url],
            url,
            credential,
            cancel,
        )
        .await?;
    }

    Ok(dest.to_path_buf())
}

/// Fetch `url`'s HEAD and move the local branch onto it.
///
/// The fetch goes to the tracked URL, never to whatever `origin` the
/// directory points at. History rewritten upstream is followed rather than
/// rejected.
pub async fn pull(
    url: &str,
    path: &Path,
    credential: Option<&Credential>,
    cancel: &CancellationToken,
) -> Result<()> {
    info!(url = %url, path = %path.display(), "Pulling repository");

    let fetch_url = authenticated_url(url, credential);
    run_git(
        Some(path),
        &["fetch", "--quiet", fetch_url.as_str(), "HEAD"],
        url,
        credential,
        cancel,
    )
    .await?;
    run_git(
        Some(path),
        &["reset", "--quiet", "--hard", "FETCH_HEAD"],
        url,
        credential,
        cancel,
    )
    .await?;

    Ok(())
}

/// Run one git command, returning its stdout.
async fn run_git(
    cwd: Option<&Path>,
    args: &[&str],
    display_url: &str,
    credential: Option<&Credential>,
    cancel: &CancellationToken,
) -> Result<String> {
    let mut cmd = Command::new("git");
    if let Some(cwd) = cwd {
        cmd.arg("-C").arg(cwd);
    }
    cmd.args(args)
        .env("GIT_TERMINAL_PROMPT", "0")
        .stdin(Stdio::null())
        .kill_on_drop(true);

    debug!(command = %redact(&args.join(" "), credential), "Running git");

    let output = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(LoctrailError::Cancelled),
        output = cmd.output() => output.map_err(|e| LoctrailError::Transport {
            url: display_url.to_string(),
            message: format!("failed to execute git: {}", e),
        })?,
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(LoctrailError::Transport {
            url: display_url.to_string(),
            message: format!(
                "git {} failed: {}",
                args.first().copied().unwrap_or_default(),
                redact(stderr.trim(), credential)
            ),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Embed the token in an HTTP(S) URL; other URLs (local paths, ssh) are
/// returned unchanged.
pub fn authenticated_url(url: &str, credential: Option<&Credential>) -> String {
    let Some(credential) = credential else {
        return url.to_string();
    };
    let Ok(mut parsed) = Url::parse(url) else {
        return url.to_string();
    };
    if parsed.scheme() != "https" && parsed.scheme() != "http" {
        return url.to_string();
    }

    let host = parsed.host_str().unwrap_or_default().to_lowercase();
    let (user, password) = if host.contains("gitlab") {
        ("oauth2", Some(credential.token()))
    } else if host.contains("bitbucket") {
        ("x-token-auth", Some(credential.token()))
    } else {
        (credential.token(), None)
    };

    if parsed.set_username(user).is_err() || parsed.set_password(password).is_err() {
        return url.to_string();
    }
    parsed.to_string()
}

fn redact(text: &str, credential: Option<&Credential>) -> String {
    match credential {
        Some(c) if !c.token().is_empty() => text.replace(c.token(), "***"),
        _ => text.to_string(),
    }
}
