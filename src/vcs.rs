//! Git invocation and the handful of queries the hook needs

use tokio::process::Command;
use tracing::{debug, error};

use crate::error::{NotifyError, Result};

/// Run a VCS command and get its standard output back.
///
/// Output is trimmed of surrounding whitespace. A command that exits
/// unsuccessfully is reported as `NotifyError::GitOperationFailed`.
#[allow(async_fn_in_trait)]
pub trait Vcs {
    async fn run(&self, args: &[&str]) -> Result<String>;
}

/// `git` subprocess, run in the hook's working directory.
#[derive(Debug, Clone, Default)]
pub struct GitCli;

impl GitCli {
    pub fn new() -> Self {
        Self
    }
}

impl Vcs for GitCli {
    async fn run(&self, args: &[&str]) -> Result<String> {
        let command = format!("git {}", args.join(" "));
        debug!("Running: {}", command);

        let output = Command::new("git")
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                error!("{} failed to start: {}", command, e);
                NotifyError::GitOperationFailed {
                    command: command.clone(),
                    code: None,
                    message: e.to_string(),
                }
            })?;

        if !output.status.success() {
            return Err(NotifyError::GitOperationFailed {
                command,
                code: output.status.code(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

/// Medium-format listing of `old..new`, oldest first.
pub async fn list_revisions<V: Vcs>(vcs: &V, old: &str, new: &str) -> Result<String> {
    let range = format!("{}..{}", old, new);
    vcs.run(&["rev-list", "--pretty=medium", "--reverse", &range])
        .await
}

/// Subject line and abbreviated id of a single commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitSummary {
    pub subject: String,
    pub abbrev: String,
}

pub const UNDEFINED: &str = "undefined";

pub async fn commit_summary<V: Vcs>(vcs: &V, id: &str) -> CommitSummary {
    let output = match vcs.run(&["show", "--pretty=format:%s%n%h", "-s", id]).await {
        Ok(output) => output,
        Err(e) => {
            debug!("Could not summarise commit {}: {}", id, e);
            String::new()
        }
    };

    let mut lines = output.lines().map(str::trim);
    let mut field = || {
        lines
            .next()
            .filter(|s| !s.is_empty())
            .unwrap_or(UNDEFINED)
            .to_string()
    };
    let subject = field();
    let abbrev = field();
    CommitSummary { subject, abbrev }
}

/// Full patch text of one commit.
pub async fn show_commit<V: Vcs>(vcs: &V, id: &str) -> Result<String> {
    vcs.run(&["show", id]).await
}

/// Stat and summary of everything between `old` and `new`.
pub async fn range_stat<V: Vcs>(vcs: &V, old: &str, new: &str) -> Result<String> {
    let range = format!("{}..{}", old, new);
    vcs.run(&[
        "diff-tree",
        "--stat",
        "--summary",
        "--find-copies-harder",
        &range,
    ])
    .await
}

/// Ids of the two most recent commits across all refs, newest first.
pub async fn recent_commits<V: Vcs>(vcs: &V) -> Result<Vec<String>> {
    let output = vcs.run(&["rev-list", "--max-count=2", "--all"]).await?;
    Ok(output
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(String::from)
        .collect())
}

pub async fn is_bare_repository<V: Vcs>(vcs: &V) -> Result<bool> {
    Ok(vcs.run(&["rev-parse", "--is-bare-repository"]).await? == "true")
}

/// Name and email of whoever authored the repository's first commit.
pub async fn first_author<V: Vcs>(vcs: &V) -> Result<Option<(String, String)>> {
    let output = vcs
        .run(&["log", "--reverse", "--format=%an%x09%ae"])
        .await?;
    Ok(output.lines().next().and_then(|line| {
        let (name, email) = line.split_once('\t')?;
        Some((name.to_string(), email.to_string()))
    }))
}
