//! Repository identity: which repository and build a report belongs to.

use std::path::Path;
use std::process::Command;

use serde::{Deserialize, Serialize};

use crate::config::TrackerConfig;
use crate::types::{Error, ErrorKind, Result};

/// Build id used when neither configuration nor git provide one
pub const UNKNOWN_BUILD: &str = "unknown";

/// Owner, name and build of the repository a failure is filed against
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoIdentity {
    pub owner: String,
    pub repo: String,
    pub build_id: String,
    /// Working directory stripped from frame paths when linking to source
    pub workdir: Option<String>,
}

impl RepoIdentity {
    pub fn new<S: Into<String>>(owner: S, repo: S, build_id: S) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
            build_id: build_id.into(),
            workdir: None,
        }
    }

    pub fn with_workdir<S: Into<String>>(mut self, workdir: S) -> Self {
        self.workdir = Some(workdir.into());
        self
    }

    /// Resolves the identity. Configured values win; the rest is read from
    /// the git checkout in the current directory.
    pub fn resolve(config: &TrackerConfig) -> Result<Self> {
        let workdir = std::env::current_dir().ok();

        let (owner, repo) = match (non_empty(&config.owner), non_empty(&config.repo)) {
            (Some(owner), Some(repo)) => (owner, repo),
            (owner, repo) => {
                let url = git_output(&["config", "--get", "remote.origin.url"], workdir.as_deref())?;
                let (remote_owner, remote_repo) = parse_remote_url(&url).ok_or_else(|| {
                    Error::new(ErrorKind::Identity, "Cannot parse git remote URL").context("url", url.clone())
                })?;
                (owner.unwrap_or(remote_owner), repo.unwrap_or(remote_repo))
            }
        };

        let build_id = match non_empty(&config.build_id) {
            Some(build_id) => build_id,
            None => match git_output(&["rev-parse", "HEAD"], workdir.as_deref()) {
                Ok(head) => head,
                Err(e) => {
                    tracing::warn!(error = %e, "Cannot determine build id, using '{}'", UNKNOWN_BUILD);
                    UNKNOWN_BUILD.to_string()
                }
            },
        };

        Ok(Self {
            owner,
            repo,
            build_id,
            workdir: workdir.map(|p| p.display().to_string()),
        })
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty()).map(str::to_string)
}

fn git_output(args: &[&str], dir: Option<&Path>) -> Result<String> {
    let mut command = Command::new("git");
    command.args(args);
    if let Some(dir) = dir {
        command.current_dir(dir);
    }

    let output = command.output().map_err(|e| {
        Error::new(ErrorKind::Identity, "Failed to run git")
            .context("args", args.join(" "))
            .cause(e)
    })?;

    if !output.status.success() {
        return Err(Error::new(ErrorKind::Identity, "git exited with an error")
            .context("args", args.join(" "))
            .context("stderr", String::from_utf8_lossy(&output.stderr).trim().to_string()));
    }

    let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if text.is_empty() {
        return Err(Error::new(ErrorKind::Identity, "git returned no output").context("args", args.join(" ")));
    }
    Ok(text)
}

/// Extracts `(owner, repo)` from an https, ssh or scp-style remote URL
pub fn parse_remote_url(url: &str) -> Option<(String, String)> {
    let url = url.trim();
    let path = if let Some((_, rest)) = url.split_once("://") {
        // https://host/owner/repo, ssh://git@host:22/owner/repo
        rest.split_once('/').map(|(_, path)| path)?
    } else {
        // git@host:owner/repo
        url.split_once(':').map(|(_, path)| path)?
    };

    let path = path.trim_matches('/');
    let path = path.strip_suffix(".git").unwrap_or(path);
    let mut segments = path.rsplit('/');
    let repo = segments.next().filter(|s| !s.is_empty())?;
    let owner = segments.next().filter(|s| !s.is_empty())?;
    Some((owner.to_string(), repo.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(owner: &str, repo: &str) -> Option<(String, String)> {
        Some((owner.to_string(), repo.to_string()))
    }

    #[test]
    fn test_parse_remote_url() {
        assert_eq!(parse_remote_url("https://github.com/acme/widgets.git"), pair("acme", "widgets"));
        assert_eq!(parse_remote_url("https://github.com/acme/widgets\n"), pair("acme", "widgets"));
        assert_eq!(parse_remote_url("git@github.com:acme/widgets.git"), pair("acme", "widgets"));
        assert_eq!(parse_remote_url("ssh://git@github.com:22/acme/widgets.git"), pair("acme", "widgets"));
        assert_eq!(parse_remote_url("https://gitlab.example.com/group/sub/widgets"), pair("sub", "widgets"));
    }

    #[test]
    fn test_parse_remote_url_rejects_garbage() {
        assert_eq!(parse_remote_url(""), None);
        assert_eq!(parse_remote_url("widgets"), None);
        assert_eq!(parse_remote_url("https://github.com/widgets"), None);
    }

    #[test]
    fn test_configured_values_win() {
        let config = TrackerConfig {
            owner: Some("acme".into()),
            repo: Some("widgets".into()),
            build_id: Some("abc123".into()),
            ..TrackerConfig::default()
        };

        let identity = RepoIdentity::resolve(&config).expect("resolves without git");
        assert_eq!(identity.owner, "acme");
        assert_eq!(identity.repo, "widgets");
        assert_eq!(identity.build_id, "abc123");
    }
}
