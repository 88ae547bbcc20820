#![allow(async_fn_in_trait)]

use std::path::PathBuf;

use anyhow::Context;
use anyhow::Result;
use anyhow::bail;
#[cfg(test)]
use mockall::automock;
use serde::Deserialize;
use tracing::instrument;

use crate::error::StackerError;
use crate::ops;

// -----------------------------------------------------------------------------
// Types

#[derive(Debug, Clone, Deserialize)]
pub struct PullRequest {
    pub number: u64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub url: String,
}

/// Merge-readiness snapshot of a pull request.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequestStatus {
    #[serde(default)]
    pub mergeable: String,
    #[serde(default)]
    pub merge_state_status: String,
    /// APPROVED, CHANGES_REQUESTED, REVIEW_REQUIRED, or null.
    #[serde(default)]
    pub review_decision: Option<String>,
    #[serde(default)]
    pub status_check_rollup: Option<Vec<CheckRun>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CheckRun {
    // Legacy commit statuses carry "context" instead of "name"
    #[serde(default, alias = "context")]
    pub name: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub conclusion: String,
}

impl PullRequestStatus {
    pub fn review_decision(&self) -> &str {
        self.review_decision.as_deref().unwrap_or("")
    }

    /// Names of checks that finished unsuccessfully.
    pub fn failed_checks(&self) -> Vec<&str> {
        self.status_check_rollup
            .iter()
            .flatten()
            .filter(|check| {
                matches!(check.conclusion.as_str(), "FAILURE" | "TIMED_OUT" | "CANCELLED")
            })
            .map(|check| check.name.as_str())
            .collect()
    }
}

/// Fields to change on an existing pull request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PullRequestUpdate {
    pub title: Option<String>,
    pub body: Option<String>,
    pub base: Option<String>,
}

/// Overrides for the commit message of a squash or merge commit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeOverrides {
    pub subject: Option<String>,
    pub body: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum MergeMethod {
    Squash,
    Merge,
    Rebase,
}

impl MergeMethod {
    fn as_flag(self) -> &'static str {
        match self {
            Self::Squash => "--squash",
            Self::Merge => "--merge",
            Self::Rebase => "--rebase",
        }
    }
}

// -----------------------------------------------------------------------------
// GithubOps trait

/// Operations for interacting with GitHub.
#[cfg_attr(test, automock)]
pub trait GithubOps {
    /// Browser URL of a pull request by number.
    fn pull_request_url(&self, number: u64) -> String;

    /// Find an open PR whose head branch matches, if any.
    async fn find_pr_by_head(&self, branch: &str) -> Result<Option<u64>>;

    async fn get_pr(&self, number: u64) -> Result<PullRequest>;

    async fn pr_status(&self, number: u64) -> Result<PullRequestStatus>;

    /// Create a PR and return its number.
    async fn create_pr(
        &self,
        head: &str,
        base: &str,
        title: &str,
        body: &str,
        draft: bool,
        reviewers: &[String],
    ) -> Result<u64>;

    async fn update_pr(&self, number: u64, update: &PullRequestUpdate) -> Result<()>;

    /// Merge a PR. Overrides replace the commit message GitHub would
    /// generate for the squash or merge commit.
    async fn merge_pr(
        &self,
        number: u64,
        method: MergeMethod,
        delete_branch: bool,
        overrides: &MergeOverrides,
    ) -> Result<()>;

    async fn close_pr(&self, number: u64) -> Result<()>;
}

// -----------------------------------------------------------------------------
// RealGithub

/// Real implementation that calls the gh CLI.
pub struct RealGithub {
    path: PathBuf,
    owner: String,
    repo: String,
}

impl RealGithub {
    pub async fn new(path: PathBuf) -> Result<Self> {
        let (owner, repo) = Self::detect_owner_and_repo(&path).await?;
        Ok(Self { path, owner, repo })
    }

    /// Detect owner and repo from the git remote URL.
    async fn detect_owner_and_repo(path: &std::path::Path) -> Result<(String, String)> {
        let output = ops::run_command(
            "git",
            &["config", "--get", "remote.origin.url"],
            path,
            &[],
        )
        .await?;
        if !output.status.success() {
            return Err(StackerError::precondition("No git remote 'origin' configured")
                .suggest("Add a GitHub remote with 'git remote add origin <url>'")
                .into());
        }
        let url = String::from_utf8(output.stdout)?.trim().to_string();

        // git@github.com:owner/repo.git or https://github.com/owner/repo.git
        let parts = if let Some(rest) = url.strip_prefix("git@github.com:") {
            rest
        } else if let Some(rest) = url.strip_prefix("https://github.com/") {
            rest
        } else {
            bail!("Remote URL is not a GitHub URL: {}", url);
        };
        let parts = parts.strip_suffix(".git").unwrap_or(parts);
        let mut split = parts.split('/');
        let owner = split
            .next()
            .context("Could not parse owner from GitHub URL")?
            .to_string();
        let repo = split
            .next()
            .context("Could not parse repo from GitHub URL")?
            .to_string();
        Ok((owner, repo))
    }

    async fn run_gh(&self, args: &[&str]) -> Result<String> {
        let output = ops::run_command("gh", args, &self.path, &[]).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(StackerError::classify_review_service(&stderr).into());
        }
        Ok(String::from_utf8(output.stdout)?.trim().to_string())
    }
}

impl GithubOps for RealGithub {
    fn pull_request_url(&self, number: u64) -> String {
        format!("https://github.com/{}/{}/pull/{}", self.owner, self.repo, number)
    }

    #[instrument(skip_all)]
    async fn find_pr_by_head(&self, branch: &str) -> Result<Option<u64>> {
        #[derive(Deserialize)]
        struct Row {
            number: u64,
        }
        let output = self
            .run_gh(&[
                "pr", "list", "--head", branch, "--state", "open", "--json", "number",
                "--limit", "1",
            ])
            .await?;
        let rows: Vec<Row> = serde_json::from_str(&output)?;
        Ok(rows.first().map(|row| row.number))
    }

    #[instrument(skip_all)]
    async fn get_pr(&self, number: u64) -> Result<PullRequest> {
        let output = self
            .run_gh(&[
                "pr",
                "view",
                &number.to_string(),
                "--json",
                "number,title,body,state,url",
            ])
            .await?;
        Ok(serde_json::from_str(&output)?)
    }

    #[instrument(skip_all)]
    async fn pr_status(&self, number: u64) -> Result<PullRequestStatus> {
        let output = self
            .run_gh(&[
                "pr",
                "view",
                &number.to_string(),
                "--json",
                "mergeable,mergeStateStatus,reviewDecision,statusCheckRollup",
            ])
            .await?;
        Ok(serde_json::from_str(&output)?)
    }

    #[instrument(skip_all)]
    async fn create_pr(
        &self,
        head: &str,
        base: &str,
        title: &str,
        body: &str,
        draft: bool,
        reviewers: &[String],
    ) -> Result<u64> {
        let mut args = vec![
            "pr", "create", "--head", head, "--base", base, "--title", title, "--body", body,
        ];
        if draft {
            args.push("--draft");
        }
        for reviewer in reviewers {
            args.extend(["--reviewer", reviewer]);
        }

        // gh prints the PR URL on stdout
        let url = self.run_gh(&args).await?;
        let number = url
            .rsplit('/')
            .next()
            .and_then(|tail| tail.parse().ok())
            .with_context(|| format!("Could not parse PR number from URL: {url}"))?;
        Ok(number)
    }

    #[instrument(skip_all)]
    async fn update_pr(&self, number: u64, update: &PullRequestUpdate) -> Result<()> {
        let number = number.to_string();
        let mut args = vec!["pr", "edit", number.as_str()];
        if let Some(title) = &update.title {
            args.extend(["--title", title]);
        }
        if let Some(body) = &update.body {
            args.extend(["--body", body]);
        }
        if let Some(base) = &update.base {
            args.extend(["--base", base]);
        }
        self.run_gh(&args).await?;
        Ok(())
    }

    #[instrument(skip_all)]
    async fn merge_pr(
        &self,
        number: u64,
        method: MergeMethod,
        delete_branch: bool,
        overrides: &MergeOverrides,
    ) -> Result<()> {
        let number = number.to_string();
        let mut args = vec!["pr", "merge", number.as_str(), method.as_flag()];
        if delete_branch {
            args.push("--delete-branch");
        }
        if let Some(subject) = &overrides.subject {
            args.extend(["--subject", subject]);
        }
        if let Some(body) = &overrides.body {
            args.extend(["--body", body]);
        }
        self.run_gh(&args).await?;
        Ok(())
    }

    #[instrument(skip_all)]
    async fn close_pr(&self, number: u64) -> Result<()> {
        self.run_gh(&["pr", "close", &number.to_string()]).await?;
        Ok(())
    }
}
