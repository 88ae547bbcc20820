#![allow(async_fn_in_trait)]

use std::path::Path;
use std::path::PathBuf;

use anyhow::Result;
use anyhow::bail;
#[cfg(test)]
use mockall::automock;

use tracing::instrument;

use crate::error::StackerError;
use crate::ops;
use crate::stack::Commit;
use crate::sync::MessageFeed;

// -----------------------------------------------------------------------------
// GitOps trait

/// Operations for interacting with git.
#[cfg_attr(test, automock)]
pub trait GitOps {
    async fn current_branch(&self) -> Result<String>;

    /// Resolve a revision to a full commit sha.
    async fn resolve_ref(&self, rev: &str) -> Result<String>;

    /// Merge base of two refs. Fails if they share no history.
    async fn merge_base(&self, ref_a: &str, ref_b: &str) -> Result<String>;

    /// Commits in `base..head`, oldest first. Empty when base == head.
    async fn commits_in_range(&self, base: &str, head: &str) -> Result<Vec<Commit>>;

    async fn parse_commit(&self, rev: &str) -> Result<Commit>;

    /// Point a local branch at a commit, creating or moving it as needed.
    async fn create_branch(&self, name: &str, sha: &str) -> Result<()>;

    async fn delete_branch(&self, name: &str) -> Result<()>;

    /// Push a local branch to the remote. Forced pushes use a conditional
    /// force so a stale local view cannot clobber newer remote work.
    async fn push_branch(&self, remote: &str, name: &str, force: bool) -> Result<()>;

    /// Tip of a remote-tracking branch, or None if it does not exist.
    async fn remote_branch_sha(&self, remote: &str, name: &str) -> Result<Option<String>>;

    async fn fetch(&self, remote: &str) -> Result<()>;

    async fn checkout(&self, rev: &str) -> Result<()>;

    /// Replace HEAD's commit message, leaving the tree and any staged
    /// changes untouched.
    async fn amend_message(&self, message: &str) -> Result<()>;

    /// Rebase `branch` onto `newbase`, replaying only commits after
    /// `upstream`. A conflict surfaces as a recoverable rewrite error.
    async fn rebase_onto(&self, newbase: &str, upstream: &str, branch: &str) -> Result<()>;

    async fn is_rebase_in_progress(&self) -> Result<bool>;
    async fn continue_rebase(&self) -> Result<()>;
    async fn abort_rebase(&self) -> Result<()>;

    /// Reword every commit after `upstream` on the current branch with the
    /// messages carried by `feed`, preserving order, parents and trees.
    ///
    /// The feed must hold exactly one message per commit, oldest first; it
    /// is consumed strictly sequentially.
    async fn rewrite_messages(&self, upstream: &str, feed: MessageFeed) -> Result<()>;
}

// -----------------------------------------------------------------------------
// RealGit

/// Real implementation that calls the git CLI.
pub struct RealGit {
    path: PathBuf,
}

impl RealGit {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    async fn run_git(&self, args: &[&str]) -> Result<String> {
        let output = ops::run_command("git", args, &self.path, &[]).await?;
        if !output.status.success() {
            bail!(
                "git command failed: {}",
                String::from_utf8_lossy(&output.stderr)
            );
        }
        Ok(String::from_utf8(output.stdout)?.trim().to_string())
    }

    /// Single-quote a path for embedding in shell text, escaping any quotes
    /// the path itself contains.
    fn shell_quote(path: &Path) -> String {
        format!("'{}'", path.display().to_string().replace('\'', r"'\''"))
    }

    fn parse_log_records(output: &str) -> Result<Vec<Commit>> {
        let mut commits = Vec::new();
        for record in output.split('\x1e') {
            if record.trim().is_empty() {
                continue;
            }
            let parts: Vec<&str> = record.splitn(4, '\x1f').collect();
            if parts.len() != 4 {
                bail!(
                    "Unexpected git log output: expected 4 fields, got {}: {record:?}",
                    parts.len()
                );
            }
            commits.push(Commit::new(
                parts[0].trim(),
                parts[1].trim(),
                parts[2].trim_end(),
                parts[3].trim_end(),
            ));
        }
        Ok(commits)
    }

    /// Drive `git rebase -i` with scripted editors.
    ///
    /// The sequence editor replaces the generated todo list with the feed's
    /// reword instructions; the message editor emits one precomputed message
    /// per invocation, sequenced by a counter file. Both rely on git invoking
    /// the editors serially, in commit order, once per commit.
    async fn scripted_rebase(
        &self,
        upstream: &str,
        scratch: &Path,
        mut feed: MessageFeed,
    ) -> Result<()> {
        let todo_path = scratch.join("todo");
        tokio::fs::write(&todo_path, feed.todo_list()).await?;

        let mut index = 0;
        while !feed.is_drained() {
            let message = feed.next_message()?;
            let message_path = scratch.join(format!("message-{index}"));
            tokio::fs::write(&message_path, format!("{message}\n")).await?;
            index += 1;
        }
        tokio::fs::write(scratch.join("counter"), "0").await?;

        let editor_path = scratch.join("editor.sh");
        let editor = format!(
            "#!/bin/sh\n\
             set -e\n\
             dir={dir}\n\
             i=$(cat \"$dir/counter\")\n\
             cat \"$dir/message-$i\" >\"$1\"\n\
             echo $((i + 1)) >\"$dir/counter\"\n",
            dir = Self::shell_quote(scratch)
        );
        tokio::fs::write(&editor_path, editor).await?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&editor_path, std::fs::Permissions::from_mode(0o755))
                .await?;
        }

        let sequence_editor = format!("cp {}", Self::shell_quote(&todo_path));
        let editor_command = Self::shell_quote(&editor_path);
        let output = ops::run_command(
            "git",
            &["rebase", "-i", upstream],
            &self.path,
            &[
                ("GIT_SEQUENCE_EDITOR", sequence_editor.as_str()),
                ("GIT_EDITOR", editor_command.as_str()),
            ],
        )
        .await?;

        if !output.status.success() {
            if self.is_rebase_in_progress().await? {
                return Err(StackerError::rewrite(
                    "Message rewrite stopped before completing; the repository is in a paused rebase",
                )
                .suggest("Finish it with 'git rebase --continue' or undo it with 'git rebase --abort', then re-run")
                .into());
            }
            bail!(
                "git rebase failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }
}

impl GitOps for RealGit {
    async fn current_branch(&self) -> Result<String> {
        let branch = self.run_git(&["rev-parse", "--abbrev-ref", "HEAD"]).await?;
        if branch == "HEAD" {
            return Err(StackerError::precondition("Not on a branch (detached HEAD)")
                .suggest("Check out the branch holding your stack and re-run")
                .into());
        }
        Ok(branch)
    }

    async fn resolve_ref(&self, rev: &str) -> Result<String> {
        let rev_spec = format!("{rev}^{{commit}}");
        self.run_git(&["rev-parse", "--verify", &rev_spec])
            .await
            .map_err(|_| {
                StackerError::resolution(format!("Cannot resolve {rev} to a commit"))
                    .suggest("Check the revision spelling, or fetch the remote")
                    .into()
            })
    }

    async fn merge_base(&self, ref_a: &str, ref_b: &str) -> Result<String> {
        self.run_git(&["merge-base", ref_a, ref_b])
            .await
            .map_err(|err| {
                StackerError::resolution(format!(
                    "No merge base between {ref_a} and {ref_b}: {err}"
                ))
                .suggest("Fetch the remote or pass an explicit --base")
                .into()
            })
    }

    async fn commits_in_range(&self, base: &str, head: &str) -> Result<Vec<Commit>> {
        let range = format!("{base}..{head}");
        let output = self
            .run_git(&[
                "log",
                "--reverse",
                "--format=%H%x1f%h%x1f%s%x1f%b%x1e",
                &range,
            ])
            .await?;
        Self::parse_log_records(&output)
    }

    async fn parse_commit(&self, rev: &str) -> Result<Commit> {
        let output = self
            .run_git(&["log", "-1", "--format=%H%x1f%h%x1f%s%x1f%b%x1e", rev])
            .await
            .map_err(|err| StackerError::resolution(format!("Cannot resolve {rev}: {err}")))?;
        let mut commits = Self::parse_log_records(&output)?;
        if commits.is_empty() {
            return Err(StackerError::resolution(format!("No commit found for {rev}")).into());
        }
        Ok(commits.remove(0))
    }

    async fn create_branch(&self, name: &str, sha: &str) -> Result<()> {
        self.run_git(&["branch", "-f", name, sha]).await?;
        Ok(())
    }

    async fn delete_branch(&self, name: &str) -> Result<()> {
        self.run_git(&["branch", "-D", name]).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn push_branch(&self, remote: &str, name: &str, force: bool) -> Result<()> {
        let refspec = format!("refs/heads/{name}:refs/heads/{name}");
        let mut args = vec!["push"];
        if force {
            args.push("--force-with-lease");
        }
        args.extend(["-u", remote, &refspec]);

        let output = ops::run_command("git", &args, &self.path, &[]).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(StackerError::classify_push(name, &stderr).into());
        }
        Ok(())
    }

    async fn remote_branch_sha(&self, remote: &str, name: &str) -> Result<Option<String>> {
        let rev = format!("refs/remotes/{remote}/{name}");
        let output = ops::run_command(
            "git",
            &["rev-parse", "--verify", "--quiet", &rev],
            &self.path,
            &[],
        )
        .await?;
        if !output.status.success() {
            return Ok(None);
        }
        Ok(Some(String::from_utf8(output.stdout)?.trim().to_string()))
    }

    async fn fetch(&self, remote: &str) -> Result<()> {
        self.run_git(&["fetch", "--prune", remote]).await?;
        Ok(())
    }

    async fn checkout(&self, rev: &str) -> Result<()> {
        self.run_git(&["checkout", rev]).await?;
        Ok(())
    }

    async fn amend_message(&self, message: &str) -> Result<()> {
        // --only with no paths keeps staged changes out of the amend
        self.run_git(&["commit", "--amend", "--only", "-m", message])
            .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn rebase_onto(&self, newbase: &str, upstream: &str, branch: &str) -> Result<()> {
        let output = ops::run_command(
            "git",
            &["rebase", "--onto", newbase, upstream, branch],
            &self.path,
            &[],
        )
        .await?;
        if !output.status.success() {
            if self.is_rebase_in_progress().await? {
                return Err(StackerError::rewrite(format!(
                    "Rebase of {branch} onto {newbase} hit a conflict"
                ))
                .suggest("Resolve the conflict, run 'git rebase --continue', then re-run; or 'git rebase --abort'")
                .into());
            }
            bail!(
                "git rebase failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }

    async fn is_rebase_in_progress(&self) -> Result<bool> {
        let git_dir = self.run_git(&["rev-parse", "--absolute-git-dir"]).await?;
        for state_dir in ["rebase-merge", "rebase-apply"] {
            if tokio::fs::try_exists(Path::new(&git_dir).join(state_dir)).await? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn continue_rebase(&self) -> Result<()> {
        let output = ops::run_command(
            "git",
            &["rebase", "--continue"],
            &self.path,
            &[("GIT_EDITOR", "true")],
        )
        .await?;
        if !output.status.success() {
            bail!(
                "git rebase --continue failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }

    async fn abort_rebase(&self) -> Result<()> {
        self.run_git(&["rebase", "--abort"]).await?;
        Ok(())
    }

    #[instrument(skip(self, feed))]
    async fn rewrite_messages(&self, upstream: &str, feed: MessageFeed) -> Result<()> {
        let git_dir = self.run_git(&["rev-parse", "--absolute-git-dir"]).await?;
        let scratch = Path::new(&git_dir).join("stacker-rewrite");
        tokio::fs::create_dir_all(&scratch).await?;

        let result = self.scripted_rebase(upstream, &scratch, feed).await;

        // The scratch directory is one-shot coordination state, not history;
        // remove it whether the rebase succeeded or not.
        let _ = tokio::fs::remove_dir_all(&scratch).await;
        result
    }
}
