use anyhow::Result;
use log::warn;

use crate::App;
use crate::error::StackerError;
use crate::ops::git::GitOps;
use crate::ops::github::GithubOps;
use crate::ops::github::MergeMethod;
use crate::ops::github::MergeOverrides;
use crate::stack::Stack;
use crate::trailer;

impl<G: GitOps, H: GithubOps> App<G, H> {
    /// Merge the bottom PR of the stack into the target branch, then rebase
    /// the rest of the stack onto the new target and re-submit it. With
    /// `all`, repeat until the stack is empty; a failure mid-way stops and
    /// leaves the already-landed PRs merged.
    pub async fn cmd_land(
        &self,
        force: bool,
        all: bool,
        method: MergeMethod,
        stdout: &mut impl std::io::Write,
    ) -> Result<()> {
        self.ensure_no_rebase_in_progress().await?;
        loop {
            let (stack, _base) = self.build_current_stack(None).await?;
            if stack.entries.is_empty() {
                writeln!(stdout, "No commits on top of {}; nothing to land", stack.target)?;
                return Ok(());
            }
            let remaining = stack.entries.len() - 1;
            self.land_bottom(&stack, force, method, stdout).await?;
            if remaining > 0 {
                self.cmd_submit(None, stdout).await?;
            }
            if !all || remaining == 0 {
                return Ok(());
            }
        }
    }

    async fn land_bottom(
        &self,
        stack: &Stack,
        force: bool,
        method: MergeMethod,
        stdout: &mut impl std::io::Write,
    ) -> Result<()> {
        if let Some(dep) = &stack.depends_on {
            let message = format!(
                "This stack depends on {} ({}), which has not been landed",
                dep.stack_name, dep.top_branch
            );
            if force {
                warn!("{message}; landing anyway");
            } else {
                return Err(StackerError::precondition(message)
                    .suggest("Land that stack first, or pass --force to override")
                    .into());
            }
        }

        let bottom = &stack.entries[0];
        let Some(number) = bottom.pr_number else {
            return Err(StackerError::precondition(format!(
                "Commit {} ({}) has no pull request",
                bottom.commit.short_sha, bottom.commit.subject
            ))
            .suggest("Run 'stacker submit' first")
            .into());
        };

        let status = self.gh.pr_status(number).await?;
        // Not force-overridable: the merge itself would fail
        if status.mergeable.eq_ignore_ascii_case("CONFLICTING") {
            return Err(StackerError::precondition(format!(
                "PR #{number} has merge conflicts with {}",
                bottom.target_branch
            ))
            .suggest("Rebase the stack onto the latest target, resolve, and run 'stacker submit'")
            .into());
        }
        if status.review_decision() == "CHANGES_REQUESTED" {
            if force {
                warn!("PR #{number} has requested changes; landing anyway");
            } else {
                return Err(StackerError::precondition(format!(
                    "PR #{number} has requested changes"
                ))
                .suggest("Address the review, or pass --force to override")
                .into());
            }
        }
        let failed = status.failed_checks();
        if !failed.is_empty() {
            let names = failed.join(", ");
            if force {
                warn!("PR #{number} has failing checks ({names}); landing anyway");
            } else {
                return Err(StackerError::precondition(format!(
                    "PR #{number} has failing checks: {names}"
                ))
                .suggest("Wait for CI to pass, or pass --force to override")
                .into());
            }
        }

        // For squash merges the commit's own message (stack trailers
        // stripped) becomes the merge commit message.
        let overrides = if method == MergeMethod::Squash {
            let squash_body = trailer::strip(&bottom.commit.message(), trailer::TRAILER_PREFIX)
                .lines()
                .skip(1)
                .collect::<Vec<_>>()
                .join("\n")
                .trim()
                .to_string();
            MergeOverrides {
                subject: Some(bottom.commit.subject.clone()),
                body: (!squash_body.is_empty()).then_some(squash_body),
            }
        } else {
            MergeOverrides::default()
        };

        self.gh.merge_pr(number, method, true, &overrides).await?;
        writeln!(
            stdout,
            "Merged PR #{} ({}) into {}",
            number, bottom.commit.subject, bottom.target_branch
        )?;

        self.git.fetch(&self.config.remote).await?;
        self.git.delete_branch(&bottom.branch_name).await?;

        // Replay the unlanded commits onto the advanced target. A conflict
        // pauses here as a recoverable rewrite error.
        let head = self.git.current_branch().await?;
        let target_ref = format!("{}/{}", self.config.remote, self.config.target);
        self.git
            .rebase_onto(&target_ref, &bottom.commit.sha, &head)
            .await?;
        Ok(())
    }
}
