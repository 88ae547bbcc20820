use anyhow::Result;

use crate::App;
use crate::body;
use crate::ops::git::GitOps;
use crate::ops::github::GithubOps;
use crate::ops::github::PullRequestUpdate;
use crate::stack::Stack;
use crate::sync;

impl<G: GitOps, H: GithubOps> App<G, H> {
    /// Synchronize the whole stack with the remote.
    ///
    /// 1. Build the stack from the commit range and its trailers.
    /// 2. If any commit's trailers are stale, rewrite the range and rebuild
    ///    (every sha changed).
    /// 3. Point one branch at each commit and push.
    /// 4. Create PRs for entries that have none; freshly assigned numbers go
    ///    back into the trailers with a second rewrite and re-push.
    /// 5. Update every PR's base and description.
    pub async fn cmd_submit(
        &self,
        base: Option<&str>,
        stdout: &mut impl std::io::Write,
    ) -> Result<()> {
        self.ensure_no_rebase_in_progress().await?;
        let (mut stack, base) = self.build_current_stack(base).await?;
        if stack.entries.is_empty() {
            writeln!(stdout, "No commits on top of {}; nothing to submit", stack.target)?;
            return Ok(());
        }

        let rewrote = sync::sync_trailers(&self.git, &stack, &base).await?;
        if rewrote > 0 {
            writeln!(stdout, "Rewrote {rewrote} commit message(s)")?;
            stack = self.rebuild(&base).await?;
        }

        self.push_entries(&stack, stdout).await?;

        let mut created = false;
        for index in 0..stack.entries.len() {
            if stack.entries[index].pr_number.is_some() {
                continue;
            }
            let pr_body = body::compose_body(&stack, index, "");
            let entry = &stack.entries[index];
            let number = self
                .gh
                .create_pr(
                    &entry.branch_name,
                    &entry.target_branch,
                    &entry.commit.subject,
                    &pr_body,
                    self.config.draft,
                    &[],
                )
                .await?;
            writeln!(
                stdout,
                "Created PR #{} for {} with base {}",
                number, entry.branch_name, entry.target_branch
            )?;
            stack.entries[index].pr_number = Some(number);
            stack.entries[index].pr_url = Some(self.gh.pull_request_url(number));
            created = true;
        }

        // New PR numbers are not in the trailers yet; embed them and re-push
        // the rewritten commits.
        if created {
            let rewrote = sync::sync_trailers(&self.git, &stack, &base).await?;
            if rewrote > 0 {
                writeln!(stdout, "Rewrote {rewrote} commit message(s)")?;
                stack = self.rebuild(&base).await?;
                self.push_entries(&stack, stdout).await?;
            }
        }

        for (index, entry) in stack.entries.iter().enumerate() {
            let Some(number) = entry.pr_number else {
                continue;
            };
            let existing = self.gh.get_pr(number).await?;
            let update = PullRequestUpdate {
                title: Some(entry.commit.subject.clone()),
                body: Some(body::compose_body(&stack, index, &existing.body)),
                base: Some(entry.target_branch.clone()),
            };
            self.gh.update_pr(number, &update).await?;
            writeln!(
                stdout,
                "Updated PR #{}: {}",
                number,
                entry.pr_url.as_deref().unwrap_or("")
            )?;
        }

        Ok(())
    }

    async fn rebuild(&self, base: &str) -> Result<Stack> {
        let head = self.git.current_branch().await?;
        let name = crate::stack::stack_name(&self.config.prefix, &head);
        crate::stack::build_stack(&self.git, &self.gh, &self.config, &name, base, &head).await
    }

    async fn push_entries(
        &self,
        stack: &Stack,
        stdout: &mut impl std::io::Write,
    ) -> Result<()> {
        for entry in &stack.entries {
            self.git
                .create_branch(&entry.branch_name, &entry.commit.sha)
                .await?;
            self.git
                .push_branch(&self.config.remote, &entry.branch_name, true)
                .await?;
            writeln!(
                stdout,
                "Pushed {} ({})",
                entry.branch_name, entry.commit.short_sha
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;

    use crate::App;
    use crate::config::Config;
    use crate::ops::git::MockGitOps;
    use crate::ops::github::MockGithubOps;
    use crate::ops::github::PullRequest;
    use crate::stack::Commit;

    fn synced_commit(sha: &str, subject: &str, branch: &str, pr: u64) -> Commit {
        Commit::new(
            sha,
            &sha[..4],
            subject,
            &format!("Stacker-Branch: {branch}\nStacker-PR: {pr}"),
        )
    }

    fn pr(number: u64) -> PullRequest {
        PullRequest {
            number,
            title: "t".to_string(),
            body: String::new(),
            state: "OPEN".to_string(),
            url: format!("https://github.com/test/repo/pull/{number}"),
        }
    }

    fn base_mocks(git: &mut MockGitOps) {
        git.expect_is_rebase_in_progress().returning(|| Ok(false));
        git.expect_current_branch()
            .returning(|| Ok("feature".to_string()));
        git.expect_merge_base()
            .returning(|_, _| Ok("base0000".to_string()));
        git.expect_parse_commit()
            .returning(|_| Ok(Commit::new("base0000", "base", "Base", "")));
    }

    #[tokio::test]
    async fn test_submit_with_synced_trailers_skips_rewrite() {
        let mut git = MockGitOps::new();
        base_mocks(&mut git);
        git.expect_commits_in_range().returning(|_, _| {
            Ok(vec![
                synced_commit("aaaa1111", "Alpha", "feature/1", 10),
                synced_commit("bbbb2222", "Beta", "feature/2", 11),
            ])
        });
        git.expect_rewrite_messages().times(0);
        git.expect_amend_message().times(0);
        git.expect_create_branch().times(2).returning(|_, _| Ok(()));
        git.expect_push_branch().times(2).returning(|_, _, _| Ok(()));

        let mut gh = MockGithubOps::new();
        gh.expect_pull_request_url()
            .returning(|n| format!("https://github.com/test/repo/pull/{n}"));
        gh.expect_get_pr().returning(|n| Ok(pr(n)));
        gh.expect_update_pr()
            .withf(|number, update| match number {
                10 => update.base.as_deref() == Some("main"),
                11 => update.base.as_deref() == Some("feature/1"),
                _ => false,
            })
            .times(2)
            .returning(|_, _| Ok(()));

        let app = App::new(Config::default_for_tests(), git, gh);
        let mut stdout = Vec::new();
        app.cmd_submit(None, &mut stdout).await.unwrap();

        let out = String::from_utf8(stdout).unwrap();
        assert!(out.contains("Pushed feature/1"));
        assert!(!out.contains("Rewrote"));
    }

    #[tokio::test]
    async fn test_submit_fresh_commit_rewrites_creates_and_embeds_pr() {
        // commits_in_range is consulted three times: the initial build, the
        // rebuild after the branch-trailer rewrite, and the rebuild after the
        // PR-number rewrite.
        let builds = Arc::new(AtomicUsize::new(0));
        let mut git = MockGitOps::new();
        base_mocks(&mut git);
        let counter = builds.clone();
        git.expect_commits_in_range().returning(move |_, _| {
            let call = counter.fetch_add(1, Ordering::SeqCst);
            let commit = match call {
                0 => Commit::new("aaaa1111", "aaaa", "Alpha", ""),
                1 => Commit::new(
                    "cccc1111",
                    "cccc",
                    "Alpha",
                    "Stacker-Branch: stacker/feature/1",
                ),
                _ => synced_commit("dddd1111", "Alpha", "stacker/feature/1", 42),
            };
            Ok(vec![commit])
        });
        // A single-commit stack syncs via amend, not a scripted rebase
        git.expect_rewrite_messages().times(0);
        git.expect_amend_message().times(2).returning(|_| Ok(()));
        git.expect_create_branch().times(2).returning(|_, _| Ok(()));
        git.expect_push_branch().times(2).returning(|_, _, _| Ok(()));

        let mut gh = MockGithubOps::new();
        gh.expect_find_pr_by_head().returning(|_| Ok(None));
        gh.expect_pull_request_url()
            .returning(|n| format!("https://github.com/test/repo/pull/{n}"));
        gh.expect_create_pr()
            .withf(|head, base, title, _, _, _| {
                head == "stacker/feature/1" && base == "main" && title == "Alpha"
            })
            .times(1)
            .returning(|_, _, _, _, _, _| Ok(42));
        gh.expect_get_pr().returning(|n| Ok(pr(n)));
        gh.expect_update_pr().times(1).returning(|_, _| Ok(()));

        let app = App::new(Config::default_for_tests(), git, gh);
        let mut stdout = Vec::new();
        app.cmd_submit(None, &mut stdout).await.unwrap();

        assert_eq!(builds.load(Ordering::SeqCst), 3);
        let out = String::from_utf8(stdout).unwrap();
        assert!(out.contains("Created PR #42 for stacker/feature/1 with base main"));
        // One commit was stale, not the stack's full length
        assert!(out.contains("Rewrote 1 commit message(s)"));
    }

    #[tokio::test]
    async fn test_submit_empty_stack_is_a_noop() {
        let mut git = MockGitOps::new();
        base_mocks(&mut git);
        git.expect_commits_in_range().returning(|_, _| Ok(vec![]));
        git.expect_create_branch().times(0);

        let mut gh = MockGithubOps::new();
        gh.expect_find_pr_by_head().returning(|_| Ok(None));

        let app = App::new(Config::default_for_tests(), git, gh);
        let mut stdout = Vec::new();
        app.cmd_submit(None, &mut stdout).await.unwrap();
        assert!(String::from_utf8(stdout).unwrap().contains("nothing to submit"));
    }

    #[tokio::test]
    async fn test_submit_refuses_during_rebase() {
        let mut git = MockGitOps::new();
        git.expect_is_rebase_in_progress().returning(|| Ok(true));

        let app = App::new(Config::default_for_tests(), git, MockGithubOps::new());
        let mut stdout = Vec::new();
        let result = app.cmd_submit(None, &mut stdout).await;
        let message = result.unwrap_err().to_string();
        assert!(message.contains("rebase is already in progress"));
    }
}
