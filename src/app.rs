use anyhow::Result;

use crate::config::Config;
use crate::error::StackerError;
use crate::ops::git::GitOps;
use crate::ops::github::GithubOps;
use crate::stack;
use crate::stack::Stack;

pub struct App<G: GitOps, H: GithubOps> {
    pub config: Config,
    pub git: G,
    pub gh: H,
}

impl<G: GitOps, H: GithubOps> App<G, H> {
    pub fn new(config: Config, git: G, gh: H) -> Self {
        Self { config, git, gh }
    }
}

/// Shared helper methods for App
impl<G: GitOps, H: GithubOps> App<G, H> {
    /// Refuse to mutate anything while the repository is mid-rebase.
    ///
    /// A paused rewrite belongs to the operator; it is never resumed or
    /// discarded automatically.
    pub(crate) async fn ensure_no_rebase_in_progress(&self) -> Result<()> {
        if self.git.is_rebase_in_progress().await? {
            return Err(StackerError::precondition(
                "A rebase is already in progress in this repository",
            )
            .suggest("Finish it with 'git rebase --continue' or 'git rebase --abort' first")
            .into());
        }
        Ok(())
    }

    /// The base commit of the stack: an explicit override, or the merge base
    /// of the head with the remote target branch.
    pub(crate) async fn resolve_base(&self, explicit: Option<&str>, head: &str) -> Result<String> {
        match explicit {
            Some(base) => self.git.resolve_ref(base).await,
            None => {
                let target_ref = format!("{}/{}", self.config.remote, self.config.target);
                self.git.merge_base(head, &target_ref).await
            }
        }
    }

    /// Rebuild the stack view for the current branch.
    pub(crate) async fn build_current_stack(
        &self,
        explicit_base: Option<&str>,
    ) -> Result<(Stack, String)> {
        let head = self.git.current_branch().await?;
        let base = self.resolve_base(explicit_base, &head).await?;
        let name = stack::stack_name(&self.config.prefix, &head);
        let stack =
            stack::build_stack(&self.git, &self.gh, &self.config, &name, &base, &head).await?;
        Ok((stack, base))
    }
}
