use anyhow::Result;
use anyhow::bail;
use anyhow::ensure;
use log::debug;

use crate::ops::git::GitOps;
use crate::stack::Commit;
use crate::stack::Stack;
use crate::trailer;

// -----------------------------------------------------------------------------
// MessageFeed

/// Rewrite driver feeding precomputed messages to a scripted history rewrite.
///
/// Holds the reword instruction list plus one final message per commit,
/// oldest first. Messages are handed out through a sequential cursor; this
/// is only sound because the consumer (the git rebase machinery) requests
/// them serially, in commit order, exactly once each. Never consume a feed
/// out of order or in parallel.
#[derive(Debug)]
pub struct MessageFeed {
    todo_list: String,
    messages: Vec<String>,
    cursor: usize,
}

impl MessageFeed {
    /// Build a feed for rewording `commits` with `messages`, index-aligned.
    pub fn new(commits: &[Commit], messages: Vec<String>) -> Result<Self> {
        ensure!(
            commits.len() == messages.len(),
            "message count {} does not match commit count {}",
            messages.len(),
            commits.len()
        );
        let todo_list = commits
            .iter()
            .map(|commit| format!("reword {} {}\n", commit.sha, commit.subject))
            .collect();
        Ok(Self {
            todo_list,
            messages,
            cursor: 0,
        })
    }

    /// The instruction list replacing the generated rebase todo, one reword
    /// per commit in range order.
    pub fn todo_list(&self) -> &str {
        &self.todo_list
    }

    /// Hand out the next message in commit order.
    pub fn next_message(&mut self) -> Result<String> {
        if self.cursor >= self.messages.len() {
            bail!(
                "message feed drained: asked for message {} of {}",
                self.cursor + 1,
                self.messages.len()
            );
        }
        let message = self.messages[self.cursor].clone();
        self.cursor += 1;
        Ok(message)
    }

    pub fn is_drained(&self) -> bool {
        self.cursor >= self.messages.len()
    }
}

// -----------------------------------------------------------------------------
// Trailer synchronization

/// The stack trailers entry `index` of the stack should carry.
fn target_trailers(stack: &Stack, index: usize) -> Vec<(String, String)> {
    let entry = &stack.entries[index];
    let mut pairs = vec![(trailer::BRANCH_KEY.to_string(), entry.branch_name.clone())];
    if let Some(pr) = entry.pr_number {
        pairs.push((trailer::PR_KEY.to_string(), pr.to_string()));
    }
    if index == 0 {
        if let Some(dep) = &stack.depends_on {
            pairs.push((trailer::DEPENDS_ON_KEY.to_string(), dep.stack_name.clone()));
        }
    }
    pairs
}

/// The final message for every commit in the stack, oldest first.
pub fn target_messages(stack: &Stack) -> Vec<String> {
    stack
        .entries
        .iter()
        .enumerate()
        .map(|(index, entry)| trailer::set(&entry.commit.message(), &target_trailers(stack, index)))
        .collect()
}

/// Indices of entries whose stack trailers differ from the target trailers.
///
/// Compares branch name and PR number; when everything already matches the
/// synchronizer must not run at all, to avoid needless sha churn and
/// force-pushes.
fn stale_indices(stack: &Stack) -> Vec<usize> {
    stack
        .entries
        .iter()
        .enumerate()
        .filter(|(_, entry)| {
            let existing = entry.commit.stack_trailers();
            existing.branch.as_deref() != Some(entry.branch_name.as_str())
                || existing.pr != entry.pr_number
        })
        .map(|(index, _)| index)
        .collect()
}

pub fn needs_sync(stack: &Stack) -> bool {
    !stale_indices(stack).is_empty()
}

/// Rewrite every commit in the stack to carry up-to-date trailers.
///
/// Returns the number of commit messages that actually changed; 0 means all
/// trailers already matched and nothing ran. After a non-zero return the
/// caller must rebuild the stack: every commit's sha changed.
pub async fn sync_trailers<G: GitOps>(git: &G, stack: &Stack, base: &str) -> Result<usize> {
    let stale = stale_indices(stack);
    if stack.entries.is_empty() || stale.is_empty() {
        debug!("stack trailers up to date; skipping rewrite");
        return Ok(0);
    }

    // When only the top commit is stale, an amend of HEAD does the job
    // without touching the rebase machinery.
    if stale == [stack.entries.len() - 1] {
        let index = stack.entries.len() - 1;
        let entry = &stack.entries[index];
        let message = trailer::set(&entry.commit.message(), &target_trailers(stack, index));
        git.amend_message(&message).await?;
        return Ok(1);
    }

    let commits: Vec<Commit> = stack
        .entries
        .iter()
        .map(|entry| entry.commit.clone())
        .collect();
    let feed = MessageFeed::new(&commits, target_messages(stack))?;
    git.rewrite_messages(base, feed).await?;
    Ok(stale.len())
}
