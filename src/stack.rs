use anyhow::Result;
use log::debug;

use crate::config::Config;
use crate::ops::git::GitOps;
use crate::ops::github::GithubOps;
use crate::trailer;
use crate::trailer::StackTrailers;

// -----------------------------------------------------------------------------
// Types

/// An immutable snapshot of one commit.
///
/// Identity is the sha; rewriting the message produces a new commit with a
/// new sha and invalidates every descendant's sha.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    pub sha: String,
    pub short_sha: String,
    /// First line of the message.
    pub subject: String,
    /// Remaining message text, trailers included.
    pub body: String,
    /// Parsed trailer block, unique keys.
    pub trailers: Vec<(String, String)>,
}

impl Commit {
    pub fn new(sha: &str, short_sha: &str, subject: &str, body: &str) -> Self {
        let mut commit = Self {
            sha: sha.to_string(),
            short_sha: short_sha.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
            trailers: Vec::new(),
        };
        commit.trailers = trailer::parse(&commit.message());
        commit
    }

    /// Reconstruct the full commit message from subject and body.
    pub fn message(&self) -> String {
        if self.body.is_empty() {
            self.subject.clone()
        } else {
            format!("{}\n\n{}", self.subject, self.body)
        }
    }

    pub fn stack_trailers(&self) -> StackTrailers {
        StackTrailers::decode(&self.trailers)
    }
}

/// One (commit, PR) pairing within a stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackEntry {
    pub commit: Commit,
    pub branch_name: String,
    /// The branch this entry's PR merges into: the previous entry's branch,
    /// or the stack's base target for the bottom entry.
    pub target_branch: String,
    pub pr_number: Option<u64>,
    pub pr_url: Option<String>,
}

/// A link from this stack's bottom commit to another stack's top branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackDependency {
    pub stack_name: String,
    pub top_branch: String,
    pub pr_number: Option<u64>,
    /// Dependency is inferred from the base commit's trailers, never
    /// declared manually.
    pub auto_detected: bool,
}

/// An ordered stack of commits, bottom (oldest) first.
///
/// Stacks are ephemeral views rebuilt at the start of every command from the
/// live commit range and its trailers; they are never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stack {
    pub name: String,
    /// The remote default branch PRs ultimately merge into.
    pub target: String,
    pub entries: Vec<StackEntry>,
    pub depends_on: Option<StackDependency>,
}

impl Stack {
    /// What the bottom entry targets: the depended-on stack's top branch if
    /// present, else the configured target.
    pub fn base_target(&self) -> &str {
        self.depends_on
            .as_ref()
            .map(|dep| dep.top_branch.as_str())
            .unwrap_or(&self.target)
    }
}

// -----------------------------------------------------------------------------
// Builder

/// Derive the stack name for a checked-out branch: `{prefix}/{branch}`, with
/// the branch name flattened to a single path segment.
///
/// Generated branch names are `{stack_name}/{position}`; namespacing them
/// under the prefix keeps them clear of the branch's own ref (git refuses to
/// create `feature/1` while `feature` exists), and flattening keeps nested
/// branch names like `user/feature` from re-introducing the same conflict.
pub fn stack_name(prefix: &str, branch: &str) -> String {
    let sanitized: String = branch
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '-'
            }
        })
        .collect();
    format!("{prefix}/{sanitized}")
}

/// Build the stack for `base..head`.
///
/// Branch names declared in trailers always win over freshly generated ones,
/// so rebuilding from unchanged commits is idempotent. An empty range yields
/// an empty stack; callers treat that as "nothing to do".
pub async fn build_stack<G: GitOps, H: GithubOps>(
    git: &G,
    gh: &H,
    config: &Config,
    name: &str,
    base: &str,
    head: &str,
) -> Result<Stack> {
    let commits = git.commits_in_range(base, head).await?;
    let depends_on = detect_dependency(git, gh, name, base).await;

    let mut entries: Vec<StackEntry> = Vec::with_capacity(commits.len());
    for (position, commit) in commits.into_iter().enumerate() {
        let declared = commit.stack_trailers();
        let branch_name = declared
            .branch
            .unwrap_or_else(|| format!("{name}/{}", position + 1));

        // Trailer wins; otherwise a best-effort, try-once remote lookup
        let pr_number = match declared.pr {
            Some(number) => Some(number),
            None => gh.find_pr_by_head(&branch_name).await.ok().flatten(),
        };

        let target_branch = match entries.last() {
            Some(previous) => previous.branch_name.clone(),
            None => depends_on
                .as_ref()
                .map(|dep| dep.top_branch.clone())
                .unwrap_or_else(|| config.target.clone()),
        };

        entries.push(StackEntry {
            commit,
            branch_name,
            target_branch,
            pr_number,
            pr_url: pr_number.map(|number| gh.pull_request_url(number)),
        });
    }

    Ok(Stack {
        name: name.to_string(),
        target: config.target.clone(),
        entries,
        depends_on,
    })
}

/// Inspect the base commit's trailers for a branch belonging to a different
/// stack. Collaborator failures are swallowed; an undetectable dependency is
/// not an error.
async fn detect_dependency<G: GitOps, H: GithubOps>(
    git: &G,
    gh: &H,
    name: &str,
    base: &str,
) -> Option<StackDependency> {
    let base_commit = git.parse_commit(base).await.ok()?;
    let declared = base_commit.stack_trailers();
    let top_branch = declared.branch?;
    let (stack_name, _) = top_branch.rsplit_once('/')?;
    if stack_name == name {
        return None;
    }

    let pr_number = match declared.pr {
        Some(number) => Some(number),
        None => gh.find_pr_by_head(&top_branch).await.ok().flatten(),
    };
    debug!("detected dependency on stack {stack_name} via {top_branch}");
    Some(StackDependency {
        stack_name: stack_name.to_string(),
        top_branch,
        pr_number,
        auto_detected: true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::git::MockGitOps;
    use crate::ops::github::MockGithubOps;

    fn plain_commit(sha: &str, subject: &str) -> Commit {
        Commit::new(sha, &sha[..4.min(sha.len())], subject, "")
    }

    fn trailered_commit(sha: &str, subject: &str, branch: &str, pr: Option<u64>) -> Commit {
        let mut body = format!("Stacker-Branch: {branch}");
        if let Some(pr) = pr {
            body.push_str(&format!("\nStacker-PR: {pr}"));
        }
        Commit::new(sha, &sha[..4.min(sha.len())], subject, &body)
    }

    fn config() -> Config {
        Config::default_for_tests()
    }

    fn gh_with_no_prs() -> MockGithubOps {
        let mut gh = MockGithubOps::new();
        gh.expect_find_pr_by_head().returning(|_| Ok(None));
        gh.expect_pull_request_url()
            .returning(|n| format!("https://github.com/test/repo/pull/{n}"));
        gh
    }

    #[test]
    fn test_stack_name_is_namespaced_away_from_the_branch_ref() {
        // `stacker/feature/1` can coexist with ref `feature`; `feature/1`
        // cannot.
        assert_eq!(stack_name("stacker", "feature"), "stacker/feature");
        // Nested branch names flatten to one segment
        assert_eq!(stack_name("stacker", "user/feature"), "stacker/user-feature");
        assert_eq!(stack_name("me", "fix_v1.2"), "me/fix_v1.2");
    }

    #[tokio::test]
    async fn test_three_commits_without_trailers() {
        let mut git = MockGitOps::new();
        git.expect_commits_in_range().returning(|_, _| {
            Ok(vec![
                plain_commit("aaaa1111", "Alpha"),
                plain_commit("bbbb2222", "Beta"),
                plain_commit("cccc3333", "Gamma"),
            ])
        });
        git.expect_parse_commit()
            .returning(|_| Ok(plain_commit("00000000", "Base")));
        let gh = gh_with_no_prs();

        let stack = build_stack(&git, &gh, &config(), "feature", "00000000", "feature")
            .await
            .unwrap();

        assert_eq!(stack.entries.len(), 3);
        assert_eq!(stack.entries[0].branch_name, "feature/1");
        assert_eq!(stack.entries[1].branch_name, "feature/2");
        assert_eq!(stack.entries[2].branch_name, "feature/3");
        assert_eq!(stack.entries[0].target_branch, "main");
        assert_eq!(stack.entries[1].target_branch, "feature/1");
        assert_eq!(stack.entries[2].target_branch, "feature/2");
        assert!(stack.depends_on.is_none());
    }

    #[tokio::test]
    async fn test_ordering_invariant_with_mixed_trailers() {
        let mut git = MockGitOps::new();
        git.expect_commits_in_range().returning(|_, _| {
            Ok(vec![
                trailered_commit("aaaa1111", "Alpha", "feature/1", Some(10)),
                plain_commit("bbbb2222", "Beta"),
            ])
        });
        git.expect_parse_commit()
            .returning(|_| Ok(plain_commit("00000000", "Base")));
        let gh = gh_with_no_prs();

        let stack = build_stack(&git, &gh, &config(), "feature", "00000000", "feature")
            .await
            .unwrap();

        for i in 1..stack.entries.len() {
            assert_eq!(
                stack.entries[i].target_branch,
                stack.entries[i - 1].branch_name
            );
        }
        assert_eq!(stack.entries[0].pr_number, Some(10));
        assert_eq!(
            stack.entries[0].pr_url.as_deref(),
            Some("https://github.com/test/repo/pull/10")
        );
    }

    #[tokio::test]
    async fn test_dependency_detected_from_base_commit() {
        let mut git = MockGitOps::new();
        git.expect_commits_in_range()
            .returning(|_, _| Ok(vec![plain_commit("aaaa1111", "Alpha")]));
        git.expect_parse_commit().returning(|_| {
            Ok(trailered_commit(
                "00000000",
                "Base",
                "other-feature/2",
                None,
            ))
        });
        let gh = gh_with_no_prs();

        let stack = build_stack(&git, &gh, &config(), "feature", "00000000", "feature")
            .await
            .unwrap();

        let dep = stack.depends_on.as_ref().unwrap();
        assert_eq!(dep.stack_name, "other-feature");
        assert_eq!(dep.top_branch, "other-feature/2");
        assert!(dep.auto_detected);
        assert_eq!(stack.entries[0].target_branch, "other-feature/2");
    }

    #[tokio::test]
    async fn test_same_stack_trailer_on_base_is_not_a_dependency() {
        let mut git = MockGitOps::new();
        git.expect_commits_in_range()
            .returning(|_, _| Ok(vec![plain_commit("aaaa1111", "Alpha")]));
        git.expect_parse_commit()
            .returning(|_| Ok(trailered_commit("00000000", "Base", "feature/1", None)));
        let gh = gh_with_no_prs();

        let stack = build_stack(&git, &gh, &config(), "feature", "00000000", "feature")
            .await
            .unwrap();

        assert!(stack.depends_on.is_none());
        assert_eq!(stack.entries[0].target_branch, "main");
    }

    #[tokio::test]
    async fn test_dependency_detection_failure_is_swallowed() {
        let mut git = MockGitOps::new();
        git.expect_commits_in_range()
            .returning(|_, _| Ok(vec![plain_commit("aaaa1111", "Alpha")]));
        git.expect_parse_commit()
            .returning(|_| Err(anyhow::anyhow!("bad ref")));
        let gh = gh_with_no_prs();

        let stack = build_stack(&git, &gh, &config(), "feature", "00000000", "feature")
            .await
            .unwrap();
        assert!(stack.depends_on.is_none());
    }

    #[tokio::test]
    async fn test_rebuild_is_idempotent() {
        let commits = vec![
            trailered_commit("aaaa1111", "Alpha", "feature/1", Some(10)),
            trailered_commit("bbbb2222", "Beta", "feature/2", Some(11)),
        ];
        let mut git = MockGitOps::new();
        let returned = commits.clone();
        git.expect_commits_in_range()
            .returning(move |_, _| Ok(returned.clone()));
        git.expect_parse_commit()
            .returning(|_| Ok(plain_commit("00000000", "Base")));
        let gh = gh_with_no_prs();

        let first = build_stack(&git, &gh, &config(), "feature", "00000000", "feature")
            .await
            .unwrap();
        let second = build_stack(&git, &gh, &config(), "feature", "00000000", "feature")
            .await
            .unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_empty_range_builds_empty_stack() {
        let mut git = MockGitOps::new();
        git.expect_commits_in_range().returning(|_, _| Ok(vec![]));
        git.expect_parse_commit()
            .returning(|_| Ok(plain_commit("00000000", "Base")));
        let gh = gh_with_no_prs();

        let stack = build_stack(&git, &gh, &config(), "feature", "00000000", "feature")
            .await
            .unwrap();
        assert!(stack.entries.is_empty());
    }

    #[tokio::test]
    async fn test_existing_pr_found_by_head_branch() {
        let mut git = MockGitOps::new();
        git.expect_commits_in_range()
            .returning(|_, _| Ok(vec![plain_commit("aaaa1111", "Alpha")]));
        git.expect_parse_commit()
            .returning(|_| Ok(plain_commit("00000000", "Base")));
        let mut gh = MockGithubOps::new();
        gh.expect_find_pr_by_head()
            .withf(|branch| branch == "feature/1")
            .returning(|_| Ok(Some(42)));
        gh.expect_pull_request_url()
            .returning(|n| format!("https://github.com/test/repo/pull/{n}"));

        let stack = build_stack(&git, &gh, &config(), "feature", "00000000", "feature")
            .await
            .unwrap();
        assert_eq!(stack.entries[0].pr_number, Some(42));
    }
}
