use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;

/// Run a git command in the repo and return trimmed stdout.
pub async fn git(dir: &Path, args: &[&str]) -> anyhow::Result<String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .stdin(Stdio::null())
        .output()
        .await?;
    anyhow::ensure!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    Ok(String::from_utf8(output.stdout)?.trim().to_string())
}

/// Creates a git repository in the given directory.
///
/// This initializes the repo and sets basic git config needed for commits.
/// The directory should already exist.
pub async fn create_git_repo(dir: &Path) -> anyhow::Result<()> {
    git(dir, &["init"]).await?;
    git(dir, &["checkout", "-B", "main"]).await?;
    git(dir, &["config", "user.name", "Test User"]).await?;
    git(dir, &["config", "user.email", "test@example.com"]).await?;
    git(dir, &["config", "commit.gpgsign", "false"]).await?;
    Ok(())
}

/// Write a file and commit it with the given full message. Returns the sha.
pub async fn commit_file(
    dir: &Path,
    file: &str,
    content: &str,
    message: &str,
) -> anyhow::Result<String> {
    tokio::fs::write(dir.join(file), content).await?;
    git(dir, &["add", file]).await?;
    git(dir, &["commit", "-m", message]).await?;
    git(dir, &["rev-parse", "HEAD"]).await
}

/// Tree ids of every commit in base..HEAD, oldest first. Rewording a commit
/// must never change these.
pub async fn tree_ids(dir: &Path, base: &str) -> anyhow::Result<Vec<String>> {
    let range = format!("{base}..HEAD");
    let output = git(dir, &["log", "--reverse", "--format=%T", &range]).await?;
    Ok(output.lines().map(str::to_string).collect())
}
