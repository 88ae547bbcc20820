use anyhow::Result;
use colored::Colorize;

use crate::App;
use crate::ops::git::GitOps;
use crate::ops::github::GithubOps;

impl<G: GitOps, H: GithubOps> App<G, H> {
    /// Print the stack, top of the stack first, one entry per line with the
    /// PR url dimmed underneath.
    pub async fn cmd_status(
        &self,
        base: Option<&str>,
        stdout: &mut impl std::io::Write,
    ) -> Result<()> {
        let (stack, _base) = self.build_current_stack(base).await?;
        if stack.entries.is_empty() {
            writeln!(stdout, "No commits on top of {}", stack.target)?;
            return Ok(());
        }

        writeln!(
            stdout,
            "Stack {} ({} commits targeting {})",
            stack.name.bold(),
            stack.entries.len(),
            stack.target
        )?;
        if let Some(dep) = &stack.depends_on {
            let link = match dep.pr_number {
                Some(number) => format!("#{number}"),
                None => dep.top_branch.clone(),
            };
            writeln!(
                stdout,
                "{}",
                format!("Depends on stack {} ({link})", dep.stack_name).yellow()
            )?;
        }

        for (index, entry) in stack.entries.iter().enumerate().rev() {
            let symbol = self.sync_symbol(entry).await;
            let pr = match entry.pr_number {
                Some(number) => format!("#{number}"),
                None => "-".to_string(),
            };
            let out = format!(
                "{} {}. {} {} {}",
                symbol,
                index + 1,
                entry.commit.short_sha.cyan(),
                entry.commit.subject.white(),
                pr
            );
            writeln!(stdout, "{}", out.trim_end())?;
            if let Some(url) = &entry.pr_url {
                writeln!(stdout, "    {}", url.dimmed())?;
            }
        }
        Ok(())
    }

    /// Whether the remote branch already points at this entry's commit.
    async fn sync_symbol(&self, entry: &crate::stack::StackEntry) -> colored::ColoredString {
        match self
            .git
            .remote_branch_sha(&self.config.remote, &entry.branch_name)
            .await
        {
            Ok(Some(sha)) if sha == entry.commit.sha => "✓".green(),
            Ok(_) => "↑".yellow(),
            Err(_) => "?".red(),
        }
    }
}
