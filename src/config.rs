use anyhow::Result;

use crate::error::StackerError;

/// Command configuration, read once from `.git/config` and passed in
/// explicitly wherever it is needed.
#[derive(Debug, Clone)]
pub struct Config {
    /// Remote to push branches to.
    pub remote: String,
    /// The remote default branch PRs ultimately merge into.
    pub target: String,
    /// Whether new PRs are opened as drafts.
    pub draft: bool,
    /// Namespace for generated PR branches.
    pub prefix: String,
}

impl Config {
    /// Load config from .git/config
    pub fn load() -> Result<Self> {
        let remote = Self::get_key("stacker.remote")?.unwrap_or_else(|| "origin".to_string());
        let target = Self::get_key("stacker.target")?.ok_or_else(|| {
            StackerError::precondition("No stacker configuration found in .git/config")
                .suggest("Run 'stacker init --target <branch>' to create one")
        })?;
        let draft = Self::get_key("stacker.draft")?
            .map(|value| value == "true")
            .unwrap_or(false);
        let prefix = Self::get_key("stacker.prefix")?.unwrap_or_else(|| "stacker".to_string());

        Ok(Self {
            remote,
            target,
            draft,
            prefix,
        })
    }

    /// Save config to .git/config
    pub fn save(&self) -> Result<()> {
        Self::set_key("stacker.remote", &self.remote)?;
        Self::set_key("stacker.target", &self.target)?;
        Self::set_key("stacker.draft", if self.draft { "true" } else { "false" })?;
        Self::set_key("stacker.prefix", &self.prefix)?;
        Ok(())
    }

    fn get_key(key: &str) -> Result<Option<String>> {
        let output = std::process::Command::new("git")
            .args(["config", "--get", key])
            .output()?;
        if !output.status.success() {
            return Ok(None);
        }
        Ok(Some(String::from_utf8(output.stdout)?.trim().to_string()))
    }

    fn set_key(key: &str, value: &str) -> Result<()> {
        let output = std::process::Command::new("git")
            .args(["config", key, value])
            .output()?;
        if !output.status.success() {
            anyhow::bail!("Failed to save {} to .git/config", key);
        }
        Ok(())
    }

    /// Create a new config with explicit values (useful for tests)
    pub fn new(remote: String, target: String, draft: bool, prefix: String) -> Self {
        Self {
            remote,
            target,
            draft,
            prefix,
        }
    }

    /// Default config for tests
    pub fn default_for_tests() -> Self {
        Self {
            remote: "origin".to_string(),
            target: "main".to_string(),
            draft: false,
            prefix: "stacker".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_for_tests() {
        let config = Config::default_for_tests();
        assert_eq!(config.remote, "origin");
        assert_eq!(config.target, "main");
        assert!(!config.draft);
        assert_eq!(config.prefix, "stacker");
    }

    #[test]
    fn test_new() {
        let config = Config::new(
            "upstream".to_string(),
            "trunk".to_string(),
            true,
            "me".to_string(),
        );
        assert_eq!(config.remote, "upstream");
        assert_eq!(config.target, "trunk");
        assert!(config.draft);
        assert_eq!(config.prefix, "me");
    }
}
