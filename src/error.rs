use std::fmt::Display;

// -----------------------------------------------------------------------------
// StackerError

/// Domain errors, grouped by what the operator has to do about them.
///
/// Every variant carries a short user-facing message and an optional
/// remediation suggestion. Low-level causes (subprocess stderr etc.) are
/// attached by callers via `anyhow::Context` and only shown in verbose mode.
#[derive(Debug, thiserror::Error)]
pub enum StackerError {
    /// A ref, merge base or commit could not be resolved.
    #[error("{message}")]
    Resolution {
        message: String,
        suggestion: Option<String>,
    },

    /// A history rewrite is paused or conflicted and needs operator action.
    #[error("{message}")]
    Rewrite {
        message: String,
        suggestion: Option<String>,
    },

    /// A push was rejected by the remote.
    #[error("{message}")]
    Push {
        message: String,
        suggestion: Option<String>,
    },

    /// The review service rejected or failed a request.
    #[error("{message}")]
    ReviewService {
        message: String,
        suggestion: Option<String>,
    },

    /// A precondition failed before any mutation was attempted.
    #[error("{message}")]
    Precondition {
        message: String,
        suggestion: Option<String>,
    },
}

impl StackerError {
    pub fn resolution(message: impl Display) -> Self {
        Self::Resolution {
            message: message.to_string(),
            suggestion: None,
        }
    }

    pub fn rewrite(message: impl Display) -> Self {
        Self::Rewrite {
            message: message.to_string(),
            suggestion: None,
        }
    }

    pub fn push(message: impl Display) -> Self {
        Self::Push {
            message: message.to_string(),
            suggestion: None,
        }
    }

    pub fn review_service(message: impl Display) -> Self {
        Self::ReviewService {
            message: message.to_string(),
            suggestion: None,
        }
    }

    pub fn precondition(message: impl Display) -> Self {
        Self::Precondition {
            message: message.to_string(),
            suggestion: None,
        }
    }

    /// Attach a remediation suggestion to the error.
    pub fn suggest(mut self, text: impl Display) -> Self {
        let slot = match &mut self {
            Self::Resolution { suggestion, .. }
            | Self::Rewrite { suggestion, .. }
            | Self::Push { suggestion, .. }
            | Self::ReviewService { suggestion, .. }
            | Self::Precondition { suggestion, .. } => suggestion,
        };
        *slot = Some(text.to_string());
        self
    }

    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Resolution { suggestion, .. }
            | Self::Rewrite { suggestion, .. }
            | Self::Push { suggestion, .. }
            | Self::ReviewService { suggestion, .. }
            | Self::Precondition { suggestion, .. } => suggestion.as_deref(),
        }
    }

    /// Classify a rejected `git push` from its stderr to tailor the suggestion.
    pub fn classify_push(branch: &str, stderr: &str) -> Self {
        let lowered = stderr.to_lowercase();
        if lowered.contains("stale info")
            || lowered.contains("fetch first")
            || lowered.contains("[rejected]")
        {
            Self::push(format!(
                "Push of {branch} was rejected: the remote branch moved"
            ))
            .suggest("Fetch and re-run; someone else may have updated this stack")
        } else if lowered.contains("permission") || lowered.contains("403") {
            Self::push(format!("Push of {branch} was denied"))
                .suggest("Check that you have write access to the repository")
        } else {
            Self::push(format!("Push of {branch} failed: {}", stderr.trim()))
        }
    }

    /// Classify a failed `gh` call from its stderr.
    pub fn classify_review_service(stderr: &str) -> Self {
        let lowered = stderr.to_lowercase();
        if lowered.contains("not found") || lowered.contains("404") {
            Self::review_service("Pull request or repository not found")
                .suggest("Check that the PR still exists and the remote is a GitHub repository")
        } else if lowered.contains("auth") || lowered.contains("401") {
            Self::review_service("GitHub authentication failed")
                .suggest("Run 'gh auth login' and try again")
        } else if lowered.contains("rate limit") {
            Self::review_service("GitHub rate limit exceeded")
                .suggest("Wait a few minutes before retrying")
        } else if lowered.contains("permission") || lowered.contains("403") {
            Self::review_service("GitHub denied the request")
                .suggest("Check that your token has pull request write access")
        } else {
            Self::review_service(format!("GitHub request failed: {}", stderr.trim()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_suggestion_attached() {
        let err = StackerError::precondition("no commits").suggest("commit something");
        assert_eq!(err.to_string(), "no commits");
        assert_eq!(err.suggestion(), Some("commit something"));
    }

    #[test]
    fn test_classify_push_stale() {
        let err = StackerError::classify_push("feature/1", "! [rejected] stale info");
        assert!(err.to_string().contains("remote branch moved"));
        assert!(err.suggestion().unwrap().contains("Fetch"));
    }

    #[test]
    fn test_classify_review_service_auth() {
        let err = StackerError::classify_review_service("HTTP 401: authentication required");
        assert_eq!(err.suggestion(), Some("Run 'gh auth login' and try again"));
    }
}
