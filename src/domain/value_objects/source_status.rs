use serde::{Deserialize, Serialize};

/// Lifecycle state of a source file in the chunk index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl SourceStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SourceStatus::Completed | SourceStatus::Failed)
    }

    pub fn can_transition_to(&self, next: SourceStatus) -> bool {
        matches!(
            (self, next),
            (SourceStatus::Pending, SourceStatus::Processing)
                | (SourceStatus::Processing, SourceStatus::Completed)
                | (SourceStatus::Processing, SourceStatus::Failed)
                | (SourceStatus::Completed, SourceStatus::Processing)
                | (SourceStatus::Failed, SourceStatus::Processing)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceStatus::Pending => "pending",
            SourceStatus::Processing => "processing",
            SourceStatus::Completed => "completed",
            SourceStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Result<Self, String> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(SourceStatus::Pending),
            "processing" => Ok(SourceStatus::Processing),
            "completed" => Ok(SourceStatus::Completed),
            "failed" => Ok(SourceStatus::Failed),
            other => Err(format!("invalid source status: {}", other)),
        }
    }
}

impl Default for SourceStatus {
    fn default() -> Self {
        SourceStatus::Pending
    }
}

impl std::fmt::Display for SourceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        for status in [
            SourceStatus::Pending,
            SourceStatus::Processing,
            SourceStatus::Completed,
            SourceStatus::Failed,
        ] {
            assert_eq!(SourceStatus::parse(status.as_str()).unwrap(), status);
        }
    }

    #[test]
    fn test_transitions() {
        assert!(SourceStatus::Pending.can_transition_to(SourceStatus::Processing));
        assert!(SourceStatus::Processing.can_transition_to(SourceStatus::Completed));
        assert!(SourceStatus::Processing.can_transition_to(SourceStatus::Failed));
        // A changed file re-enters processing from either terminal state.
        assert!(SourceStatus::Completed.can_transition_to(SourceStatus::Processing));
        assert!(SourceStatus::Failed.can_transition_to(SourceStatus::Processing));

        assert!(!SourceStatus::Pending.can_transition_to(SourceStatus::Completed));
        assert!(!SourceStatus::Completed.can_transition_to(SourceStatus::Pending));
    }

    #[test]
    fn test_invalid_parse() {
        assert!(SourceStatus::parse("queued").is_err());
    }
}
