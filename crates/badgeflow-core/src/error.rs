//! Error type shared by every BadgeFlow crate.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, AutomationError>;

#[derive(Debug, Error)]
pub enum AutomationError {
    #[error("{0} is required in action_config")]
    MissingConfig(&'static str),

    #[error("Invalid action_config: {0}")]
    InvalidConfig(String),

    #[error("No generation adapter registered for service '{0}'")]
    UnknownService(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Search index error: {0}")]
    Search(String),

    #[error("Qualification oracle error: {0}")]
    Oracle(String),

    #[error("Generation service error: {0}")]
    Generation(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("{operation} timed out after {secs}s")]
    Timeout { operation: String, secs: u64 },

    #[error("User {user_id} already holds badge {badge_id}")]
    DuplicateAward { user_id: i64, badge_id: i64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AutomationError {
    /// Stable class name used as the prefix of structured failure messages.
    pub fn class_name(&self) -> &'static str {
        match self {
            Self::MissingConfig(_)
            | Self::InvalidConfig(_)
            | Self::UnknownService(_)
            | Self::Config(_) => "ConfigError",
            Self::NotFound(_) => "NotFoundError",
            Self::Store(_) => "StoreError",
            Self::Search(_) => "SearchError",
            Self::Oracle(_) => "OracleError",
            Self::Generation(_) => "GenerationError",
            Self::Http(_) => "HttpError",
            Self::Timeout { .. } => "TimeoutError",
            Self::DuplicateAward { .. } => "DuplicateAwardError",
            Self::Io(_) => "IoError",
        }
    }

    /// `"<class>: <message>"`, the form reported back to the scheduler.
    pub fn describe(&self) -> String {
        format!("{}: {}", self.class_name(), self)
    }

    /// Configuration problems are not worth retrying until someone edits the automation.
    pub fn is_config(&self) -> bool {
        self.class_name() == "ConfigError"
    }
}
