use std::io;

/// Custom error type for notify_webhook operations
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("Git operation failed: {command}\n{message}")]
    GitOperationFailed {
        command: String,
        code: Option<i32>,
        message: String,
    },

    #[error("Malformed push line: {0:?}")]
    MalformedPushLine(String),

    #[error("Malformed revision record: {0}")]
    MalformedRevision(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("This hook needs {0} to send mail")]
    MissingSetting(&'static str),

    #[error("No Author line in commit {0}")]
    MissingAuthor(String),

    #[error("Webhook delivery to {url} failed: {message}")]
    WebhookFailed { url: String, message: String },

    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParseError(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("SMTP error: {0}")]
    SmtpError(#[from] lettre::transport::smtp::Error),

    #[error("Email error: {0}")]
    EmailError(#[from] lettre::error::Error),

    #[error("Invalid email address: {0}")]
    AddressError(#[from] lettre::address::AddressError),
}

impl NotifyError {
    /// Exit code of the git process, if this is a git failure that ran to completion.
    pub fn git_exit_code(&self) -> Option<i32> {
        match self {
            NotifyError::GitOperationFailed { code, .. } => *code,
            _ => None,
        }
    }
}

/// Helper type for Results that use NotifyError
pub type Result<T> = std::result::Result<T, NotifyError>;
