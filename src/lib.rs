pub mod config;
pub mod dispatch;
pub mod error;
pub mod logging;
pub mod mailer;
pub mod payload;
pub mod push;
pub mod report;
pub mod revision;
pub mod vcs;

pub use config::{HookConfig, MailConfig, MailSettings};
pub use error::{NotifyError, Result};
pub use push::{PushProcessor, PushUpdate};
