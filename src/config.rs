//! Hook configuration, read from `git config` with an optional TOML overlay

use std::collections::HashMap;
use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use tracing::{debug, error, info, warn};

use crate::error::{NotifyError, Result};
use crate::payload::RepositoryMeta;
use crate::revision::{Identity, UNKNOWN};
use crate::vcs::{self, Vcs};

pub const WEBHOOK_URL: &str = "hooks.webhookurl";
pub const WEBHOOK_TIMEOUT: &str = "hooks.webhook-timeout";
pub const MAILING_LIST: &str = "hooks.mailinglist";
pub const EMAIL_PREFIX: &str = "hooks.emailprefix";
pub const SMTP_SUBJECT: &str = "hooks.smtp-subject";
pub const SMTP_HOST: &str = "hooks.smtp-host";
pub const SMTP_PORT: &str = "hooks.smtp-port";
pub const SMTP_SENDER: &str = "hooks.smtp-sender";
pub const LOG_FILE: &str = "hooks.post-receive-logfile";
pub const REPO_URL: &str = "meta.url";
pub const COMMIT_URL: &str = "meta.commiturl";
pub const REPO_DESCRIPTION: &str = "meta.description";
pub const OWNER_NAME: &str = "meta.ownername";
pub const OWNER_EMAIL: &str = "meta.owneremail";

/// Env var naming an optional TOML file whose values take precedence over git config.
pub const CONFIG_PATH_ENV: &str = "NOTIFY_WEBHOOK_CONFIG";

const DEFAULT_WEBHOOK_TIMEOUT_SECS: u64 = 10;
const DEFAULT_EMAIL_PREFIX: &str = "[gitolite]";

static RECIPIENT_SEPARATOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r" *, *| +").expect("valid separator regex"));

/// Key/value lookup for hook settings. `Ok(None)` means the key is unset.
#[allow(async_fn_in_trait)]
pub trait ConfigStore {
    async fn get(&self, key: &str) -> Result<Option<String>>;
}

/// Reads `git config --get <key>`.
pub struct GitConfigStore<'a, V> {
    vcs: &'a V,
}

impl<'a, V: Vcs> GitConfigStore<'a, V> {
    pub fn new(vcs: &'a V) -> Self {
        Self { vcs }
    }
}

impl<V: Vcs> ConfigStore for GitConfigStore<'_, V> {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        match self.vcs.run(&["config", "--get", key]).await {
            Ok(value) if value.is_empty() => Ok(None),
            Ok(value) => Ok(Some(value)),
            // git config exits 1 when the key is not set
            Err(e) if e.git_exit_code() == Some(1) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Flat in-memory settings, keyed by `section.name`.
#[derive(Debug, Clone, Default)]
pub struct MapConfigStore {
    values: HashMap<String, String>,
}

impl MapConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: &str) -> Self {
        self.values.insert(key.to_string(), value.to_string());
        self
    }

    /// Parse a TOML document. Tables become key prefixes, so
    /// `[hooks] webhookurl = "..."` is looked up as `hooks.webhookurl`.
    pub fn from_toml(content: &str) -> Result<Self> {
        let table: toml::Table = toml::from_str(content)?;
        let mut values = HashMap::new();
        flatten_toml("", &table, &mut values);
        Ok(Self { values })
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            NotifyError::ConfigError(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml(&content).map_err(|e| {
            NotifyError::ConfigError(format!(
                "Failed to parse config file '{}': {}",
                path.display(),
                e
            ))
        })
    }
}

fn flatten_toml(prefix: &str, table: &toml::Table, out: &mut HashMap<String, String>) {
    for (key, value) in table {
        let full_key = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{}.{}", prefix, key)
        };
        match value {
            toml::Value::Table(inner) => flatten_toml(&full_key, inner, out),
            toml::Value::String(s) => {
                out.insert(full_key, s.clone());
            }
            toml::Value::Array(items) => {
                let joined = items
                    .iter()
                    .map(|v| match v {
                        toml::Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .collect::<Vec<_>>()
                    .join(",");
                out.insert(full_key, joined);
            }
            other => {
                out.insert(full_key, other.to_string());
            }
        }
    }
}

impl ConfigStore for MapConfigStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values.get(key).filter(|v| !v.is_empty()).cloned())
    }
}

/// Overlay first, then the fallback store.
pub struct LayeredConfigStore<O, F> {
    overlay: Option<O>,
    fallback: F,
}

impl<O: ConfigStore, F: ConfigStore> LayeredConfigStore<O, F> {
    pub fn new(overlay: Option<O>, fallback: F) -> Self {
        Self { overlay, fallback }
    }
}

impl<O: ConfigStore, F: ConfigStore> ConfigStore for LayeredConfigStore<O, F> {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        if let Some(overlay) = &self.overlay {
            if let Some(value) = overlay.get(key).await? {
                return Ok(Some(value));
            }
        }
        self.fallback.get(key).await
    }
}

/// Split `hooks.webhookurl` on commas, trimming entries and dropping empty ones.
pub fn parse_webhook_urls(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|u| !u.is_empty())
        .map(String::from)
        .collect()
}

/// Split a mailing list on commas or runs of spaces.
pub fn parse_recipients(value: &str) -> Vec<String> {
    RECIPIENT_SEPARATOR
        .split(value.trim())
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .map(String::from)
        .collect()
}

/// SMTP and message settings for mail notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailSettings {
    pub host: String,
    pub port: u16,
    pub sender: String,
    pub subject_prefix: String,
    pub subject_template: Option<String>,
    pub mailing_list: Vec<String>,
}

impl MailSettings {
    /// `Ok(None)` when no SMTP setting is present at all (webhook-only use).
    /// Any other missing required setting is an error naming it.
    pub async fn resolve<S: ConfigStore>(store: &S) -> Result<Option<Self>> {
        let host = store.get(SMTP_HOST).await?;
        let port = store.get(SMTP_PORT).await?;
        let sender = store.get(SMTP_SENDER).await?;

        if host.is_none() && port.is_none() && sender.is_none() {
            return Ok(None);
        }

        let host = host.ok_or(NotifyError::MissingSetting(SMTP_HOST))?;
        let port = port.ok_or(NotifyError::MissingSetting(SMTP_PORT))?;
        let sender = sender.ok_or(NotifyError::MissingSetting(SMTP_SENDER))?;
        let port = port.trim().parse::<u16>().map_err(|e| {
            NotifyError::ConfigError(format!(
                "{} must be a port number, got {:?}: {}",
                SMTP_PORT, port, e
            ))
        })?;

        Ok(Some(Self {
            host,
            port,
            sender,
            subject_prefix: store
                .get(EMAIL_PREFIX)
                .await?
                .unwrap_or_else(|| DEFAULT_EMAIL_PREFIX.to_string()),
            subject_template: store.get(SMTP_SUBJECT).await?,
            mailing_list: store
                .get(MAILING_LIST)
                .await?
                .map(|v| parse_recipients(&v))
                .unwrap_or_default(),
        }))
    }
}

/// Mail channel state. A broken mail setup disables mail only; webhooks
/// still run and each push records the reason as a mail failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MailConfig {
    Disabled,
    Ready(MailSettings),
    Invalid(String),
}

/// Everything the hook needs, resolved once per process.
#[derive(Debug, Clone)]
pub struct HookConfig {
    pub webhook_urls: Vec<String>,
    pub webhook_timeout: Duration,
    pub commit_url_template: Option<String>,
    pub repository: RepositoryMeta,
    pub mail: MailConfig,
}

impl HookConfig {
    pub async fn resolve<S: ConfigStore, V: Vcs>(
        store: &S,
        vcs: &V,
        work_dir: &Path,
    ) -> Result<Self> {
        let webhook_urls = store
            .get(WEBHOOK_URL)
            .await?
            .map(|v| parse_webhook_urls(&v))
            .unwrap_or_default();
        if webhook_urls.is_empty() {
            info!("No {} configured; payloads go to stdout", WEBHOOK_URL);
        }

        let webhook_timeout = match store.get(WEBHOOK_TIMEOUT).await? {
            Some(v) => Duration::from_secs(v.trim().parse().map_err(|e| {
                NotifyError::ConfigError(format!(
                    "{} must be whole seconds, got {:?}: {}",
                    WEBHOOK_TIMEOUT, v, e
                ))
            })?),
            None => Duration::from_secs(DEFAULT_WEBHOOK_TIMEOUT_SECS),
        };

        let repo_url = store.get(REPO_URL).await?;
        let commit_url_template = match store.get(COMMIT_URL).await? {
            Some(template) => Some(template),
            None => repo_url.as_ref().map(|url| format!("{}/commit/%s", url)),
        };

        let repository = resolve_repository(store, vcs, work_dir, repo_url).await?;
        let mail = match MailSettings::resolve(store).await {
            Ok(Some(settings)) => MailConfig::Ready(settings),
            Ok(None) => {
                info!("No SMTP settings configured; mail notification disabled");
                MailConfig::Disabled
            }
            Err(e) => {
                error!("Mail notification unavailable: {}", e);
                MailConfig::Invalid(e.to_string())
            }
        };

        Ok(Self {
            webhook_urls,
            webhook_timeout,
            commit_url_template,
            repository,
            mail,
        })
    }
}

async fn resolve_repository<S: ConfigStore, V: Vcs>(
    store: &S,
    vcs: &V,
    work_dir: &Path,
    url: Option<String>,
) -> Result<RepositoryMeta> {
    let bare = vcs::is_bare_repository(vcs).await?;
    let name = repository_name(work_dir, bare);

    let description = match store.get(REPO_DESCRIPTION).await? {
        Some(description) => description,
        None => match tokio::fs::read_to_string(work_dir.join("description")).await {
            Ok(content) => content.trim().to_string(),
            Err(e) => {
                debug!("No description file: {}", e);
                String::new()
            }
        },
    };

    let mut owner_name = store.get(OWNER_NAME).await?;
    let mut owner_email = store.get(OWNER_EMAIL).await?;
    if owner_name.is_none() || owner_email.is_none() {
        match vcs::first_author(vcs).await {
            Ok(Some((name, email))) => {
                owner_name.get_or_insert(name);
                owner_email.get_or_insert(email);
            }
            Ok(None) => warn!("Repository has no commits; owner unknown"),
            Err(e) => warn!("Could not look up first commit author: {}", e),
        }
    }

    Ok(RepositoryMeta {
        url,
        name,
        description,
        owner: Identity::new(
            owner_name.unwrap_or_else(|| UNKNOWN.to_string()),
            owner_email.unwrap_or_else(|| UNKNOWN.to_string()),
        ),
    })
}

/// Bare repositories are named after their directory (minus `.git`); a
/// hook in a working copy runs inside `.git`, so the parent names it.
pub fn repository_name(work_dir: &Path, bare: bool) -> String {
    let dir = if bare {
        Some(work_dir)
    } else {
        work_dir.parent()
    };
    let name = dir
        .and_then(|d| d.file_name())
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| UNKNOWN.to_string());
    match name.strip_suffix(".git") {
        Some(stripped) if bare => stripped.to_string(),
        _ => name,
    }
}
