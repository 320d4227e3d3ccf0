//! Processing of one `old new ref` line from the hook's stdin

use std::io::Write;
use std::str::FromStr;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::config::{HookConfig, MailConfig};
use crate::dispatch::{self, WebhookClient};
use crate::error::{NotifyError, Result};
use crate::mailer::{self, MailTransport};
use crate::payload::{self, Payload};
use crate::report::{ChannelStatus, PushReport};
use crate::revision;
use crate::vcs::{self, Vcs};

/// Stands for a ref that does not exist yet, or no longer exists.
pub const NULL_REVISION: &str = "0000000000000000000000000000000000000000";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushUpdate {
    pub old: String,
    pub new: String,
    pub ref_name: String,
}

impl FromStr for PushUpdate {
    type Err = NotifyError;

    fn from_str(line: &str) -> Result<Self> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        match tokens.as_slice() {
            [old, new, ref_name] => Ok(Self {
                old: old.to_string(),
                new: new.to_string(),
                ref_name: ref_name.to_string(),
            }),
            _ => Err(NotifyError::MalformedPushLine(line.to_string())),
        }
    }
}

impl PushUpdate {
    pub fn branch(&self) -> &str {
        payload::branch_name(&self.ref_name)
    }
}

/// Replace the null revision on either side.
///
/// A new branch is diffed from the second most recent commit across all
/// refs; a deleted branch collapses to `new == old` and so lists nothing.
pub async fn normalize<V: Vcs>(vcs: &V, mut update: PushUpdate) -> Result<PushUpdate> {
    if update.old == NULL_REVISION {
        let recent = vcs::recent_commits(vcs).await?;
        let baseline = recent.get(1).or(recent.first()).ok_or_else(|| {
            NotifyError::MalformedRevision("repository has no commits to diff against".to_string())
        })?;
        debug!("New branch {}; diffing from {}", update.branch(), baseline);
        update.old = baseline.clone();
    }
    if update.new == NULL_REVISION {
        debug!("Deleted branch {}", update.branch());
        update.new = update.old.clone();
    }
    Ok(update)
}

/// Runs each push line through listing, payload, mail and webhook delivery.
pub struct PushProcessor<'a, V, M, C> {
    config: &'a HookConfig,
    vcs: &'a V,
    mailer: Option<&'a M>,
    client: &'a C,
}

impl<'a, V: Vcs, M: MailTransport, C: WebhookClient> PushProcessor<'a, V, M, C> {
    pub fn new(config: &'a HookConfig, vcs: &'a V, mailer: Option<&'a M>, client: &'a C) -> Self {
        Self {
            config,
            vcs,
            mailer,
            client,
        }
    }

    /// List, parse and package the commits of a normalized update.
    pub async fn build_payload(&self, update: &PushUpdate) -> Result<Payload> {
        let listing = vcs::list_revisions(self.vcs, &update.old, &update.new).await?;
        let revisions = revision::parse_revisions(&listing)?;
        Ok(payload::build_payload(
            &update.old,
            &update.new,
            &update.ref_name,
            revisions,
            &self.config.repository,
            self.config.commit_url_template.as_deref(),
        ))
    }

    /// Handle one stdin line. Errors returned here concern only this line;
    /// mail and webhook failures are recorded in the report instead.
    pub async fn process_line<W: Write>(&self, line: &str, out: &mut W) -> Result<PushReport> {
        let update: PushUpdate = line.parse()?;
        let mut report = PushReport::new(
            update.ref_name.clone(),
            update.old.clone(),
            update.new.clone(),
        );
        let span = info_span!("push", id = %report.id, git_ref = %update.ref_name);

        async {
            let update = normalize(self.vcs, update).await?;
            report.before = update.old.clone();
            report.after = update.new.clone();

            let payload = self.build_payload(&update).await?;
            report.commit_count = payload.commits.len();
            info!(
                "{} commit(s) on {} ({}..{})",
                payload.commits.len(),
                update.ref_name,
                update.old,
                update.new
            );
            let body = serde_json::to_string(&payload)?;

            match (&self.config.mail, self.mailer) {
                (MailConfig::Ready(settings), Some(transport)) => {
                    let outcome = mailer::notify(self.vcs, transport, settings, &payload).await;
                    if let Err(e) = &outcome {
                        error!("Mail notification failed: {}", e);
                    }
                    report.record_mail(&outcome);
                }
                (MailConfig::Ready(_), None) => {
                    report.record_mail_failure("no mail transport available");
                }
                (MailConfig::Invalid(reason), _) => {
                    warn!("Mail notification skipped: {}", reason);
                    report.record_mail_failure(reason);
                }
                (MailConfig::Disabled, _) => debug!("Mail notification disabled"),
            }

            match dispatch::dispatch(self.client, &self.config.webhook_urls, &body, out).await {
                Ok(delivery) => report.record_delivery(&delivery),
                Err(e) => {
                    warn!("Could not write payload: {}", e);
                    report.delivery = ChannelStatus::Failed;
                }
            }

            report.complete();
            Ok::<_, NotifyError>(report)
        }
        .instrument(span)
        .await
    }
}
