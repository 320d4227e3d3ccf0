//! Commit notification emails
//!
//! Unprotected branches get one mail per commit, addressed to its author.
//! Protected branches get a single digest sent to the mailing list.

use lettre::message::{Mailbox, header::ContentType};
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use regex::Regex;
use std::sync::LazyLock;
use tracing::{debug, info, warn};

use crate::config::MailSettings;
use crate::error::{NotifyError, Result};
use crate::payload::Payload;
use crate::vcs::{self, Vcs};

pub const PROTECTED_BRANCHES: [&str; 3] = ["production", "development", "testing"];
pub const DIGEST_PREAMBLE: &str = "Digest of all commits follows:";
pub const DEFAULT_SUBJECT_TEMPLATE: &str = "{name} {branch} {hash} commit";

static AUTHOR_LINE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Author: (.+)").expect("valid author line regex"));

pub fn is_protected(branch: &str) -> bool {
    PROTECTED_BRANCHES.contains(&branch)
}

/// One message ready for the transport. The sender comes from the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailJob {
    pub subject: String,
    pub reply_to: String,
    pub recipients: Vec<String>,
    pub body: String,
}

#[allow(async_fn_in_trait)]
pub trait MailTransport {
    async fn send(&self, job: &MailJob) -> Result<()>;
}

/// STARTTLS SMTP relay.
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    sender: Mailbox,
}

impl SmtpMailer {
    pub fn new(settings: &MailSettings) -> Result<Self> {
        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.host)?
            .port(settings.port)
            .build();
        Ok(Self {
            transport,
            sender: settings.sender.parse()?,
        })
    }
}

impl MailTransport for SmtpMailer {
    async fn send(&self, job: &MailJob) -> Result<()> {
        let mut builder = Message::builder()
            .from(self.sender.clone())
            .reply_to(job.reply_to.parse()?)
            .subject(&job.subject)
            .header(ContentType::TEXT_PLAIN);
        for recipient in &job.recipients {
            builder = builder.to(recipient.parse()?);
        }
        let message = builder.body(job.body.clone())?;

        self.transport.send(message).await?;
        debug!("Sent {:?} to {}", job.subject, job.recipients.join(", "));
        Ok(())
    }
}

/// How many mails went out for one push.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MailReport {
    pub individual: usize,
    pub digest: bool,
}

/// Render the per-commit subject from the configured (or default) template.
pub fn render_subject(
    settings: &MailSettings,
    repo_name: &str,
    branch: &str,
    id: &str,
    summary: &vcs::CommitSummary,
) -> String {
    let template = settings
        .subject_template
        .as_deref()
        .unwrap_or(DEFAULT_SUBJECT_TEMPLATE);
    let hash = id.get(..7).unwrap_or(id);
    let rendered = template
        .replace("{name}", repo_name)
        .replace("{branch}", branch)
        .replace("{hash}", hash)
        .replace("{abbrev}", &summary.abbrev)
        .replace("{subject}", &summary.subject);
    with_prefix(settings, &rendered)
}

fn digest_subject(settings: &MailSettings, repo_name: &str, branch: &str, count: usize) -> String {
    let subject = format!(
        "{} {} digest of {} commit{}",
        repo_name,
        branch,
        count,
        if count == 1 { "" } else { "s" }
    );
    with_prefix(settings, &subject)
}

// git config output is trimmed, so the separating space is added here
fn with_prefix(settings: &MailSettings, subject: &str) -> String {
    match settings.subject_prefix.trim_end() {
        "" => subject.to_string(),
        prefix => format!("{} {}", prefix, subject),
    }
}

/// Pull the author out of the `Author:` line of `git show` output.
pub fn author_address(body: &str) -> Option<&str> {
    AUTHOR_LINE_RE
        .captures(body)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim())
}

/// Send the notifications for one push.
pub async fn notify<V: Vcs, M: MailTransport>(
    vcs: &V,
    mailer: &M,
    settings: &MailSettings,
    payload: &Payload,
) -> Result<MailReport> {
    let mut report = MailReport::default();
    if payload.commits.is_empty() {
        debug!("No commits in {}; nothing to mail", payload.ref_name);
        return Ok(report);
    }

    let (old, new) = (payload.before.as_str(), payload.after.as_str());
    let branch = payload.branch();
    let protected = is_protected(branch);
    let summary_of_changes = vcs::range_stat(vcs, old, new).await?;

    let mut digest = String::from(DIGEST_PREAMBLE);
    let mut digest_commits = 0;

    for commit in &payload.commits {
        let summary = vcs::commit_summary(vcs, &commit.id).await;
        let subject = render_subject(
            settings,
            &payload.repository.name,
            branch,
            &commit.id,
            &summary,
        );

        let body = format!(
            "The branch {} has been updated\n\nOld: {}\nNew: {}\n\n{}\n\n\n\
             Summary of Changes\n\n{}",
            branch,
            old,
            new,
            vcs::show_commit(vcs, &commit.id).await?,
            summary_of_changes
        );

        let author = author_address(&body)
            .ok_or_else(|| NotifyError::MissingAuthor(commit.id.clone()))?
            .to_string();

        if protected {
            digest.push_str(&format!("\n\n{}\n{}", subject, body));
            digest_commits += 1;
        } else {
            mailer
                .send(&MailJob {
                    subject,
                    reply_to: author.clone(),
                    recipients: vec![author],
                    body,
                })
                .await?;
            report.individual += 1;
        }
    }

    if digest_commits > 0 {
        if settings.mailing_list.is_empty() {
            warn!(
                "Protected branch {} updated but no mailing list configured",
                branch
            );
        } else {
            mailer
                .send(&MailJob {
                    subject: digest_subject(
                        settings,
                        &payload.repository.name,
                        branch,
                        digest_commits,
                    ),
                    reply_to: settings.sender.clone(),
                    recipients: settings.mailing_list.clone(),
                    body: digest,
                })
                .await?;
            report.digest = true;
        }
    }

    info!(
        "Mailed {} commit notification(s){} for {}",
        report.individual,
        if report.digest { " and a digest" } else { "" },
        payload.ref_name
    );
    Ok(report)
}


#[cfg(test)]
mod tests {
    use super::fake::RecordingMailer;
    use super::*;
    use crate::payload::{CommitRecord, RepositoryMeta};
    use crate::revision::Identity;
    use crate::vcs::fake::FakeGit;

    const OLD: &str = "1111111111111111111111111111111111111111";
    const NEW: &str = "3333333333333333333333333333333333333333";
    const C1: &str = "2222222222222222222222222222222222222222";
    const C2: &str = NEW;

    fn settings(mailing_list: &[&str]) -> MailSettings {
        MailSettings {
            host: "smtp.example.com".to_string(),
            port: 587,
            sender: "git@example.com".to_string(),
            subject_prefix: "[gitolite] ".to_string(),
            subject_template: None,
            mailing_list: mailing_list.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn commit(id: &str) -> CommitRecord {
        CommitRecord {
            id: id.to_string(),
            author: Identity::new("Ada Lovelace", "ada@example.com"),
            url: None,
            message: "msg".to_string(),
            timestamp: "2024-01-01T12:00:00+0100".to_string(),
        }
    }

    fn payload(ref_name: &str, ids: &[&str]) -> Payload {
        Payload {
            before: OLD.to_string(),
            after: NEW.to_string(),
            ref_name: ref_name.to_string(),
            repository: RepositoryMeta {
                url: None,
                name: "engine".to_string(),
                description: String::new(),
                owner: Identity::new("Ada Lovelace", "ada@example.com"),
            },
            commits: ids.iter().map(|id| commit(id)).collect(),
        }
    }

    fn git() -> FakeGit {
        FakeGit::new()
            .respond(
                &format!("diff-tree --stat --summary --find-copies-harder {}..{}", OLD, NEW),
                " gears.rs | 2 +-\n 1 file changed",
            )
            .respond(
                &format!("show --pretty=format:%s%n%h -s {}", C1),
                "Add gears\n2222222",
            )
            .respond(
                &format!("show --pretty=format:%s%n%h -s {}", C2),
                "Oil gears\n3333333",
            )
            .respond(
                &format!("show {}", C1),
                &format!("commit {}\nAuthor: Ada Lovelace <ada@example.com>\n\n    Add gears", C1),
            )
            .respond(
                &format!("show {}", C2),
                &format!(
                    "commit {}\nAuthor: Charles Babbage <charles@example.com>\n\n    Oil gears",
                    C2
                ),
            )
    }

    #[tokio::test]
    async fn unprotected_branch_mails_each_author() {
        let mailer = RecordingMailer::default();
        let report = notify(
            &git(),
            &mailer,
            &settings(&["list@example.com"]),
            &payload("refs/heads/feature-x", &[C1, C2]),
        )
        .await
        .unwrap();

        assert_eq!(report, MailReport { individual: 2, digest: false });
        let sent = mailer.sent.borrow();
        assert_eq!(sent[0].recipients, vec!["Ada Lovelace <ada@example.com>"]);
        assert_eq!(sent[0].reply_to, "Ada Lovelace <ada@example.com>");
        assert_eq!(sent[0].subject, "[gitolite] engine feature-x 2222222 commit");
        assert_eq!(sent[1].recipients, vec!["Charles Babbage <charles@example.com>"]);
        assert!(sent[1].body.starts_with(&format!(
            "The branch feature-x has been updated\n\nOld: {}\nNew: {}\n\n",
            OLD, NEW
        )));
        assert!(sent[1].body.ends_with("Summary of Changes\n\ngears.rs | 2 +-\n 1 file changed"));
    }

    #[tokio::test]
    async fn protected_branch_sends_one_digest() {
        let mailer = RecordingMailer::default();
        let report = notify(
            &git(),
            &mailer,
            &settings(&["list@example.com", "ops@example.com"]),
            &payload("refs/heads/production", &[C1, C2]),
        )
        .await
        .unwrap();

        assert_eq!(report, MailReport { individual: 0, digest: true });
        let sent = mailer.sent.borrow();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].recipients, vec!["list@example.com", "ops@example.com"]);
        assert!(sent[0].body.starts_with(DIGEST_PREAMBLE));
        assert!(sent[0].body.contains("[gitolite] engine production 2222222 commit"));
        assert!(sent[0].body.contains("[gitolite] engine production 3333333 commit"));
    }

    #[tokio::test]
    async fn digest_uses_its_own_subject_and_reply_to() {
        // Not the last commit's subject and author.
        let mailer = RecordingMailer::default();
        notify(
            &git(),
            &mailer,
            &settings(&["list@example.com"]),
            &payload("refs/heads/testing", &[C1, C2]),
        )
        .await
        .unwrap();

        let sent = mailer.sent.borrow();
        assert_eq!(sent[0].subject, "[gitolite] engine testing digest of 2 commits");
        assert_eq!(sent[0].reply_to, "git@example.com");
    }

    #[tokio::test]
    async fn protected_branch_without_recipients_sends_nothing() {
        let mailer = RecordingMailer::default();
        let report = notify(
            &git(),
            &mailer,
            &settings(&[]),
            &payload("refs/heads/development", &[C1]),
        )
        .await
        .unwrap();
        assert_eq!(report, MailReport::default());
        assert!(mailer.sent.borrow().is_empty());
    }

    #[tokio::test]
    async fn missing_author_line_aborts_mailing() {
        let git = FakeGit::new()
            .respond(
                &format!("diff-tree --stat --summary --find-copies-harder {}..{}", OLD, NEW),
                "",
            )
            .respond(&format!("show {}", C1), "commit without the usual header");
        let mailer = RecordingMailer::default();
        let result = notify(
            &git,
            &mailer,
            &settings(&[]),
            &payload("refs/heads/feature-x", &[C1]),
        )
        .await;
        assert!(matches!(result, Err(NotifyError::MissingAuthor(id)) if id == C1));
        assert!(mailer.sent.borrow().is_empty());
    }

    #[tokio::test]
    async fn no_commits_no_mail_and_no_git() {
        let git = FakeGit::new();
        let mailer = RecordingMailer::default();
        let report = notify(
            &git,
            &mailer,
            &settings(&["list@example.com"]),
            &payload("refs/heads/production", &[]),
        )
        .await
        .unwrap();
        assert_eq!(report, MailReport::default());
        assert!(git.calls.borrow().is_empty());
    }

    #[test]
    fn subject_template_override() {
        let mut settings = settings(&[]);
        settings.subject_template = Some("{branch}: {subject} ({abbrev})".to_string());
        settings.subject_prefix = "[engine] ".to_string();
        let summary = vcs::CommitSummary {
            subject: "Add gears".to_string(),
            abbrev: "2222222".to_string(),
        };
        assert_eq!(
            render_subject(&settings, "engine", "main", C1, &summary),
            "[engine] main: Add gears (2222222)"
        );
    }

    #[test]
    fn protected_set_is_fixed() {
        assert!(is_protected("production"));
        assert!(is_protected("development"));
        assert!(is_protected("testing"));
        assert!(!is_protected("main"));
        assert!(!is_protected("feature-x"));
    }
}
