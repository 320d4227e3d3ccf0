use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::dispatch::DispatchReport;
use crate::error::Result;
use crate::mailer::MailReport;

/// Outcome of one notification channel for a push
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ChannelStatus {
    Skipped,
    Success,
    Failed,
}

/// Record of one processed push line, logged when the line completes
#[derive(Debug, Clone, Serialize)]
pub struct PushReport {
    pub id: String,
    pub ref_name: String,
    pub before: String,
    pub after: String,
    pub commit_count: usize,
    pub mail: ChannelStatus,
    pub mails_sent: usize,
    pub mail_error: Option<String>,
    pub delivery: ChannelStatus,
    pub printed: bool,
    pub delivered_endpoints: Vec<String>,
    pub failed_endpoints: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl PushReport {
    pub fn new(ref_name: String, before: String, after: String) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            ref_name,
            before,
            after,
            commit_count: 0,
            mail: ChannelStatus::Skipped,
            mails_sent: 0,
            mail_error: None,
            delivery: ChannelStatus::Skipped,
            printed: false,
            delivered_endpoints: Vec::new(),
            failed_endpoints: Vec::new(),
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn record_mail(&mut self, outcome: &Result<MailReport>) {
        match outcome {
            Ok(report) => {
                self.mail = ChannelStatus::Success;
                self.mails_sent = report.individual + usize::from(report.digest);
            }
            Err(e) => self.record_mail_failure(&e.to_string()),
        }
    }

    pub fn record_mail_failure(&mut self, reason: &str) {
        self.mail = ChannelStatus::Failed;
        self.mail_error = Some(reason.to_string());
    }

    pub fn record_delivery(&mut self, report: &DispatchReport) {
        self.printed = report.printed;
        self.delivered_endpoints = report.delivered.clone();
        self.failed_endpoints = report.failed.iter().map(|(url, _)| url.clone()).collect();
        self.delivery = if report.is_success() {
            ChannelStatus::Success
        } else {
            ChannelStatus::Failed
        };
    }

    pub fn complete(&mut self) {
        self.completed_at = Some(Utc::now());
    }
}
