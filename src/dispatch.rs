//! Webhook delivery

use std::io::Write;
use std::time::Duration;
use tracing::{error, info};

use crate::error::{NotifyError, Result};

/// Form field carrying the JSON payload.
pub const PAYLOAD_FIELD: &str = "payload";

/// Sends a serialized payload to one endpoint.
#[allow(async_fn_in_trait)]
pub trait WebhookClient {
    async fn post(&self, url: &str, payload: &str) -> Result<()>;
}

/// Form-encoded POST over HTTP(S).
pub struct HttpWebhookClient {
    client: reqwest::Client,
}

impl HttpWebhookClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("notify_webhook/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

impl WebhookClient for HttpWebhookClient {
    async fn post(&self, url: &str, payload: &str) -> Result<()> {
        self.client
            .post(url)
            .form(&[(PAYLOAD_FIELD, payload)])
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| NotifyError::WebhookFailed {
                url: url.to_string(),
                message: e.to_string(),
            })?;
        Ok(())
    }
}

/// What happened to one push's payload.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub printed: bool,
    pub delivered: Vec<String>,
    pub failed: Vec<(String, String)>,
}

impl DispatchReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// POST the payload to every URL in order, or print it when there are none.
///
/// Each endpoint is tried independently; a failure is logged and recorded
/// without stopping delivery to the rest.
pub async fn dispatch<C: WebhookClient, W: Write>(
    client: &C,
    urls: &[String],
    payload: &str,
    out: &mut W,
) -> Result<DispatchReport> {
    let mut report = DispatchReport::default();

    if urls.is_empty() {
        writeln!(out, "{}", payload)?;
        out.flush()?;
        report.printed = true;
        return Ok(report);
    }

    for url in urls {
        match client.post(url, payload).await {
            Ok(()) => {
                info!("Delivered payload to {}", url);
                report.delivered.push(url.clone());
            }
            Err(e) => {
                error!("{}", e);
                report.failed.push((url.clone(), e.to_string()));
            }
        }
    }

    Ok(report)
}
