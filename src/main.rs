use notify_webhook::config::{
    self, ConfigStore, GitConfigStore, HookConfig, LayeredConfigStore, MailConfig, MapConfigStore,
};
use notify_webhook::dispatch::HttpWebhookClient;
use notify_webhook::error::NotifyError;
use notify_webhook::logging::{self, FileLogger};
use notify_webhook::mailer::SmtpMailer;
use notify_webhook::push::PushProcessor;
use notify_webhook::vcs::GitCli;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, error, info};

fn exit_with(e: NotifyError) -> ! {
    eprintln!("Configuration error: {}", e);
    std::process::exit(1);
}

/// Optional TOML overlay named by `NOTIFY_WEBHOOK_CONFIG`
async fn load_overlay() -> Result<Option<MapConfigStore>, NotifyError> {
    match std::env::var(config::CONFIG_PATH_ENV) {
        Ok(path) => Ok(Some(MapConfigStore::load(Path::new(&path)).await?)),
        Err(_) => Ok(None),
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    dotenv::dotenv().ok();

    let work_dir = std::env::current_dir()
        .map_err(NotifyError::from)
        .unwrap_or_else(|e| exit_with(e));
    let git = GitCli::new();

    let overlay = load_overlay().await.unwrap_or_else(|e| exit_with(e));
    let store = LayeredConfigStore::new(overlay, GitConfigStore::new(&git));

    let log_file: Option<PathBuf> = store
        .get(config::LOG_FILE)
        .await
        .unwrap_or_else(|e| exit_with(e))
        .map(PathBuf::from);
    let file_logger = log_file
        .as_deref()
        .map(FileLogger::new)
        .transpose()
        .unwrap_or_else(|e| exit_with(e));
    let _guard = logging::setup_logging(file_logger.as_ref()).unwrap_or_else(|e| exit_with(e));

    let mut config = match HookConfig::resolve(&store, &git, &work_dir).await {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("{}", e);
            exit_with(e);
        }
    };
    let transport = match &config.mail {
        MailConfig::Ready(settings) => Some(SmtpMailer::new(settings)),
        _ => None,
    };
    let mailer = match transport {
        Some(Ok(mailer)) => Some(mailer),
        Some(Err(e)) => {
            error!("Mail notification unavailable: {}", e);
            config.mail = MailConfig::Invalid(e.to_string());
            None
        }
        None => None,
    };
    info!(
        "Notifying for repository '{}' ({} webhook(s), mail {})",
        config.repository.name,
        config.webhook_urls.len(),
        match config.mail {
            MailConfig::Ready(_) => "on",
            MailConfig::Invalid(_) => "unavailable",
            MailConfig::Disabled => "off",
        }
    );
    let client = HttpWebhookClient::new(config.webhook_timeout).unwrap_or_else(|e| exit_with(e));
    let processor = PushProcessor::new(&config, &git, mailer.as_ref(), &client);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                error!("Failed to read push line: {}", e);
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        match processor.process_line(&line, &mut std::io::stdout()).await {
            Ok(report) => {
                info!(
                    "Push {} on {}: {} commit(s), mail {:?}, delivery {:?}",
                    report.id, report.ref_name, report.commit_count, report.mail, report.delivery
                );
                if let Ok(json) = serde_json::to_string(&report) {
                    debug!("{}", json);
                }
            }
            Err(e) => error!("Skipping push line {:?}: {}", line, e),
        }
    }
}
