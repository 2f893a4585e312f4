/// Order Pipeline Backend Application
///
/// This is the main entry point for the order persistence and
/// delivery-confirmation service. The application accepts storefront order
/// payloads, records them durably, suppresses duplicate cash submissions,
/// and notifies operations staff and the customer.
///
/// # Architecture
///
/// The application follows a modular architecture with:
/// - Repository layer with a three-tier storage failover chain
/// - Service layer for order intake orchestration
/// - Notification fan-out across independent channels
/// - In-process event topic for server-push consumers
/// - Thin HTTP layer with metrics for monitoring
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use app_config::AppConfig;
use events::OrderEvents;
use notifier::{
    ChatBotChannel, ChatBotConfig, CompositeNotificationService, EmailChannel, EmailConfig,
    NotificationService,
};
use ports::{SystemClock, UuidIds};
use repository::{ProvideRepository, RepositoryResolver};
use server::Server;
use service::OrderServiceImpl;

/// Initialize the tracing subscriber for logging
fn init_logger() -> Result<()> {
    tracing_subscriber::fmt::init();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    if let Err(err) = init_logger() {
        eprintln!("Failed to initialize logger: {}", err);
        return Err(anyhow::anyhow!("Failed to initialize logger"));
    }

    info!("Order pipeline backend starting...");

    // Load configuration
    let config = AppConfig::load().context("Failed to load configuration")?;

    // Repository resolver: tries the primary store once, falls over to the
    // file/memory chain otherwise. Resolving eagerly here puts the decision
    // in the startup log instead of the first request.
    let resolver = Arc::new(RepositoryResolver::new(config.clone()));
    resolver.repository().await;

    // Notification channels: the customer gets email only, operations get
    // the full fan-out. Unconfigured channels degrade per call.
    let email = Arc::new(EmailChannel::new(EmailConfig {
        host: config.smtp_host.clone(),
        port: config.smtp_port,
        user: config.smtp_user.clone(),
        password: config.smtp_password.clone(),
        from: config.smtp_from.clone(),
    }));
    let chat_bot = Arc::new(ChatBotChannel::new(ChatBotConfig {
        token: config.bot_token.clone(),
        chat_id: config.bot_chat_id.clone(),
        api_base: config.bot_api_base.clone(),
    }));
    let ops_notifier = Arc::new(CompositeNotificationService::new(vec![
        email.clone() as Arc<dyn NotificationService>,
        chat_bot,
    ]));

    let order_events = OrderEvents::new();

    let order_service = Arc::new(OrderServiceImpl::new(
        resolver,
        email,
        ops_notifier,
        order_events.clone(),
        Arc::new(SystemClock),
        Arc::new(UuidIds),
        config.duplicate_window,
        config.ops_email.clone(),
    ));

    let mut tasks = JoinSet::new();

    let http_server = Server::new(config.http_port, order_service, order_events);
    tasks.spawn(async move {
        if let Err(err) = http_server.start().await {
            error!("HTTP server error: {}", err);
            std::process::exit(1);
        }
    });

    // The server task runs until a shutdown signal arrives.
    if let Some(res) = tasks.join_next().await {
        if let Err(err) = res {
            error!("Task error: {}", err);
        }
    }

    // Bounded drain of anything still running.
    let drain = async {
        while let Some(res) = tasks.join_next().await {
            if let Err(err) = res {
                error!("Task error: {}", err);
            }
        }
    };
    if tokio::time::timeout(config.shutdown_timeout, drain)
        .await
        .is_err()
    {
        warn!("Shutdown timeout elapsed, aborting remaining tasks");
        tasks.abort_all();
    }

    info!("Application stopped");
    Ok(())
}
