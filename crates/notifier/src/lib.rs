//! # Notification fan-out
//!
//! [`NotificationService`] is the channel seam; [`EmailChannel`] and
//! [`ChatBotChannel`] adapt SMTP and a bot messaging API behind it, and
//! [`CompositeNotificationService`] fans one notification out to every
//! configured channel, isolating per-channel failure. A channel whose
//! credentials are absent fails with a distinguishable missing-configuration
//! condition instead of a generic error, so an unconfigured deployment
//! degrades instead of crashing.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::warn;

const OUTBOUND_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors raised by notification channels.
#[derive(Debug, Error)]
pub enum NotifyError {
    /// The channel is not configured; it cannot deliver anything.
    #[error("{channel} channel is not configured ({missing})")]
    MissingConfig {
        channel: &'static str,
        missing: &'static str,
    },
    /// A configured channel failed to deliver.
    #[error("{channel} channel delivery failed: {reason}")]
    Channel {
        channel: &'static str,
        reason: String,
    },
    /// Every channel of a composite failed; carries the individual causes.
    #[error("all notification channels failed")]
    AllChannelsFailed { causes: Vec<NotifyError> },
}

fn channel_err(channel: &'static str, reason: impl ToString) -> NotifyError {
    NotifyError::Channel {
        channel,
        reason: reason.to_string(),
    }
}

/// Additional delivery context beyond the message body.
#[derive(Debug, Clone, Default)]
pub struct NotifyContext {
    pub subject: String,
}

/// A single outbound notification channel.
#[async_trait]
pub trait NotificationService: Send + Sync {
    async fn notify(
        &self,
        recipient: &str,
        message: &str,
        ctx: &NotifyContext,
    ) -> Result<(), NotifyError>;
}

// ---------------------------------------------------------------------------
// Email channel
// ---------------------------------------------------------------------------

/// SMTP relay settings. Empty `host` or `from` disables the channel.
#[derive(Debug, Clone, Default)]
pub struct EmailConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub from: String,
}

/// Email adapter over an async SMTP transport.
///
/// The transport is built on first use and cached for the life of the
/// process.
pub struct EmailChannel {
    cfg: EmailConfig,
    transport: OnceCell<AsyncSmtpTransport<Tokio1Executor>>,
}

impl EmailChannel {
    pub fn new(cfg: EmailConfig) -> Self {
        Self {
            cfg,
            transport: OnceCell::new(),
        }
    }

    fn build_transport(&self) -> Result<AsyncSmtpTransport<Tokio1Executor>, NotifyError> {
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::relay(&self.cfg.host)
            .map_err(|e| channel_err("email", e))?
            .port(self.cfg.port)
            .timeout(Some(OUTBOUND_TIMEOUT));
        if !self.cfg.user.is_empty() {
            builder = builder.credentials(Credentials::new(
                self.cfg.user.clone(),
                self.cfg.password.clone(),
            ));
        }
        Ok(builder.build())
    }
}

#[async_trait]
impl NotificationService for EmailChannel {
    async fn notify(
        &self,
        recipient: &str,
        message: &str,
        ctx: &NotifyContext,
    ) -> Result<(), NotifyError> {
        if self.cfg.host.is_empty() {
            return Err(NotifyError::MissingConfig {
                channel: "email",
                missing: "smtp host",
            });
        }
        if self.cfg.from.is_empty() {
            return Err(NotifyError::MissingConfig {
                channel: "email",
                missing: "sender address",
            });
        }
        if recipient.is_empty() {
            return Err(NotifyError::MissingConfig {
                channel: "email",
                missing: "recipient",
            });
        }

        let transport = self
            .transport
            .get_or_try_init(|| async { self.build_transport() })
            .await?;

        let email = Message::builder()
            .from(self.cfg.from.parse().map_err(|e| channel_err("email", e))?)
            .to(recipient.parse().map_err(|e| channel_err("email", e))?)
            .subject(ctx.subject.as_str())
            .header(ContentType::TEXT_PLAIN)
            .body(message.to_string())
            .map_err(|e| channel_err("email", e))?;

        transport
            .send(email)
            .await
            .map_err(|e| channel_err("email", e))?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Chat-bot channel
// ---------------------------------------------------------------------------

/// Bot messaging API settings. Empty `token` or `chat_id` disables the
/// channel.
#[derive(Debug, Clone, Default)]
pub struct ChatBotConfig {
    pub token: String,
    pub chat_id: String,
    pub api_base: String,
}

/// Chat-bot adapter posting to the bot HTTP API.
///
/// The target chat is fixed by configuration; the `recipient` argument is
/// an email address and is ignored here.
pub struct ChatBotChannel {
    cfg: ChatBotConfig,
    http: reqwest::Client,
}

impl ChatBotChannel {
    pub fn new(cfg: ChatBotConfig) -> Self {
        Self {
            cfg,
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl NotificationService for ChatBotChannel {
    async fn notify(
        &self,
        _recipient: &str,
        message: &str,
        ctx: &NotifyContext,
    ) -> Result<(), NotifyError> {
        if self.cfg.token.is_empty() {
            return Err(NotifyError::MissingConfig {
                channel: "chat-bot",
                missing: "bot token",
            });
        }
        if self.cfg.chat_id.is_empty() {
            return Err(NotifyError::MissingConfig {
                channel: "chat-bot",
                missing: "chat id",
            });
        }

        let url = format!(
            "{}/bot{}/sendMessage",
            self.cfg.api_base.trim_end_matches('/'),
            self.cfg.token
        );
        let text = if ctx.subject.is_empty() {
            message.to_string()
        } else {
            format!("{}\n{}", ctx.subject, message)
        };

        let response = self
            .http
            .post(&url)
            .timeout(OUTBOUND_TIMEOUT)
            .json(&serde_json::json!({
                "chat_id": self.cfg.chat_id,
                "text": text,
            }))
            .send()
            .await
            .map_err(|e| channel_err("chat-bot", e))?;

        if !response.status().is_success() {
            return Err(channel_err(
                "chat-bot",
                format!("bot API returned {}", response.status()),
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Composite fan-out
// ---------------------------------------------------------------------------

/// Fans one notification out to an ordered list of channels.
///
/// Individual failures are captured and logged; the call only errors when
/// every channel fails, in which case the aggregate carries each cause.
pub struct CompositeNotificationService {
    channels: Vec<Arc<dyn NotificationService>>,
}

impl CompositeNotificationService {
    pub fn new(channels: Vec<Arc<dyn NotificationService>>) -> Self {
        Self { channels }
    }
}

#[async_trait]
impl NotificationService for CompositeNotificationService {
    async fn notify(
        &self,
        recipient: &str,
        message: &str,
        ctx: &NotifyContext,
    ) -> Result<(), NotifyError> {
        let mut failures = Vec::new();
        for channel in &self.channels {
            if let Err(err) = channel.notify(recipient, message, ctx).await {
                warn!(error = %err, "notification channel failed");
                failures.push(err);
            }
        }
        if !self.channels.is_empty() && failures.len() == self.channels.len() {
            return Err(NotifyError::AllChannelsFailed { causes: failures });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AlwaysOk;
    struct AlwaysFails;

    #[async_trait]
    impl NotificationService for AlwaysOk {
        async fn notify(&self, _: &str, _: &str, _: &NotifyContext) -> Result<(), NotifyError> {
            Ok(())
        }
    }

    #[async_trait]
    impl NotificationService for AlwaysFails {
        async fn notify(&self, _: &str, _: &str, _: &NotifyContext) -> Result<(), NotifyError> {
            Err(channel_err("test", "boom"))
        }
    }

    fn ctx() -> NotifyContext {
        NotifyContext {
            subject: "subject".to_string(),
        }
    }

    #[tokio::test]
    async fn test_composite_tolerates_partial_failure() {
        let composite = CompositeNotificationService::new(vec![
            Arc::new(AlwaysFails),
            Arc::new(AlwaysOk),
        ]);
        assert!(composite.notify("x@y.z", "hi", &ctx()).await.is_ok());
    }

    #[tokio::test]
    async fn test_composite_aggregates_total_failure() {
        let composite = CompositeNotificationService::new(vec![
            Arc::new(AlwaysFails),
            Arc::new(AlwaysFails),
        ]);
        let err = composite.notify("x@y.z", "hi", &ctx()).await.unwrap_err();
        match err {
            NotifyError::AllChannelsFailed { causes } => assert_eq!(causes.len(), 2),
            other => panic!("expected aggregate error, got {other}"),
        }
    }

    #[tokio::test]
    async fn test_composite_with_no_channels_is_a_noop() {
        let composite = CompositeNotificationService::new(Vec::new());
        assert!(composite.notify("x@y.z", "hi", &ctx()).await.is_ok());
    }

    #[tokio::test]
    async fn test_email_channel_reports_missing_config() {
        let channel = EmailChannel::new(EmailConfig::default());
        let err = channel.notify("x@y.z", "hi", &ctx()).await.unwrap_err();
        assert!(matches!(
            err,
            NotifyError::MissingConfig { channel: "email", missing: "smtp host" }
        ));

        let channel = EmailChannel::new(EmailConfig {
            host: "smtp.example.com".to_string(),
            ..Default::default()
        });
        let err = channel.notify("x@y.z", "hi", &ctx()).await.unwrap_err();
        assert!(matches!(
            err,
            NotifyError::MissingConfig { missing: "sender address", .. }
        ));
    }

    #[tokio::test]
    async fn test_chat_bot_channel_reports_missing_config() {
        let channel = ChatBotChannel::new(ChatBotConfig::default());
        let err = channel.notify("", "hi", &ctx()).await.unwrap_err();
        assert!(matches!(
            err,
            NotifyError::MissingConfig { channel: "chat-bot", missing: "bot token" }
        ));
    }
}
