use crate::config::TelemetryConfig;
use anyhow::Result;
use tracing::{error, info};

/// Sends operator alerts via Telegram or Discord webhooks.
/// Unconfigured channels are silently skipped.
pub struct AlertManager {
    config: TelemetryConfig,
    http: reqwest::Client,
}

impl AlertManager {
    pub fn new(config: TelemetryConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }

    /// Send an alert message to every configured channel.
    pub async fn send(&self, message: &str) {
        info!("ALERT: {message}");

        if let Err(e) = self.send_telegram(message).await {
            error!("Telegram alert failed: {e}");
        }
        if let Err(e) = self.send_discord(message).await {
            error!("Discord alert failed: {e}");
        }
    }

    async fn send_telegram(&self, message: &str) -> Result<()> {
        let (Some(token), Some(chat_id)) = (
            &self.config.telegram_bot_token,
            &self.config.telegram_chat_id,
        ) else {
            return Ok(()); // Not configured
        };

        let url = format!("https://api.telegram.org/bot{token}/sendMessage");
        let body = serde_json::json!({
            "chat_id": chat_id,
            "text": format!("liqfade: {message}"),
        });

        self.http.post(&url).json(&body).send().await?;
        Ok(())
    }

    async fn send_discord(&self, message: &str) -> Result<()> {
        let Some(webhook_url) = &self.config.discord_webhook_url else {
            return Ok(());
        };

        let body = serde_json::json!({
            "content": format!("**liqfade**: {message}")
        });

        self.http.post(webhook_url).json(&body).send().await?;
        Ok(())
    }

    /// Alert on a closed trade.
    pub async fn on_trade(&self, summary: &str) {
        if self.config.alert_on_trade {
            self.send(&format!("Trade: {summary}")).await;
        }
    }

    /// Alert on a risk pause.
    pub async fn on_pause(&self, reason: &str) {
        if self.config.alert_on_pause {
            self.send(&format!("Risk pause: {reason}")).await;
        }
    }

    /// Alert on an error transition.
    pub async fn on_error(&self, error: &str) {
        if self.config.alert_on_error {
            self.send(&format!("Error: {error}")).await;
        }
    }
}
