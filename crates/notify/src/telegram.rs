//! Telegram Bot API `sendMessage` client.
//!
//! One POST per recipient; anything but HTTP success is a send failure
//! surfaced to the caller. No retries here; the scheduler logs and the
//! next tick tries again.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::debug;

use slotwatch_core::{Error, Notifier, Result};

const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

#[derive(Serialize)]
struct SendMessageRequest<'a> {
    chat_id: i64,
    text: &'a str,
}

pub struct TelegramNotifier {
    client: Client,
    token: String,
}

impl TelegramNotifier {
    pub fn new(token: String) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { client, token }
    }

    fn api_url(&self) -> String {
        format!("{}/bot{}/sendMessage", TELEGRAM_API_BASE, self.token)
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, chat_id: i64, text: &str) -> Result<()> {
        let request = SendMessageRequest { chat_id, text };

        let response = self
            .client
            .post(self.api_url())
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Notify(format!("sendMessage request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Notify(format!(
                "sendMessage returned {}: {}",
                status, body
            )));
        }

        debug!(chat_id, "Notification delivered");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_url_embeds_the_token() {
        let n = TelegramNotifier::new("123:abc".into());
        assert_eq!(
            n.api_url(),
            "https://api.telegram.org/bot123:abc/sendMessage"
        );
    }

    #[test]
    fn request_body_matches_the_bot_api_shape() {
        let body = serde_json::to_value(SendMessageRequest {
            chat_id: 42,
            text: "hi",
        })
        .unwrap();
        assert_eq!(body, serde_json::json!({"chat_id": 42, "text": "hi"}));
    }
}
