//! Log-channel notifier
//!
//! Forwards operational messages ("LOG: ...") to a designated chat so the
//! organizers can watch the game without tailing server logs. Falls back to
//! tracing when no log channel is configured.

use reqwest::Client;
use serde::Serialize;
use tracing::{info, warn};

#[derive(Debug, Serialize)]
struct SendMessageRequest {
    chat_id: String,
    text: String,
}

/// Sends messages to the configured Telegram log channel.
#[derive(Clone)]
pub struct Notifier {
    http: Client,
    bot_token: String,
    log_chat_id: Option<String>,
}

impl Notifier {
    pub fn new(bot_token: String, log_chat_id: String) -> Self {
        Self {
            http: Client::new(),
            bot_token,
            log_chat_id: Some(log_chat_id),
        }
    }

    /// A notifier with no log channel; messages go to tracing only.
    pub fn disabled(bot_token: String) -> Self {
        Self {
            http: Client::new(),
            bot_token,
            log_chat_id: None,
        }
    }

    /// Forward a line to the log channel. Delivery failures are logged and
    /// swallowed; the command that produced the line already succeeded.
    pub async fn log(&self, msg: &str) {
        info!("{msg}");
        let Some(chat_id) = &self.log_chat_id else {
            return;
        };

        let url = format!("https://api.telegram.org/bot{}/sendMessage", self.bot_token);
        let request = SendMessageRequest {
            chat_id: chat_id.clone(),
            text: format!("LOG: {msg}"),
        };
        if let Err(e) = self.http.post(&url).json(&request).send().await {
            warn!("Failed to forward to log channel: {e}");
        }
    }
}
