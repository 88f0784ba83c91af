use anyhow::{Context, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::commands::{render, Command, QueueHandle};

pub const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

/// Delay before polling again after a transport error
const ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// Reply keyboard shown under every bot message
const KEYBOARD: [&[&str]; 3] = [
    &["/start", "/stats", "/stop"],
    &["/balance", "/positions", "/status"],
    &["/runbot", "/stopbot"],
];

/// Minimal Telegram Bot API client: long-polled updates and text replies
#[derive(Clone)]
pub struct TelegramClient {
    client: Client,
    base_url: String,
    poll_timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub chat: Chat,
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Serialize)]
struct GetUpdates<'a> {
    offset: i64,
    timeout: u64,
    allowed_updates: &'a [&'a str],
}

#[derive(Debug, Serialize)]
struct SendMessage<'a> {
    chat_id: i64,
    text: &'a str,
    reply_markup: ReplyKeyboard,
}

#[derive(Debug, Serialize)]
struct ReplyKeyboard {
    keyboard: Vec<Vec<KeyboardButton>>,
    resize_keyboard: bool,
}

#[derive(Debug, Serialize)]
struct KeyboardButton {
    text: String,
}

impl ReplyKeyboard {
    fn commands() -> Self {
        Self {
            keyboard: KEYBOARD
                .iter()
                .map(|row| {
                    row.iter()
                        .map(|text| KeyboardButton {
                            text: text.to_string(),
                        })
                        .collect()
                })
                .collect(),
            resize_keyboard: true,
        }
    }
}

impl TelegramClient {
    pub fn new(token: &str, poll_timeout: Duration) -> Result<Self> {
        Self::with_base_url(TELEGRAM_API_BASE, token, poll_timeout)
    }

    pub fn with_base_url(base_url: &str, token: &str, poll_timeout: Duration) -> Result<Self> {
        // The HTTP deadline has to outlive the server-side long poll
        let client = Client::builder()
            .timeout(poll_timeout + Duration::from_secs(10))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: format!("{}/bot{}", base_url.trim_end_matches('/'), token),
            poll_timeout,
        })
    }

    /// Long-poll for updates with `update_id >= offset`
    pub async fn get_updates(&self, offset: i64) -> Result<Vec<Update>> {
        let body = GetUpdates {
            offset,
            timeout: self.poll_timeout.as_secs(),
            allowed_updates: &["message"],
        };
        self.call("getUpdates", &body).await
    }

    /// Send a text message with the command keyboard attached
    pub async fn send_message(&self, chat_id: i64, text: &str) -> Result<()> {
        let body = SendMessage {
            chat_id,
            text,
            reply_markup: ReplyKeyboard::commands(),
        };
        let _: serde_json::Value = self.call("sendMessage", &body).await?;
        Ok(())
    }

    async fn call<B: Serialize, T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        body: &B,
    ) -> Result<T> {
        let response = self
            .client
            .post(format!("{}/{}", self.base_url, method))
            .json(body)
            .send()
            .await
            .with_context(|| format!("Telegram {} request failed", method))?;

        let status = response.status();
        let payload: ApiResponse<T> = response
            .json()
            .await
            .with_context(|| format!("Failed to parse Telegram {} response", method))?;

        if !payload.ok {
            anyhow::bail!(
                "Telegram {} error ({}): {}",
                method,
                status,
                payload.description.unwrap_or_default()
            );
        }
        payload
            .result
            .with_context(|| format!("Telegram {} returned no result", method))
    }
}

/// Serve chat commands until the task is dropped
///
/// Messages from chats outside `allowed_chat_ids` are ignored when the list is
/// non-empty. Text that is not a known command is ignored as well.
pub async fn run_bot(client: TelegramClient, queue: QueueHandle, allowed_chat_ids: Vec<i64>) {
    tracing::info!("🤖 Telegram bot polling for commands");
    if allowed_chat_ids.is_empty() {
        tracing::warn!("No allowed chat ids configured, every chat can control the bot");
    }

    let mut offset = 0;
    loop {
        let updates = match client.get_updates(offset).await {
            Ok(updates) => updates,
            Err(e) => {
                tracing::warn!("Telegram polling failed: {:#}, retrying in {:?}", e, ERROR_BACKOFF);
                tokio::time::sleep(ERROR_BACKOFF).await;
                continue;
            }
        };

        for update in updates {
            offset = offset.max(update.update_id + 1);
            if let Some((chat_id, command)) = accept(&update, &allowed_chat_ids) {
                tracing::info!(chat_id, "💬 Command {:?}", command);

                let reply = render(&queue.submit(command).await);
                if let Err(e) = client.send_message(chat_id, &reply).await {
                    tracing::warn!("Failed to reply to chat {}: {:#}", chat_id, e);
                }
            }
        }
    }
}

/// Chat and command of an update the bot should answer
fn accept(update: &Update, allowed_chat_ids: &[i64]) -> Option<(i64, Command)> {
    let message = update.message.as_ref()?;
    let chat_id = message.chat.id;

    if !allowed_chat_ids.is_empty() && !allowed_chat_ids.contains(&chat_id) {
        tracing::warn!("Ignoring message from unauthorized chat {}", chat_id);
        return None;
    }

    Command::parse(message.text.as_deref()?).map(|command| (chat_id, command))
}
