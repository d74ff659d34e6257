//! Telegram Bot API collaborator: long-poll updates, message sending, and
//! MarkdownV2 escaping.

use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

/// Extra headroom on top of the server-side long-poll timeout so the HTTP
/// request does not give up before the server does.
const LONG_POLL_HTTP_SLACK: Duration = Duration::from_secs(10);
const SEND_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// One entry of the `getUpdates` result array.
#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub chat: Chat,
    #[serde(default)]
    pub from: Option<User>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub reply_to_message: Option<Box<Message>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
}

impl User {
    /// Display identity used in attribution lines: username when set,
    /// otherwise the first name.
    pub fn display_name(&self) -> &str {
        self.username
            .as_deref()
            .filter(|value| !value.is_empty())
            .or(self.first_name.as_deref())
            .unwrap_or("unknown")
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BotProfile {
    pub username: String,
}

/// Text formatting for an outgoing message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseMode {
    Plain,
    MarkdownV2,
}

/// One `sendMessage` call.
#[derive(Debug, Clone)]
pub struct OutgoingMessage {
    pub chat_id: i64,
    pub text: String,
    pub parse_mode: ParseMode,
    pub reply_to_message_id: Option<i64>,
}

impl OutgoingMessage {
    pub fn markdown(chat_id: i64, text: String) -> Self {
        Self {
            chat_id,
            text,
            parse_mode: ParseMode::MarkdownV2,
            reply_to_message_id: None,
        }
    }

    pub fn plain(chat_id: i64, text: String) -> Self {
        Self {
            chat_id,
            text,
            parse_mode: ParseMode::Plain,
            reply_to_message_id: None,
        }
    }

    pub fn in_reply_to(mut self, message_id: i64) -> Self {
        self.reply_to_message_id = Some(message_id);
        self
    }
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
    result: Option<T>,
}

/// Client for the handful of Bot API methods the bridge uses.
#[derive(Clone)]
pub struct TelegramClient {
    http: reqwest::Client,
    api_base: String,
    token: String,
}

impl TelegramClient {
    pub fn new(api_base: &str, token: &str) -> Result<Self> {
        let api_base = api_base.trim().trim_end_matches('/');
        if api_base.is_empty() {
            bail!("telegram api base cannot be empty");
        }
        let token = token.trim();
        if token.is_empty() {
            bail!("telegram bot token cannot be empty");
        }

        let http = reqwest::Client::builder()
            .build()
            .context("failed to create telegram api client")?;
        Ok(Self {
            http,
            api_base: api_base.to_string(),
            token: token.to_string(),
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{method}", self.api_base, self.token)
    }

    async fn decode_response<T: DeserializeOwned>(
        method: &str,
        response: reqwest::Response,
    ) -> Result<T> {
        let status = response.status();
        let payload: ApiResponse<T> = response
            .json()
            .await
            .with_context(|| format!("failed to decode telegram {method} response"))?;
        if !payload.ok {
            bail!(
                "telegram {method} failed: status {status}, {}",
                payload.description.unwrap_or_else(|| "no description".to_string())
            );
        }
        payload
            .result
            .ok_or_else(|| anyhow!("telegram {method} response missing result"))
    }

    /// Identifies the bot account behind the token. Used at startup both to
    /// validate credentials and to learn the bot username.
    pub async fn get_me(&self) -> Result<BotProfile> {
        let response = self
            .http
            .get(self.method_url("getMe"))
            .timeout(SEND_REQUEST_TIMEOUT)
            .send()
            .await
            .context("telegram getMe request failed")?;
        Self::decode_response("getMe", response).await
    }

    /// Long-polls for updates with `update_id >= offset`. The server holds
    /// the request open up to `timeout_secs` before answering empty.
    pub async fn get_updates(&self, offset: i64, timeout_secs: u64) -> Result<Vec<Update>> {
        let response = self
            .http
            .get(self.method_url("getUpdates"))
            .query(&[
                ("offset", offset.to_string()),
                ("timeout", timeout_secs.to_string()),
            ])
            .timeout(Duration::from_secs(timeout_secs) + LONG_POLL_HTTP_SLACK)
            .send()
            .await
            .context("telegram getUpdates request failed")?;
        Self::decode_response("getUpdates", response).await
    }

    /// Posts a message and returns it as echoed by the API (the caller
    /// needs the assigned `message_id` for correlation).
    pub async fn send_message(&self, message: &OutgoingMessage) -> Result<Message> {
        let mut body = json!({
            "chat_id": message.chat_id,
            "text": message.text,
            "disable_web_page_preview": true
        });
        if message.parse_mode == ParseMode::MarkdownV2 {
            body["parse_mode"] = Value::from("MarkdownV2");
        }
        if let Some(reply_to) = message.reply_to_message_id {
            body["reply_to_message_id"] = Value::from(reply_to);
        }

        let response = self
            .http
            .post(self.method_url("sendMessage"))
            .json(&body)
            .timeout(SEND_REQUEST_TIMEOUT)
            .send()
            .await
            .context("telegram sendMessage request failed")?;
        Self::decode_response("sendMessage", response).await
    }
}

/// Escapes the character set Telegram requires escaped in MarkdownV2 text.
pub fn escape_markdown_v2(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        if matches!(
            ch,
            '_' | '*'
                | '['
                | ']'
                | '('
                | ')'
                | '~'
                | '`'
                | '>'
                | '#'
                | '+'
                | '-'
                | '='
                | '|'
                | '{'
                | '}'
                | '.'
                | '!'
        ) {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}
