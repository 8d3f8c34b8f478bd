/// Errors produced while building the Telegram gateway.
#[derive(Debug, thiserror::Error)]
pub enum TelegramError {
    #[error("teloxide error: {0}")]
    Teloxide(#[from] teloxide::RequestError),

    #[error("no bot token configured")]
    NoToken,

    #[error("invalid Bot API url {url}: {reason}")]
    InvalidApiUrl { url: String, reason: String },
}
