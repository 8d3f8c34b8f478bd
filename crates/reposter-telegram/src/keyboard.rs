use reposter_core::InlineButton;
use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup};
use tracing::warn;

/// Build the inline keyboard for a template.
///
/// Buttons whose URL does not parse are left out, as are rows that end up
/// empty. Returns `None` when nothing is left.
pub fn build(rows: &[Vec<InlineButton>]) -> Option<InlineKeyboardMarkup> {
    let rows: Vec<Vec<InlineKeyboardButton>> = rows
        .iter()
        .map(|row| {
            row.iter()
                .filter_map(|b| match b.url.parse::<reqwest::Url>() {
                    Ok(url) => Some(InlineKeyboardButton::url(b.text.clone(), url)),
                    Err(e) => {
                        warn!(text = %b.text, url = %b.url, error = %e, "Telegram: skipping button with invalid url");
                        None
                    }
                })
                .collect::<Vec<_>>()
        })
        .filter(|row| !row.is_empty())
        .collect();

    if rows.is_empty() {
        None
    } else {
        Some(InlineKeyboardMarkup::new(rows))
    }
}
