//! Telegram implementation of [`reposter_core::Delivery`].

pub mod delivery;
pub mod entities;
pub mod error;
pub mod keyboard;

pub use delivery::TelegramDelivery;
pub use error::TelegramError;
