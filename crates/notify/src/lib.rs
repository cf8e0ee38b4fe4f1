//! Outbound Telegram notifications and the result-keyed message texts.

pub mod messages;
pub mod telegram;

pub use telegram::TelegramNotifier;
