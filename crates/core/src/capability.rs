//! Narrow interfaces for the external capabilities the core drives:
//! the browser automation session, the CAPTCHA decoder, and the
//! outbound messaging call. Production code backs them with Chrome,
//! an OCR subprocess, and the Telegram API; tests substitute fakes.

use std::path::Path;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{RunOutcome, Target};

/// One scoped automation session on a rendered page.
///
/// Selector arguments are CSS selectors taken verbatim from the
/// configured [`crate::SelectorSet`].
#[async_trait]
pub trait PageDriver: Send {
    async fn navigate(&mut self, url: &str) -> Result<()>;

    /// Block until the element is present and visible, or fail after the
    /// driver's wait deadline.
    async fn wait_visible(&mut self, selector: &str) -> Result<()>;

    /// Presence probe: does the element exist right now? Absence is a
    /// normal answer, not an error.
    async fn exists(&mut self, selector: &str) -> Result<bool>;

    /// Screenshot of the element, PNG bytes.
    async fn capture(&mut self, selector: &str) -> Result<Vec<u8>>;

    async fn send_keys(&mut self, selector: &str, text: &str) -> Result<()>;

    async fn click(&mut self, selector: &str) -> Result<()>;

    /// Full rendered document markup.
    async fn document_html(&mut self) -> Result<String>;
}

/// Hands out a fresh [`PageDriver`] session per pipeline run. The backing
/// engine (the browser process) outlives every session; the session itself
/// must release its resources when dropped, since a timed-out run drops it
/// mid-flight.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    type Session: PageDriver;

    async fn open_session(&self) -> Result<Self::Session>;
}

/// Decodes a CAPTCHA image artifact into text.
#[async_trait]
pub trait CaptchaSolver: Send + Sync {
    async fn decode(&self, image: &Path) -> Result<String>;
}

/// Outbound message send. Each call is independent; failures are surfaced
/// to the caller for logging and never retried here.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, chat_id: i64, text: &str) -> Result<()>;
}

/// One full pipeline run for one target. Implemented by the engine;
/// faked in scheduler tests.
#[async_trait]
pub trait PipelineRunner: Send + Sync {
    async fn run(&self, target: &Target) -> RunOutcome;
}
