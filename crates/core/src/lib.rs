pub mod capability;
pub mod config;
pub mod error;
pub mod types;

pub use capability::{CaptchaSolver, Notifier, PageDriver, PipelineRunner, SessionFactory};
pub use config::{Config, SelectorSet};
pub use error::{Error, Result};
pub use types::{Fingerprint, PipelineResult, RunError, RunOutcome, StageType, Target};
