use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stable identity of a target, used as the dedup ledger key and in
/// CAPTCHA artifact filenames. Must not change across restarts for
/// identical target fields.
pub type Fingerprint = u32;

/// Which variant of the booking flow the target's page presents
/// after the CAPTCHA gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageType {
    Initial,
    Rescheduled,
}

/// A monitored page, one entry of the `urls:` list in the config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Target {
    pub name: String,
    pub url: String,
    #[serde(rename = "user_id")]
    pub recipient_id: i64,
    #[serde(default)]
    pub enabled: bool,
    #[serde(rename = "type")]
    pub stage_type: StageType,
}

const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

impl Target {
    /// FNV-1a over url + name + recipient id. 32-bit on purpose: the
    /// fingerprint leaks into artifact filenames and log lines.
    pub fn fingerprint(&self) -> Fingerprint {
        let mut hash = FNV_OFFSET_BASIS;
        let bytes = self
            .url
            .bytes()
            .chain(self.name.bytes())
            .chain(self.recipient_id.to_string().into_bytes());
        for b in bytes {
            hash ^= b as u32;
            hash = hash.wrapping_mul(FNV_PRIME);
        }
        hash
    }
}

/// Terminal verdict of one pipeline run. `Undefined` only exists while a
/// run is in progress and never escapes a finished run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineResult {
    Undefined,
    SlotAvailable,
    SlotNotAvailable,
    MaybeAlreadySigned,
    NoRescheduleTasks,
}

impl std::fmt::Display for PipelineResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Undefined => "UNDEFINED",
            Self::SlotAvailable => "SLOT_AVAILABLE",
            Self::SlotNotAvailable => "SLOT_UNAVAILABLE",
            Self::MaybeAlreadySigned => "MAYBE_ALREADY_SIGNED",
            Self::NoRescheduleTasks => "NO_RESCHEDULE_TASKS",
        };
        f.write_str(s)
    }
}

/// Recoverable failure of a single pipeline run. The scheduler logs these
/// and moves on to the next target; none of them terminate the process.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RunError {
    #[error("driver: {0}")]
    Driver(String),

    #[error("solver: {0}")]
    Solver(String),

    #[error("run exceeded its time budget")]
    Timeout,

    #[error("captcha not solved after {attempts} attempts")]
    CaptchaUnresolvable { attempts: u32 },
}

impl From<crate::Error> for RunError {
    fn from(e: crate::Error) -> Self {
        match e {
            crate::Error::Solver(s) => RunError::Solver(s),
            other => RunError::Driver(other.to_string()),
        }
    }
}

/// What one pipeline run hands back to the scheduler.
pub type RunOutcome = std::result::Result<PipelineResult, RunError>;
