//! Pure admission and health-check decisions, kept free of IO so they can
//! be tested against fixed clocks.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Timelike, Utc};

use slotwatch_core::{Config, Fingerprint};

/// Hour-of-day bounds for admission and health-check sends, both `[min, max)`
/// in UTC. Startup validation already guaranteed the health window sits
/// inside the admission window.
#[derive(Debug, Clone, Copy)]
pub struct Windows {
    pub allowed_min: u32,
    pub allowed_max: u32,
    pub health_min: u32,
    pub health_max: u32,
}

impl Windows {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            allowed_min: cfg.allowed_requests_min_hour,
            allowed_max: cfg.allowed_requests_max_hour,
            health_min: cfg.health_check_min_hour,
            health_max: cfg.health_check_max_hour,
        }
    }

    /// May we touch the site at all right now?
    pub fn admits(&self, now: DateTime<Utc>) -> bool {
        let hour = now.hour();
        hour >= self.allowed_min && hour < self.allowed_max
    }

    pub fn in_health_window(&self, now: DateTime<Utc>) -> bool {
        let hour = now.hour();
        hour >= self.health_min && hour < self.health_max
    }

    /// Minimum spacing between two health-check sends for one target.
    pub fn health_span(&self) -> Duration {
        Duration::hours((self.health_max - self.health_min) as i64)
    }
}

/// Last health-check send per target fingerprint. The map lives in memory
/// only; a restart simply re-sends one health check. Entries are never removed,
/// so the map is bounded by the number of configured targets.
#[derive(Debug, Default)]
pub struct HealthCheckLedger {
    last_sent: HashMap<Fingerprint, DateTime<Utc>>,
}

impl HealthCheckLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decide whether this tick owes a health-check message for the target
    /// and, if so, stamp the ledger immediately, before the pipeline runs,
    /// so a second tick within the same window cannot double-send.
    pub fn claim(&mut self, fp: Fingerprint, now: DateTime<Utc>, windows: &Windows) -> bool {
        if !windows.in_health_window(now) {
            return false;
        }
        if let Some(last) = self.last_sent.get(&fp) {
            if now - *last <= windows.health_span() {
                return false;
            }
        }
        self.last_sent.insert(fp, now);
        true
    }

    pub fn last_sent(&self, fp: Fingerprint) -> Option<DateTime<Utc>> {
        self.last_sent.get(&fp).copied()
    }
}
