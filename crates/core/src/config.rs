use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::Target;

/// Named CSS selectors for the elements the pipeline interacts with.
/// Loaded once from the `html:` section of the config, immutable after.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectorSet {
    #[serde(rename = "captcha_id")]
    pub captcha_image: String,
    #[serde(rename = "captcha_txt_input_id")]
    pub captcha_input: String,
    #[serde(rename = "captcha_err_id")]
    pub captcha_error: String,
    #[serde(rename = "captcha_button_id")]
    pub captcha_submit: String,
    #[serde(rename = "second_stage_button_id")]
    pub stage_two_button: String,
    #[serde(rename = "second_stage_bis_check_id")]
    pub stage_two_bis_check: String,
    #[serde(rename = "second_stage_bis_button_id")]
    pub stage_two_bis_confirm: String,
}

/// The whole configuration document. Parsed once at startup; any parse or
/// validation failure is fatal, the process does not start.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Telegram bot token.
    #[serde(default)]
    pub api_key: String,
    /// Admin chat id, second recipient of every notification.
    #[serde(default)]
    pub operator_id: i64,
    /// Kept for compatibility with older configs; nothing listens on it.
    #[serde(default)]
    pub port: u16,

    #[serde(rename = "minute_interval", default = "default_interval_minutes")]
    pub interval_minutes: u64,
    /// Width of the uniform jitter draw added to the tick interval.
    #[serde(default = "default_jitter_minutes")]
    pub jitter_minutes: u64,

    pub allowed_requests_min_hour: u32,
    pub allowed_requests_max_hour: u32,
    pub health_check_min_hour: u32,
    pub health_check_max_hour: u32,

    #[serde(default = "default_captcha_min_len")]
    pub captcha_min_len: usize,
    /// Ceiling on CAPTCHA submit attempts per run. `null` keeps the loop
    /// unbounded within the run's time budget.
    #[serde(default)]
    pub max_captcha_attempts: Option<u32>,
    /// Regex matched against the rendered document to detect the
    /// "no slot could be found" page copy.
    #[serde(default = "default_unavailable_marker")]
    pub unavailable_marker: String,
    /// Directory CAPTCHA image artifacts are written to.
    #[serde(default = "default_artifact_dir")]
    pub artifact_dir: PathBuf,
    /// OCR command; the artifact path is appended as the last argument.
    #[serde(default = "default_solver_command")]
    pub solver_command: Vec<String>,

    pub html: SelectorSet,
    #[serde(rename = "urls", default)]
    pub targets: Vec<Target>,
}

fn default_interval_minutes() -> u64 {
    30
}

fn default_jitter_minutes() -> u64 {
    10
}

fn default_captcha_min_len() -> usize {
    6
}

fn default_unavailable_marker() -> String {
    "Извините".to_string()
}

fn default_artifact_dir() -> PathBuf {
    PathBuf::from("imgs")
}

fn default_solver_command() -> Vec<String> {
    vec!["python".to_string(), "ocr.py".to_string()]
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        for (name, hour) in [
            ("allowed_requests_min_hour", self.allowed_requests_min_hour),
            ("allowed_requests_max_hour", self.allowed_requests_max_hour),
            ("health_check_min_hour", self.health_check_min_hour),
            ("health_check_max_hour", self.health_check_max_hour),
        ] {
            if hour > 24 {
                return Err(Error::Config(format!("{} out of range: {}", name, hour)));
            }
        }

        if self.allowed_requests_min_hour >= self.allowed_requests_max_hour {
            return Err(Error::Config(
                "allowed request hour window is empty".to_string(),
            ));
        }
        if self.health_check_min_hour >= self.health_check_max_hour {
            return Err(Error::Config("health check hour window is empty".to_string()));
        }
        if self.allowed_requests_min_hour > self.health_check_min_hour
            || self.allowed_requests_max_hour < self.health_check_max_hour
        {
            return Err(Error::Config(
                "health check window must sit inside the allowed request window".to_string(),
            ));
        }

        if self.interval_minutes < 1 {
            return Err(Error::Config("minute_interval must be at least 1".to_string()));
        }
        if self.jitter_minutes < 1 {
            return Err(Error::Config("jitter_minutes must be at least 1".to_string()));
        }
        if self.solver_command.is_empty() {
            return Err(Error::Config("solver_command must not be empty".to_string()));
        }
        if self.captcha_min_len == 0 {
            return Err(Error::Config("captcha_min_len must be at least 1".to_string()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r##"
api_key: "token"
operator_id: 42
port: 8080
minute_interval: 30
allowed_requests_min_hour: 8
allowed_requests_max_hour: 20
health_check_min_hour: 8
health_check_max_hour: 10
html:
  captcha_id: "#captcha_image"
  captcha_txt_input_id: "#captcha_input"
  captcha_err_id: "#captcha_error"
  captcha_button_id: "#captcha_submit"
  second_stage_button_id: "#book"
  second_stage_bis_check_id: "#reschedule_check"
  second_stage_bis_button_id: "#reschedule_confirm"
urls:
  - name: "N"
    url: "https://example.org/queue"
    user_id: 123
    enabled: true
    type: initial
  - name: "M"
    url: "https://example.org/other"
    user_id: 456
    enabled: false
    type: rescheduled
"##;

    fn sample() -> Config {
        serde_yaml::from_str(SAMPLE).unwrap()
    }

    #[test]
    fn parses_original_document_keys() {
        let cfg = sample();
        assert_eq!(cfg.interval_minutes, 30);
        assert_eq!(cfg.jitter_minutes, 10);
        assert_eq!(cfg.captcha_min_len, 6);
        assert_eq!(cfg.max_captcha_attempts, None);
        assert_eq!(cfg.html.captcha_image, "#captcha_image");
        assert_eq!(cfg.targets.len(), 2);
        assert!(cfg.targets[0].enabled);
        assert!(!cfg.targets[1].enabled);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn rejects_health_window_outside_allowed_window() {
        let mut cfg = sample();
        cfg.health_check_min_hour = 7;
        assert!(matches!(cfg.validate(), Err(Error::Config(_))));

        let mut cfg = sample();
        cfg.health_check_max_hour = 21;
        assert!(matches!(cfg.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn rejects_empty_and_out_of_range_windows() {
        let mut cfg = sample();
        cfg.allowed_requests_min_hour = 20;
        assert!(cfg.validate().is_err());

        let mut cfg = sample();
        cfg.health_check_max_hour = 25;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn load_reads_and_validates_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let cfg = Config::load(file.path()).unwrap();
        assert_eq!(cfg.operator_id, 42);

        let mut bad = tempfile::NamedTempFile::new().unwrap();
        bad.write_all(SAMPLE.replace("health_check_min_hour: 8", "health_check_min_hour: 7").as_bytes())
            .unwrap();
        assert!(Config::load(bad.path()).is_err());
    }
}
