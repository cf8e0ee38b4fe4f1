//! CAPTCHA decoding via an external OCR command.
//!
//! The command is configured as an argv prefix (reference setup:
//! `python ocr.py`); the artifact path is appended as the final argument
//! and the decoded text is read from stdout.

use std::path::Path;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use slotwatch_core::{CaptchaSolver, Error, Result};

pub struct CommandSolver {
    argv: Vec<String>,
}

impl CommandSolver {
    pub fn new(argv: Vec<String>) -> Self {
        Self { argv }
    }
}

#[async_trait]
impl CaptchaSolver for CommandSolver {
    async fn decode(&self, image: &Path) -> Result<String> {
        let (program, args) = self
            .argv
            .split_first()
            .ok_or_else(|| Error::Solver("empty solver command".to_string()))?;

        let output = Command::new(program)
            .args(args)
            .arg(image)
            .output()
            .await
            .map_err(|e| Error::Solver(format!("spawn {}: {}", program, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Solver(format!(
                "{} exited with {}: {}",
                program,
                output.status,
                stderr.trim()
            )));
        }

        let decoded = String::from_utf8_lossy(&output.stdout).trim().to_string();
        debug!(image = %image.display(), len = decoded.len(), "OCR finished");
        Ok(decoded)
    }
}
