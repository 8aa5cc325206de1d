//! Turning captcha images into text.

use crate::config::OcrSettings;
use crate::error::PortalError;
use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// Reads the text out of a captcha image.
#[async_trait]
pub trait CaptchaSolver: Send + Sync {
    async fn solve(&self, image: &[u8]) -> Result<String, PortalError>;
}

/// Solves captchas with an external OCR program that reads the image on stdin and prints the
/// text on stdout, `tesseract stdin stdout` by default.
#[derive(Debug, Clone)]
pub struct CommandSolver {
    command: String,
    args: Vec<String>,
}

impl CommandSolver {
    pub fn new(settings: &OcrSettings) -> Self {
        Self {
            command: settings.command.clone(),
            args: settings.args.clone(),
        }
    }
}

#[async_trait]
impl CaptchaSolver for CommandSolver {
    async fn solve(&self, image: &[u8]) -> Result<String, PortalError> {
        let mut child = Command::new(&self.command)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| PortalError::Transient(format!("could not start {}: {e}", self.command)))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| PortalError::Transient("OCR stdin was not captured".to_string()))?;
        stdin
            .write_all(image)
            .await
            .map_err(|e| PortalError::Transient(format!("could not write captcha to OCR: {e}")))?;
        drop(stdin);

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| PortalError::Transient(format!("OCR did not finish: {e}")))?;

        if !output.status.success() {
            return Err(PortalError::Transient(format!(
                "{} exited with {}: {}",
                self.command,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let text: String = String::from_utf8_lossy(&output.stdout)
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect();
        debug!(len = text.len(), "solved captcha");

        Ok(text)
    }
}
