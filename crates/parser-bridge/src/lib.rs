//! Bridge to the external document extractor.
//!
//! The extractor is a separate program invoked per document; it receives an
//! input path and a scratch directory, writes one JSON object to stdout and
//! exits 0. This crate never looks inside the extractor — it only spawns,
//! bounds and decodes it.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tokio::process::Command;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Stdout larger than this is treated as a parse failure rather than
/// buffered further.
const MAX_STDOUT_BYTES: usize = 8 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("extractor could not be spawned: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("extractor exited with {code:?}: {stderr}")]
    Failed { code: Option<i32>, stderr: String },

    #[error("extractor did not finish within {} s", timeout.as_secs())]
    Timeout { timeout: Duration },

    #[error("extractor stdout is not a parse result: {0}")]
    Output(String),

    #[error("extractor stdout exceeded {MAX_STDOUT_BYTES} bytes")]
    Oversize,
}

/// The extractor's result for one document.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ParsedDocument {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub tables: Vec<ParsedTable>,
    #[serde(default)]
    pub pictures: Vec<ParsedPicture>,
    #[serde(default)]
    pub engine: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ParsedTable {
    #[serde(default)]
    pub page: Option<i64>,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub html: Option<String>,
    #[serde(default)]
    pub header: Option<Vec<String>>,
    #[serde(default)]
    pub rows: Option<Vec<Vec<String>>>,
    #[serde(default)]
    pub preview_rows: Option<Vec<Vec<String>>>,
    #[serde(default)]
    pub n_rows: Option<usize>,
    #[serde(default)]
    pub n_cols: Option<usize>,
    #[serde(default)]
    pub image_path: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub metadata: Option<ParsedTableMetadata>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ParsedTableMetadata {
    #[serde(default)]
    pub text_as_html: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ParsedPicture {
    #[serde(default)]
    pub page: Option<i64>,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub image_path: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
}

/// Spawns the extractor as `{interpreter} {script} {input} {out_dir}`.
#[derive(Debug, Clone)]
pub struct ParserBridge {
    interpreter: PathBuf,
    script: PathBuf,
    timeout: Duration,
}

impl ParserBridge {
    pub fn new(interpreter: impl Into<PathBuf>, script: impl Into<PathBuf>) -> Self {
        Self {
            interpreter: interpreter.into(),
            script: script.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Run the extractor over one saved document. `out_dir` receives derived
    /// artifacts (table crops, page rasters) and must already exist.
    pub async fn parse(
        &self,
        input_path: &Path,
        out_dir: &Path,
    ) -> Result<ParsedDocument, ParseError> {
        let mut command = Command::new(&self.interpreter);
        command
            .arg(&self.script)
            .arg(input_path)
            .arg(out_dir)
            .env("PYTHONUTF8", "1")
            .env("LANG", "ko_KR.UTF-8")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, command.output())
            .await
            .map_err(|_| ParseError::Timeout {
                timeout: self.timeout,
            })??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            tracing::warn!(
                input = %input_path.display(),
                code = ?output.status.code(),
                "extractor failed: {}",
                stderr.trim()
            );
            return Err(ParseError::Failed {
                code: output.status.code(),
                stderr: stderr.trim().to_string(),
            });
        }

        if output.stdout.len() > MAX_STDOUT_BYTES {
            return Err(ParseError::Oversize);
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let trimmed = stdout.trim();
        if !trimmed.starts_with('{') {
            return Err(ParseError::Output(preview(trimmed)));
        }

        serde_json::from_str(trimmed).map_err(|error| ParseError::Output(error.to_string()))
    }
}

fn preview(stdout: &str) -> String {
    const PREVIEW_CHARS: usize = 200;
    if stdout.chars().count() <= PREVIEW_CHARS {
        stdout.to_string()
    } else {
        stdout.chars().take(PREVIEW_CHARS).collect()
    }
}
