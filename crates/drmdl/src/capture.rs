use std::{future::Future, path::PathBuf, time::Duration};

use tokio::process::Command;

use crate::{
    error::{DrmdlError, DrmdlResult},
    model::{ContentUnit, StreamInfo},
    util::command::run_command,
};

/// Obtains the stream parameters of a live playback session for a content unit.
///
/// Implementations usually drive a real browser session. The result is only valid for a short
/// time and must be fetched again for every attempt.
pub trait SessionCapture {
    fn capture(&self, unit: &ContentUnit) -> impl Future<Output = DrmdlResult<StreamInfo>> + Send;
}

/// Stream parameters known in advance.
pub struct StaticCapture(StreamInfo);

impl StaticCapture {
    pub fn new(info: StreamInfo) -> Self {
        Self(info)
    }
}

impl SessionCapture for StaticCapture {
    async fn capture(&self, _unit: &ContentUnit) -> DrmdlResult<StreamInfo> {
        self.0.validate()?;
        Ok(self.0.clone())
    }
}

/// Runs an external helper which prints [StreamInfo] as JSON to stdout.
///
/// The source reference of the unit is appended as the last argument.
pub struct CommandCapture {
    program: PathBuf,
    args: Vec<String>,
    timeout: Option<Duration>,
    diagnostic_limit: usize,
}

impl CommandCapture {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            timeout: None,
            diagnostic_limit: 300,
        }
    }

    /// Parse a shell-like command line, such as `node capture.js --headless`.
    pub fn from_command_line(command: &str) -> DrmdlResult<Self> {
        let mut parts = shlex::split(command)
            .filter(|parts| !parts.is_empty())
            .ok_or_else(|| DrmdlError::Config(format!("invalid capture command: {command}")))?;
        let program = parts.remove(0);
        Ok(Self::new(program, parts))
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_diagnostic_limit(mut self, limit: usize) -> Self {
        self.diagnostic_limit = limit;
        self
    }
}

impl SessionCapture for CommandCapture {
    async fn capture(&self, unit: &ContentUnit) -> DrmdlResult<StreamInfo> {
        let mut command = Command::new(&self.program);
        command.args(&self.args).arg(unit.source());

        let output = run_command(&mut command, self.timeout)
            .await
            .map_err(|e| DrmdlError::StreamResolution(format!("capture helper: {e}")))?;
        if !output.success() {
            return Err(DrmdlError::StreamResolution(format!(
                "capture helper {}",
                output.diagnostic(self.diagnostic_limit)
            )));
        }

        let info: StreamInfo = serde_json::from_slice(&output.stdout).map_err(|e| {
            DrmdlError::StreamResolution(format!("capture helper printed no stream info: {e}"))
        })?;
        info.validate()?;
        Ok(info)
    }
}

pub enum CaptureSource {
    Static(StaticCapture),
    Command(CommandCapture),
}

impl SessionCapture for CaptureSource {
    async fn capture(&self, unit: &ContentUnit) -> DrmdlResult<StreamInfo> {
        match self {
            Self::Static(capture) => capture.capture(unit).await,
            Self::Command(capture) => capture.capture(unit).await,
        }
    }
}
