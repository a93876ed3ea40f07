use std::{
    future::Future,
    path::{Path, PathBuf},
    time::Duration,
};

use tokio::process::Command;

use crate::{
    config::ToolsConfig,
    error::{DrmdlError, DrmdlResult},
    model::TrackKind,
    util::command::run_command,
};

/// Downloads one representation of an adaptive stream into a local file.
///
/// `output` is a template. The fetcher may settle on another extension; callers locate the
/// produced file by its stem.
pub trait StreamFetcher {
    fn fetch(
        &self,
        manifest_url: &str,
        kind: TrackKind,
        selector: &str,
        output: &Path,
    ) -> impl Future<Output = DrmdlResult<()>> + Send;
}

/// `yt-dlp`, optionally with `aria2c` as external downloader.
pub struct YtDlp {
    program: PathBuf,
    aria2c: Option<(PathBuf, String)>,
    timeout: Option<Duration>,
    diagnostic_limit: usize,
}

impl YtDlp {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            aria2c: None,
            timeout: None,
            diagnostic_limit: 300,
        }
    }

    /// aria2c is used when configured explicitly or found in `PATH`.
    pub fn from_config(config: &ToolsConfig) -> Self {
        let aria2c = config
            .aria2c
            .clone()
            .or_else(|| which::which("aria2c").ok());

        let mut fetcher = Self::new(&config.yt_dlp)
            .with_timeout(config.timeout())
            .with_diagnostic_limit(config.diagnostic_limit);
        if let Some(aria2c) = aria2c {
            fetcher = fetcher.with_aria2c(aria2c, config.aria2c_args.clone());
        }
        fetcher
    }

    pub fn with_aria2c(mut self, program: impl Into<PathBuf>, args: String) -> Self {
        self.aria2c = Some((program.into(), args));
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_diagnostic_limit(mut self, limit: usize) -> Self {
        self.diagnostic_limit = limit;
        self
    }

    fn command(&self, manifest_url: &str, selector: &str, output: &Path) -> Command {
        let mut command = Command::new(&self.program);
        command
            .arg("--allow-unplayable-formats")
            .args(["-f", selector])
            .args(["--no-check-certificate", "--no-warnings", "--no-part"])
            .arg("-o")
            .arg(output);

        if let Some((aria2c, args)) = &self.aria2c {
            command
                .arg("--external-downloader")
                .arg(aria2c)
                .arg("--external-downloader-args")
                .arg(args);
        }

        command.arg(manifest_url);
        command
    }
}

impl StreamFetcher for YtDlp {
    async fn fetch(
        &self,
        manifest_url: &str,
        kind: TrackKind,
        selector: &str,
        output: &Path,
    ) -> DrmdlResult<()> {
        tracing::info!("Fetching {kind} track ({selector})");

        let mut command = self.command(manifest_url, selector, output);
        let result = run_command(&mut command, self.timeout)
            .await
            .map_err(|e| DrmdlError::Acquisition(format!("{kind} fetch: {e}")))?;
        if !result.success() {
            return Err(DrmdlError::Acquisition(format!(
                "{kind} fetch {}",
                result.diagnostic(self.diagnostic_limit)
            )));
        }

        Ok(())
    }
}
