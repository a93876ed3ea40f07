use std::{
    fmt,
    future::Future,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use serde::{Deserialize, Serialize};
use tokio::process::Command;

use crate::{
    config::{ToolsConfig, TranscodeConfig},
    error::{DrmdlError, DrmdlResult},
    model::DecryptedTrack,
    util::command::run_command,
};

/// Change applied to the video track while merging. Forces a re-encode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum VideoTransform {
    /// Keep the full height and cut the sides down to `width:height`.
    CenterCrop { width: u32, height: u32 },
}

impl VideoTransform {
    pub fn filter(&self) -> String {
        match self {
            // even width, as required by yuv420p encoders
            Self::CenterCrop { width, height } => {
                format!("crop=trunc(ih*{width}/{height}/2)*2:ih")
            }
        }
    }
}

impl FromStr for VideoTransform {
    type Err = DrmdlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || DrmdlError::Config(format!("invalid aspect ratio {s:?}, expected W:H"));

        let (width, height) = s.trim().split_once(':').ok_or_else(invalid)?;
        let width: u32 = width.trim().parse().map_err(|_| invalid())?;
        let height: u32 = height.trim().parse().map_err(|_| invalid())?;
        if width == 0 || height == 0 {
            return Err(invalid());
        }

        Ok(Self::CenterCrop { width, height })
    }
}

impl TryFrom<String> for VideoTransform {
    type Error = DrmdlError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<VideoTransform> for String {
    fn from(value: VideoTransform) -> Self {
        value.to_string()
    }
}

impl fmt::Display for VideoTransform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CenterCrop { width, height } => write!(f, "{width}:{height}"),
        }
    }
}

/// Combines a decrypted video and audio track into one file.
pub trait Muxer {
    fn merge(
        &self,
        video: &DecryptedTrack,
        audio: &DecryptedTrack,
        output: &Path,
        transform: Option<&VideoTransform>,
    ) -> impl Future<Output = DrmdlResult<()>> + Send;
}

pub struct FfmpegMuxer {
    program: PathBuf,
    transcode: TranscodeConfig,
    timeout: Option<Duration>,
    diagnostic_limit: usize,
}

impl FfmpegMuxer {
    pub fn new(program: impl Into<PathBuf>, transcode: TranscodeConfig) -> Self {
        Self {
            program: program.into(),
            transcode,
            timeout: None,
            diagnostic_limit: 300,
        }
    }

    pub fn from_config(tools: &ToolsConfig, transcode: TranscodeConfig) -> Self {
        Self {
            program: tools.ffmpeg.clone(),
            transcode,
            timeout: tools.timeout(),
            diagnostic_limit: tools.diagnostic_limit,
        }
    }

    fn command(
        &self,
        video: &Path,
        audio: &Path,
        output: &Path,
        transform: Option<&VideoTransform>,
    ) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(["-hide_banner", "-y"])
            .arg("-i")
            .arg(video)
            .arg("-i")
            .arg(audio)
            .args(["-map", "0:v:0", "-map", "1:a:0"]);

        match transform {
            Some(transform) => {
                command
                    .arg("-vf")
                    .arg(transform.filter())
                    .arg("-c:v")
                    .arg(&self.transcode.video_codec)
                    .arg("-crf")
                    .arg(self.transcode.crf.to_string())
                    .arg("-preset")
                    .arg(&self.transcode.preset)
                    .args(["-c:a", "copy"]);
            }
            None => {
                command.args(["-c", "copy"]);
            }
        }

        command
            .args(["-shortest", "-movflags", "+faststart"])
            .arg(output);
        command
    }
}

impl Muxer for FfmpegMuxer {
    async fn merge(
        &self,
        video: &DecryptedTrack,
        audio: &DecryptedTrack,
        output: &Path,
        transform: Option<&VideoTransform>,
    ) -> DrmdlResult<()> {
        match transform {
            Some(transform) => tracing::info!("Merging tracks, cropping video to {transform}"),
            None => tracing::info!("Merging tracks"),
        }

        let mut command = self.command(&video.path, &audio.path, output, transform);
        let result = run_command(&mut command, self.timeout)
            .await
            .map_err(|e| DrmdlError::Processing(format!("ffmpeg: {e}")))?;
        if !result.success() {
            return Err(DrmdlError::Processing(format!(
                "ffmpeg {}",
                result.diagnostic(self.diagnostic_limit)
            )));
        }

        Ok(())
    }
}
