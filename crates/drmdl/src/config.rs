use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::{error::DrmdlResult, merge::VideoTransform};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub cdm: RemoteCdmConfig,
    pub http: HttpConfig,
    pub tools: ToolsConfig,
    pub pipeline: PipelineConfig,
    pub transcode: TranscodeConfig,
}

impl Config {
    pub fn load<P>(path: P) -> DrmdlResult<Self>
    where
        P: AsRef<Path>,
    {
        let data = std::fs::read_to_string(path)?;
        let config = toml::from_str(&data)?;
        Ok(config)
    }
}

/// Remote key service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteCdmConfig {
    /// Service root, without the device segment.
    pub host: String,
    pub device: String,
    pub secret: String,
    pub secret_header: String,
    pub timeout_secs: u64,
    pub close_timeout_secs: u64,
}

impl RemoteCdmConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_secs(self.close_timeout_secs)
    }
}

impl Default for RemoteCdmConfig {
    fn default() -> Self {
        Self {
            host: "https://cdrm-project.com/remotecdm/widevine".to_string(),
            device: "public".to_string(),
            secret: "CDRM".to_string(),
            secret_header: "X-Secret-Key".to_string(),
            timeout_secs: 30,
            close_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub timeout_secs: u64,
    /// Chrome user agent is used when unset
    pub user_agent: Option<String>,
    pub accept_invalid_certs: bool,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            user_agent: None,
            accept_invalid_certs: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DecryptorKind {
    #[default]
    Mp4decrypt,
    ShakaPackager,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub yt_dlp: PathBuf,
    pub mp4decrypt: PathBuf,
    pub packager: PathBuf,
    pub ffmpeg: PathBuf,
    /// External downloader handed to yt-dlp when present on the system.
    pub aria2c: Option<PathBuf>,
    pub aria2c_args: String,
    pub decryptor: DecryptorKind,
    /// Upper bound for a single subprocess run
    pub timeout_secs: Option<u64>,
    /// Maximum characters of tool output kept in error messages.
    pub diagnostic_limit: usize,
}

impl ToolsConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            yt_dlp: PathBuf::from("yt-dlp"),
            mp4decrypt: PathBuf::from("mp4decrypt"),
            packager: PathBuf::from("packager"),
            ffmpeg: PathBuf::from("ffmpeg"),
            aria2c: None,
            aria2c_args: "-x 16 -k 1M".to_string(),
            decryptor: DecryptorKind::default(),
            timeout_secs: None,
            diagnostic_limit: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Per-unit working directories are created below this path.
    pub temp_dir: PathBuf,
    pub video_format: String,
    pub audio_format: String,
    pub fetch_subtitles: bool,
    pub crop: Option<VideoTransform>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            temp_dir: std::env::temp_dir().join("drmdl"),
            video_format: "bestvideo".to_string(),
            audio_format: "bestaudio".to_string(),
            fetch_subtitles: true,
            crop: None,
        }
    }
}

/// Encoder settings used when the video has to be re-encoded.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscodeConfig {
    pub video_codec: String,
    pub crf: u8,
    pub preset: String,
}

impl Default for TranscodeConfig {
    fn default() -> Self {
        Self {
            video_codec: "libx264".to_string(),
            crf: 18,
            preset: "fast".to_string(),
        }
    }
}
