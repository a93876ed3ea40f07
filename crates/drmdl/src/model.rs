use std::{fmt, path::PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{DrmdlError, DrmdlResult, ErrorKind};

/// A season or episode number that may not be known.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Ordinal {
    Known(u32),
    #[default]
    Unknown,
}

impl From<Option<u32>> for Ordinal {
    fn from(value: Option<u32>) -> Self {
        value.map(Self::Known).unwrap_or(Self::Unknown)
    }
}

impl fmt::Display for Ordinal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Known(n) => write!(f, "{n:02}"),
            Self::Unknown => f.write_str("??"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesPosition {
    pub series: String,
    pub season: Ordinal,
    pub episode: Ordinal,
}

/// One episode or film.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentUnit {
    id: String,
    title: String,
    position: Option<SeriesPosition>,
    source: String,
}

impl ContentUnit {
    pub fn film(id: impl Into<String>, title: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            position: None,
            source: source.into(),
        }
    }

    pub fn episode(
        id: impl Into<String>,
        title: impl Into<String>,
        source: impl Into<String>,
        position: SeriesPosition,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            position: Some(position),
            source: source.into(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn position(&self) -> Option<&SeriesPosition> {
        self.position.as_ref()
    }

    /// Page URL or any handle understood by the session capture.
    pub fn source(&self) -> &str {
        &self.source
    }
}

impl fmt::Display for ContentUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.position {
            Some(p) => write!(
                f,
                "{} S{}E{} - {}",
                p.series, p.season, p.episode, self.title
            ),
            None => f.write_str(&self.title),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrmHeader {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubtitleTrack {
    pub url: String,
    #[serde(default = "default_language", alias = "lang")]
    pub language: String,
}

fn default_language() -> String {
    "und".to_string()
}

/// Everything captured from a live playback session.
///
/// Only valid for the session it was captured from, never reuse it for another unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamInfo {
    pub manifest_url: String,
    pub license_url: String,
    pub drm_header: DrmHeader,
    #[serde(default)]
    pub subtitles: Vec<SubtitleTrack>,
}

impl StreamInfo {
    pub fn validate(&self) -> DrmdlResult<()> {
        if self.manifest_url.trim().is_empty() {
            return Err(DrmdlError::StreamResolution(
                "manifest url is missing".to_string(),
            ));
        }
        if self.license_url.trim().is_empty() {
            return Err(DrmdlError::StreamResolution(
                "license url is missing".to_string(),
            ));
        }
        if self.drm_header.name.trim().is_empty() {
            return Err(DrmdlError::StreamResolution(
                "drm authorization header is missing".to_string(),
            ));
        }
        Ok(())
    }
}

/// Base64 encoded protection system specific header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pssh(String);

impl Pssh {
    pub fn new(base64: impl Into<String>) -> Self {
        Self(base64.into())
    }

    pub fn as_base64(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Pssh {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Content key as returned by the key service, both fields hex encoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecryptionKey {
    pub key_id: String,
    pub key: String,
}

impl fmt::Display for DecryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.key_id, self.key)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Video,
    Audio,
}

impl TrackKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Video => "video",
            Self::Audio => "audio",
        }
    }

    /// Extension requested from the fetcher. It may pick another one.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Video => "mp4",
            Self::Audio => "m4a",
        }
    }

    pub fn encrypted_tag(&self) -> &'static str {
        match self {
            Self::Video => "enc_video",
            Self::Audio => "enc_audio",
        }
    }

    pub fn decrypted_tag(&self) -> &'static str {
        match self {
            Self::Video => "dec_video",
            Self::Audio => "dec_audio",
        }
    }
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedTrack {
    pub kind: TrackKind,
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecryptedTrack {
    pub kind: TrackKind,
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum UnitOutcome {
    Done {
        path: PathBuf,
        /// The output existed before the run and nothing was done.
        skipped: bool,
    },
    Failed {
        kind: ErrorKind,
        message: String,
    },
}

/// Terminal record of one state machine run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineResult {
    pub unit_id: String,
    #[serde(flatten)]
    pub outcome: UnitOutcome,
}

impl PipelineResult {
    pub fn is_done(&self) -> bool {
        matches!(self.outcome, UnitOutcome::Done { .. })
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        match &self.outcome {
            UnitOutcome::Failed { kind, .. } => Some(*kind),
            UnitOutcome::Done { .. } => None,
        }
    }
}
