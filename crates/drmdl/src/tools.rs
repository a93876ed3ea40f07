use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::config::{DecryptorKind, ToolsConfig};

#[derive(Debug, Clone, Serialize)]
pub struct ToolStatus {
    pub name: &'static str,
    pub path: Option<PathBuf>,
    pub required: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolReport {
    pub tools: Vec<ToolStatus>,
}

impl ToolReport {
    pub fn missing(&self) -> impl Iterator<Item = &ToolStatus> {
        self.tools
            .iter()
            .filter(|tool| tool.required && tool.path.is_none())
    }

    pub fn is_complete(&self) -> bool {
        self.missing().next().is_none()
    }
}

/// Resolve every external executable the pipeline would run.
pub fn check_tools(config: &ToolsConfig) -> ToolReport {
    let decryptor = match config.decryptor {
        DecryptorKind::Mp4decrypt => ("mp4decrypt", config.mp4decrypt.as_path()),
        DecryptorKind::ShakaPackager => ("packager", config.packager.as_path()),
    };
    let aria2c = config
        .aria2c
        .as_deref()
        .unwrap_or_else(|| Path::new("aria2c"));

    let tools = [
        ("yt-dlp", config.yt_dlp.as_path(), true),
        (decryptor.0, decryptor.1, true),
        ("ffmpeg", config.ffmpeg.as_path(), true),
        ("aria2c", aria2c, false),
    ]
    .into_iter()
    .map(|(name, program, required)| {
        let path = which::which(program).ok();
        match (&path, required) {
            (Some(path), _) => tracing::debug!("Found {name} at {}", path.display()),
            (None, true) => tracing::error!("{name} not found ({})", program.display()),
            (None, false) => tracing::warn!("{name} not found, downloads will be slower"),
        }
        ToolStatus {
            name,
            path,
            required,
        }
    })
    .collect();

    ToolReport { tools }
}
