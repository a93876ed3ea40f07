use std::path::{Path, PathBuf};

use crate::{
    error::DrmdlResult,
    model::SubtitleTrack,
    util::{http::HttpClient, path::sanitize_component},
};

/// `Comeback - S01E16.mp4` with language `cs` becomes `Comeback - S01E16.cs.vtt`.
pub fn subtitle_path(output: &Path, language: &str) -> PathBuf {
    output.with_extension(format!("{}.vtt", sanitize_component(language)))
}

/// Save every subtitle track next to `output`.
///
/// Failures are logged and skipped. Returns the files written.
pub async fn download_subtitles(
    client: &HttpClient,
    tracks: &[SubtitleTrack],
    output: &Path,
) -> Vec<PathBuf> {
    let mut written = Vec::new();
    for track in tracks {
        let path = subtitle_path(output, &track.language);
        match download_subtitle(client, track, &path).await {
            Ok(()) => {
                tracing::info!("Saved {} subtitles to {}", track.language, path.display());
                written.push(path);
            }
            Err(e) => tracing::warn!("Failed to fetch {} subtitles: {e}", track.language),
        }
    }
    written
}

async fn download_subtitle(
    client: &HttpClient,
    track: &SubtitleTrack,
    path: &Path,
) -> DrmdlResult<()> {
    let response = client.get(&track.url).send().await?.error_for_status()?;
    let body = response.bytes().await?;
    tokio::fs::write(path, body).await?;
    Ok(())
}
