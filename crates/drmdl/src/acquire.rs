use std::path::{Path, PathBuf};

use glob::Pattern;

use crate::{
    error::{DrmdlError, DrmdlResult},
    fetch::StreamFetcher,
    model::{EncryptedTrack, TrackKind},
    util::path::DrmdlPathExt,
};

/// Stem of every track file inside a unit working directory.
pub const TRACK_STEM: &str = "track";

/// Left behind by fetchers while a download is still in progress.
const PARTIAL_SUFFIXES: [&str; 4] = [".part", ".ytdl", ".aria2", ".temp"];

/// Fetches the video and audio tracks of one stream side by side.
pub struct TrackAcquirer<F> {
    fetcher: F,
    video_format: String,
    audio_format: String,
}

impl<F> TrackAcquirer<F>
where
    F: StreamFetcher + Sync,
{
    pub fn new(fetcher: F, video_format: impl Into<String>, audio_format: impl Into<String>) -> Self {
        Self {
            fetcher,
            video_format: video_format.into(),
            audio_format: audio_format.into(),
        }
    }

    /// Both tracks or an [DrmdlError::Acquisition].
    ///
    /// The first failure drops the other fetch, which kills its subprocess. Whatever it wrote
    /// stays in `workdir` for the caller to clean up.
    pub async fn acquire(
        &self,
        manifest_url: &str,
        workdir: &Path,
    ) -> DrmdlResult<(EncryptedTrack, EncryptedTrack)> {
        tokio::fs::create_dir_all(workdir).await?;

        let (video, audio) = tokio::try_join!(
            self.acquire_track(manifest_url, workdir, TrackKind::Video, &self.video_format),
            self.acquire_track(manifest_url, workdir, TrackKind::Audio, &self.audio_format),
        )?;
        Ok((video, audio))
    }

    async fn acquire_track(
        &self,
        manifest_url: &str,
        workdir: &Path,
        kind: TrackKind,
        selector: &str,
    ) -> DrmdlResult<EncryptedTrack> {
        let template = workdir
            .join(TRACK_STEM)
            .with_tag(kind.encrypted_tag(), kind.extension());

        self.fetcher
            .fetch(manifest_url, kind, selector, &template)
            .await
            .map_err(|e| match e {
                DrmdlError::Acquisition(_) => e,
                e => DrmdlError::Acquisition(format!("{kind} fetch: {e}")),
            })?;

        let path = locate_track(workdir, kind).await?;
        tracing::info!("Fetched {kind} track to {}", path.display());
        Ok(EncryptedTrack { kind, path })
    }
}

/// Find the file a fetcher produced for `kind`, whatever extension it picked.
pub async fn locate_track(workdir: &Path, kind: TrackKind) -> DrmdlResult<PathBuf> {
    let pattern = format!(
        "{}/{TRACK_STEM}.{}*",
        Pattern::escape(&workdir.to_string_lossy()),
        kind.encrypted_tag()
    );
    let candidates = glob::glob(&pattern)
        .map_err(|e| DrmdlError::Acquisition(format!("invalid track pattern: {e}")))?;

    for candidate in candidates.flatten() {
        let name = candidate.to_string_lossy();
        if PARTIAL_SUFFIXES.iter().any(|suffix| name.ends_with(suffix)) {
            continue;
        }

        match tokio::fs::metadata(&candidate).await {
            Ok(metadata) if metadata.is_file() && metadata.len() > 0 => return Ok(candidate),
            _ => continue,
        }
    }

    Err(DrmdlError::Acquisition(format!(
        "{kind} fetch finished without producing a file"
    )))
}
