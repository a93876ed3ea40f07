use std::path::{Path, PathBuf};

use crate::{
    decrypt::Decryptor,
    error::{DrmdlError, DrmdlResult},
    merge::{Muxer, VideoTransform},
    model::{DecryptedTrack, DecryptionKey, EncryptedTrack},
    util::path::DrmdlPathExt,
};

/// Turns a pair of encrypted tracks into the final media file.
pub struct MediaProcessor<D, M> {
    decryptor: D,
    muxer: M,
}

impl<D, M> MediaProcessor<D, M>
where
    D: Decryptor + Sync,
    M: Muxer + Sync,
{
    pub fn new(decryptor: D, muxer: M) -> Self {
        Self { decryptor, muxer }
    }

    pub async fn process(
        &self,
        video: &EncryptedTrack,
        audio: &EncryptedTrack,
        keys: &[DecryptionKey],
        output: &Path,
        transform: Option<&VideoTransform>,
    ) -> DrmdlResult<PathBuf> {
        let (video, audio) = self.decrypt_tracks(video, audio, keys).await?;
        self.merge_tracks(&video, &audio, output, transform).await
    }

    /// Decrypt both tracks with the full key set.
    pub async fn decrypt_tracks(
        &self,
        video: &EncryptedTrack,
        audio: &EncryptedTrack,
        keys: &[DecryptionKey],
    ) -> DrmdlResult<(DecryptedTrack, DecryptedTrack)> {
        if keys.is_empty() {
            return Err(DrmdlError::NoKeys);
        }
        for key in keys {
            tracing::debug!("Content key {key}");
        }

        let video = self.decrypt_track(video, keys).await?;
        let audio = self.decrypt_track(audio, keys).await?;
        Ok((video, audio))
    }

    async fn decrypt_track(
        &self,
        track: &EncryptedTrack,
        keys: &[DecryptionKey],
    ) -> DrmdlResult<DecryptedTrack> {
        let output = decrypted_path(track);
        tracing::info!("Decrypting {} track", track.kind);

        self.decryptor
            .decrypt(keys, &track.path, &output)
            .await
            .map_err(|e| match e {
                DrmdlError::Decryption(_) => e,
                e => DrmdlError::Decryption(format!("{} track: {e}", track.kind)),
            })?;

        Ok(DecryptedTrack {
            kind: track.kind,
            path: output,
        })
    }

    /// Merge into a staging file and move it to `output` once complete.
    ///
    /// `output` either does not exist or holds a finished file, never partial data.
    pub async fn merge_tracks(
        &self,
        video: &DecryptedTrack,
        audio: &DecryptedTrack,
        output: &Path,
        transform: Option<&VideoTransform>,
    ) -> DrmdlResult<PathBuf> {
        if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let staging = output.staging_path();
        let result = async {
            self.muxer
                .merge(video, audio, &staging, transform)
                .await
                .map_err(|e| match e {
                    DrmdlError::Processing(_) => e,
                    e => DrmdlError::Processing(e.to_string()),
                })?;
            tokio::fs::rename(&staging, output)
                .await
                .map_err(|e| DrmdlError::Processing(format!("failed to move merged file: {e}")))
        }
        .await;

        if let Err(e) = result {
            _ = tokio::fs::remove_file(&staging).await;
            return Err(e);
        }

        tracing::info!("Merged into {}", output.display());
        Ok(output.to_path_buf())
    }
}

/// `track.enc_video.mp4` becomes `track.dec_video.mp4`.
fn decrypted_path(track: &EncryptedTrack) -> PathBuf {
    let stem = track
        .path
        .file_name()
        .map(|name| name.to_string_lossy())
        .and_then(|name| {
            name.split_once(&format!(".{}", track.kind.encrypted_tag()))
                .map(|(stem, _)| stem.to_string())
        })
        .unwrap_or_else(|| "track".to_string());
    let extension = track
        .path
        .extension()
        .map(|ext| ext.to_string_lossy().into_owned())
        .filter(|ext| ext != track.kind.encrypted_tag())
        .unwrap_or_else(|| track.kind.extension().to_string());

    track.path.with_file_name(format!(
        "{stem}.{}.{extension}",
        track.kind.decrypted_tag()
    ))
}
