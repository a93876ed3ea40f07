//! Drives one content unit from its source reference to the final media file.
//!
//! ```text
//! Pending ─► Resolving ─► NegotiatingKeys ─► Acquiring ─► Decrypting ─► Merging ─► Done
//!    │           └──────────────┴───────────────┴─────────────┴────────────┴──► Failed(kind)
//!    └─ output exists ─► Done
//! ```
//!
//! Every stage runs at most once per [UnitRunner::run]; retrying means running the unit again
//! from `Pending`. Temporary track files are removed and the remote CDM session is closed on
//! every exit path before the run is reported. Once the output is in place the unit is `Done`,
//! even if cancelled while fetching subtitles.

use std::{
    fmt,
    path::{Path, PathBuf},
};

use reqwest::Client;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::{
    acquire::TrackAcquirer,
    capture::SessionCapture,
    cdm::{negotiate_keys, RemoteCdm},
    config::{Config, RemoteCdmConfig},
    decrypt::{DecryptTool, Decryptor},
    error::{DrmdlError, DrmdlResult, ErrorKind},
    fetch::{StreamFetcher, YtDlp},
    manifest::{extract_widevine_pssh, fetch_manifest},
    merge::{FfmpegMuxer, Muxer, VideoTransform},
    model::{ContentUnit, PipelineResult, SubtitleTrack, UnitOutcome},
    pipeline::MediaProcessor,
    subtitle::download_subtitles,
    util::{
        http::HttpClient,
        path::{sanitize_component, DrmdlPathExt},
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitState {
    Pending,
    Resolving,
    NegotiatingKeys,
    Acquiring,
    Decrypting,
    Merging,
    Done,
    Failed(ErrorKind),
}

impl UnitState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed(_))
    }

    /// Kind reported for errors that do not carry their own.
    fn failure_kind(&self) -> ErrorKind {
        match self {
            Self::Pending | Self::Resolving => ErrorKind::StreamResolution,
            Self::NegotiatingKeys => ErrorKind::Internal,
            Self::Acquiring => ErrorKind::Acquisition,
            Self::Decrypting => ErrorKind::Decryption,
            Self::Merging | Self::Done | Self::Failed(_) => ErrorKind::Processing,
        }
    }
}

impl fmt::Display for UnitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed(kind) => write!(f, "Failed({kind:?})"),
            state => write!(f, "{state:?}"),
        }
    }
}

/// Transitions taken by one run, in order.
struct StateTracker {
    history: Vec<UnitState>,
}

impl StateTracker {
    fn new() -> Self {
        Self {
            history: vec![UnitState::Pending],
        }
    }

    fn current(&self) -> UnitState {
        self.history
            .last()
            .copied()
            .unwrap_or(UnitState::Pending)
    }

    fn enter(&mut self, next: UnitState) {
        let current = self.current();
        if current.is_terminal() {
            tracing::warn!("Ignored transition {current} -> {next}");
            return;
        }

        match next {
            UnitState::Failed(_) => tracing::warn!("{current} -> {next}"),
            _ => tracing::info!("{current} -> {next}"),
        }
        self.history.push(next);
    }
}

/// Result of a run together with every state it passed through.
#[derive(Debug, Clone)]
pub struct UnitRun {
    pub result: PipelineResult,
    pub history: Vec<UnitState>,
}

pub struct UnitRunner<C, F, D, M> {
    capture: C,
    acquirer: TrackAcquirer<F>,
    processor: MediaProcessor<D, M>,
    http: HttpClient,
    cdm_client: Client,
    cdm_config: RemoteCdmConfig,

    temp_root: PathBuf,
    transform: Option<VideoTransform>,
    fetch_subtitles: bool,
    diagnostic_limit: usize,
}

impl<C> UnitRunner<C, YtDlp, DecryptTool, FfmpegMuxer>
where
    C: SessionCapture + Sync,
{
    /// Runner using the external tools named in `config`.
    pub fn from_config(capture: C, config: &Config) -> DrmdlResult<Self> {
        let acquirer = TrackAcquirer::new(
            YtDlp::from_config(&config.tools),
            &config.pipeline.video_format,
            &config.pipeline.audio_format,
        );
        let processor = MediaProcessor::new(
            DecryptTool::from_config(&config.tools),
            FfmpegMuxer::from_config(&config.tools, config.transcode.clone()),
        );
        let cdm_client = Client::builder().timeout(config.cdm.timeout()).build()?;

        Ok(Self::new(
            capture,
            acquirer,
            processor,
            HttpClient::new(&config.http)?,
            cdm_client,
            config.cdm.clone(),
        )
        .with_temp_root(&config.pipeline.temp_dir)
        .with_transform(config.pipeline.crop)
        .with_subtitles(config.pipeline.fetch_subtitles)
        .with_diagnostic_limit(config.tools.diagnostic_limit))
    }
}

impl<C, F, D, M> UnitRunner<C, F, D, M>
where
    C: SessionCapture + Sync,
    F: StreamFetcher + Sync,
    D: Decryptor + Sync,
    M: Muxer + Sync,
{
    pub fn new(
        capture: C,
        acquirer: TrackAcquirer<F>,
        processor: MediaProcessor<D, M>,
        http: HttpClient,
        cdm_client: Client,
        cdm_config: RemoteCdmConfig,
    ) -> Self {
        Self {
            capture,
            acquirer,
            processor,
            http,
            cdm_client,
            cdm_config,
            temp_root: std::env::temp_dir().join("drmdl"),
            transform: None,
            fetch_subtitles: true,
            diagnostic_limit: 300,
        }
    }

    pub fn with_temp_root(mut self, temp_root: impl Into<PathBuf>) -> Self {
        self.temp_root = temp_root.into();
        self
    }

    pub fn with_transform(mut self, transform: Option<VideoTransform>) -> Self {
        self.transform = transform;
        self
    }

    pub fn with_subtitles(mut self, enabled: bool) -> Self {
        self.fetch_subtitles = enabled;
        self
    }

    pub fn with_diagnostic_limit(mut self, limit: usize) -> Self {
        self.diagnostic_limit = limit;
        self
    }

    /// Working directory of a unit. Distinct units never share one.
    pub fn workdir(&self, unit: &ContentUnit) -> PathBuf {
        self.temp_root.join(sanitize_component(unit.id()))
    }

    pub async fn run(
        &self,
        unit: &ContentUnit,
        output: &Path,
        cancel: &CancellationToken,
    ) -> PipelineResult {
        self.execute(unit, output, cancel).await.result
    }

    pub async fn execute(
        &self,
        unit: &ContentUnit,
        output: &Path,
        cancel: &CancellationToken,
    ) -> UnitRun {
        let span = tracing::info_span!("unit", id = unit.id());
        self.execute_inner(unit, output, cancel)
            .instrument(span)
            .await
    }

    async fn execute_inner(
        &self,
        unit: &ContentUnit,
        output: &Path,
        cancel: &CancellationToken,
    ) -> UnitRun {
        let mut tracker = StateTracker::new();

        if tokio::fs::try_exists(output).await.unwrap_or(false) {
            tracing::info!("{} already exists, skipping", output.display());
            tracker.enter(UnitState::Done);
            return UnitRun {
                result: PipelineResult {
                    unit_id: unit.id().to_string(),
                    outcome: UnitOutcome::Done {
                        path: output.to_path_buf(),
                        skipped: true,
                    },
                },
                history: tracker.history,
            };
        }

        tracing::info!("Processing {unit}");
        let workdir = self.workdir(unit);
        let mut cdm = RemoteCdm::with_client(self.cdm_client.clone(), self.cdm_config.clone())
            .with_diagnostic_limit(self.diagnostic_limit);
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(DrmdlError::Cancelled),
            result = self.drive(unit, output, &workdir, &mut cdm, &mut tracker) => result,
        };

        let result = match result {
            Err(DrmdlError::Cancelled)
                if tracker.current() == UnitState::Merging
                    && tokio::fs::try_exists(output).await.unwrap_or(false) =>
            {
                tracing::warn!("Cancelled after {} was written", output.display());
                Ok((output.to_path_buf(), Vec::new()))
            }
            result => result,
        };

        // no-op unless negotiation was interrupted
        cdm.close().await;
        remove_intermediates(&workdir).await;

        let outcome = match result {
            Ok((path, subtitles)) => {
                if self.fetch_subtitles && !subtitles.is_empty() {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => tracing::warn!("Subtitle download cancelled"),
                        _ = download_subtitles(&self.http, &subtitles, &path) => {}
                    }
                }

                tracker.enter(UnitState::Done);
                UnitOutcome::Done {
                    path,
                    skipped: false,
                }
            }
            Err(e) => {
                // merge may have been interrupted before it could clean up after itself
                _ = tokio::fs::remove_file(output.staging_path()).await;

                let kind = e
                    .kind()
                    .unwrap_or_else(|| tracker.current().failure_kind());
                tracing::error!("{unit} failed: {e}");
                tracker.enter(UnitState::Failed(kind));
                UnitOutcome::Failed {
                    kind,
                    message: e.to_string(),
                }
            }
        };

        UnitRun {
            result: PipelineResult {
                unit_id: unit.id().to_string(),
                outcome,
            },
            history: tracker.history,
        }
    }

    /// Stages up to the merged output. Returns it with the subtitles still to fetch.
    async fn drive(
        &self,
        unit: &ContentUnit,
        output: &Path,
        workdir: &Path,
        cdm: &mut RemoteCdm,
        tracker: &mut StateTracker,
    ) -> DrmdlResult<(PathBuf, Vec<SubtitleTrack>)> {
        tracker.enter(UnitState::Resolving);
        let stream = self.capture.capture(unit).await.map_err(|e| match e {
            DrmdlError::StreamResolution(_) | DrmdlError::Cancelled => e,
            e => DrmdlError::StreamResolution(e.to_string()),
        })?;
        stream.validate()?;

        tracker.enter(UnitState::NegotiatingKeys);
        let manifest = fetch_manifest(&self.http, &stream.manifest_url, self.diagnostic_limit).await?;
        let pssh = extract_widevine_pssh(&manifest)?;
        tracing::debug!("Widevine pssh {pssh}");

        let keys = negotiate_keys(cdm, &self.http, &stream, &pssh, self.diagnostic_limit).await?;
        tracing::info!("Received {} content key(s)", keys.len());

        tracker.enter(UnitState::Acquiring);
        let (video, audio) = self.acquirer.acquire(&stream.manifest_url, workdir).await?;

        tracker.enter(UnitState::Decrypting);
        let (video, audio) = self.processor.decrypt_tracks(&video, &audio, &keys).await?;

        tracker.enter(UnitState::Merging);
        let path = self
            .processor
            .merge_tracks(&video, &audio, output, self.transform.as_ref())
            .await?;

        Ok((path, stream.subtitles))
    }
}

/// Delete the track files of a unit and its working directory once empty.
///
/// Anything not named like a track file is left alone.
pub async fn remove_intermediates(workdir: &Path) {
    let mut entries = match tokio::fs::read_dir(workdir).await {
        Ok(entries) => entries,
        Err(_) => return,
    };

    while let Ok(Some(entry)) = entries.next_entry().await {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if !(name.contains(".enc_") || name.contains(".dec_")) {
            continue;
        }

        if let Err(e) = tokio::fs::remove_file(entry.path()).await {
            tracing::warn!("Failed to remove {}: {e}", entry.path().display());
        }
    }

    // fails when something else is still inside
    _ = tokio::fs::remove_dir(workdir).await;
}
