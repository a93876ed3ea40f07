use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Args, Subcommand};
use clap_handler::Handler;
use drmdl::{
    capture::{CaptureSource, CommandCapture, StaticCapture},
    ContentUnit, DrmHeader, Config, Ordinal, SeriesPosition, StreamInfo, SubtitleTrack,
};

mod check;
mod keys;
mod run;

#[derive(Subcommand, Clone, Handler)]
pub enum DrmdlCommand {
    Run(run::RunCommand),
    Keys(keys::KeysCommand),
    Check(check::CheckCommand),
}

#[derive(Args, Clone, Debug, Default)]
pub struct ConfigOptions {
    /// Configuration file
    #[clap(short, long, env = "DRMDL_CONFIG")]
    pub config: Option<PathBuf>,

    /// Remote CDM service root, without the device name
    #[clap(long)]
    pub cdm_host: Option<String>,

    /// Remote CDM device name
    #[clap(long)]
    pub cdm_device: Option<String>,

    /// Remote CDM shared secret
    #[clap(long, env = "DRMDL_CDM_SECRET", hide_env_values = true)]
    pub cdm_secret: Option<String>,
}

impl ConfigOptions {
    pub fn load(&self) -> anyhow::Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::load(path)
                .with_context(|| format!("failed to load {}", path.display()))?,
            None => Config::default(),
        };

        if let Some(host) = &self.cdm_host {
            config.cdm.host = host.clone();
        }
        if let Some(device) = &self.cdm_device {
            config.cdm.device = device.clone();
        }
        if let Some(secret) = &self.cdm_secret {
            config.cdm.secret = secret.clone();
        }
        Ok(config)
    }
}

/// Where the stream parameters come from
#[derive(Args, Clone, Debug, Default)]
pub struct StreamOptions {
    /// Helper printing stream info as JSON, called with the source appended
    #[clap(long, conflicts_with_all = ["manifest", "license", "drm_header"])]
    pub capture_command: Option<String>,

    /// DASH manifest URL
    #[clap(long, requires_all = ["license", "drm_header"])]
    pub manifest: Option<String>,

    /// Widevine license URL
    #[clap(long)]
    pub license: Option<String>,

    /// DRM authorization header sent to the license server, `Name: Value`
    #[clap(long)]
    pub drm_header: Option<String>,

    /// Subtitle track, `lang=url`
    #[clap(long = "subtitle")]
    pub subtitles: Vec<String>,
}

impl StreamOptions {
    pub fn into_capture(self, config: &Config) -> anyhow::Result<CaptureSource> {
        if let Some(command) = self.capture_command {
            let capture = CommandCapture::from_command_line(&command)?
                .with_timeout(config.tools.timeout())
                .with_diagnostic_limit(config.tools.diagnostic_limit);
            return Ok(CaptureSource::Command(capture));
        }

        let (Some(manifest_url), Some(license_url), Some(header)) =
            (self.manifest, self.license, self.drm_header)
        else {
            bail!("either --capture-command or --manifest, --license and --drm-header is required");
        };

        let (name, value) = header
            .split_once(':')
            .with_context(|| format!("invalid drm header: {header}"))?;
        let subtitles = self
            .subtitles
            .iter()
            .map(|subtitle| {
                let (language, url) = subtitle
                    .split_once('=')
                    .with_context(|| format!("invalid subtitle: {subtitle}"))?;
                Ok(SubtitleTrack {
                    url: url.to_string(),
                    language: language.to_string(),
                })
            })
            .collect::<anyhow::Result<_>>()?;

        let info = StreamInfo {
            manifest_url,
            license_url,
            drm_header: DrmHeader {
                name: name.trim().to_string(),
                value: value.trim().to_string(),
            },
            subtitles,
        };
        info.validate()?;
        Ok(CaptureSource::Static(StaticCapture::new(info)))
    }
}

#[derive(Args, Clone, Debug, Default)]
pub struct UnitOptions {
    /// Unit id, names the working directory
    #[clap(long)]
    pub id: Option<String>,

    #[clap(long)]
    pub title: Option<String>,

    /// Series name, marks the unit as an episode
    #[clap(long)]
    pub series: Option<String>,

    #[clap(long, requires = "series")]
    pub season: Option<u32>,

    #[clap(long, requires = "series")]
    pub episode: Option<u32>,

    /// Page URL or other reference understood by the capture helper
    pub source: String,
}

impl UnitOptions {
    /// `fallback_id` is used when no id was given.
    pub fn into_unit(self, fallback_id: &str) -> ContentUnit {
        let id = self.id.unwrap_or_else(|| fallback_id.to_string());
        let title = self.title.unwrap_or_else(|| id.clone());

        match self.series {
            Some(series) => ContentUnit::episode(
                id,
                title,
                self.source,
                SeriesPosition {
                    series,
                    season: Ordinal::from(self.season),
                    episode: Ordinal::from(self.episode),
                },
            ),
            None => ContentUnit::film(id, title, self.source),
        }
    }
}
