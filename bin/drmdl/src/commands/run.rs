use std::path::PathBuf;

use anyhow::bail;
use clap::{Args, Parser};
use clap_handler::handler;
use drmdl::{merge::VideoTransform, UnitRunner};
use tokio_util::sync::CancellationToken;

use super::{ConfigOptions, StreamOptions, UnitOptions};

#[derive(Parser, Clone, Debug)]
#[clap(name = "run", visible_alias = "dl")]
pub struct RunCommand {
    #[clap(flatten)]
    pub config: ConfigOptions,

    #[clap(flatten)]
    pub stream: StreamOptions,

    #[clap(flatten)]
    pub unit: UnitOptions,

    #[clap(flatten)]
    pub output: OutputOptions,
}

#[derive(Args, Clone, Debug)]
pub struct OutputOptions {
    /// Final media file. Nothing is done when it already exists.
    #[clap(short, long)]
    pub output: PathBuf,

    /// Center crop the video to an aspect ratio such as `4:3`
    #[clap(long)]
    pub crop: Option<VideoTransform>,

    /// Do not save subtitle tracks
    #[clap(long)]
    pub no_subtitles: bool,

    /// Root of the per-unit working directories
    #[clap(long)]
    pub temp_dir: Option<PathBuf>,
}

impl RunCommand {
    pub async fn execute(self) -> anyhow::Result<()> {
        let mut config = self.config.load()?;
        if let Some(crop) = self.output.crop {
            config.pipeline.crop = Some(crop);
        }
        if self.output.no_subtitles {
            config.pipeline.fetch_subtitles = false;
        }
        if let Some(temp_dir) = self.output.temp_dir {
            config.pipeline.temp_dir = temp_dir;
        }

        let fallback_id = self
            .output
            .output
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "unit".to_string());
        let unit = self.unit.into_unit(&fallback_id);
        let capture = self.stream.into_capture(&config)?;
        let runner = UnitRunner::from_config(capture, &config)?;

        let cancel = CancellationToken::new();
        tokio::spawn({
            let cancel = cancel.clone();
            async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("Interrupted, cleaning up");
                    cancel.cancel();
                }
            }
        });

        let result = runner.run(&unit, &self.output.output, &cancel).await;
        println!("{}", serde_json::to_string(&result)?);

        if let Some(kind) = result.error_kind() {
            if kind.is_entitlement() {
                bail!("{} failed: no content keys, check the subscription", result.unit_id);
            }
            bail!("{} failed", result.unit_id);
        }
        Ok(())
    }
}

#[handler(RunCommand)]
pub async fn run(args: RunCommand) -> anyhow::Result<()> {
    args.execute().await
}
