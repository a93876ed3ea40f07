use clap::Parser;
use clap_handler::handler;
use drmdl::{
    capture::SessionCapture,
    cdm::{negotiate_keys, RemoteCdm},
    manifest::{extract_widevine_pssh, fetch_manifest},
    ContentUnit, HttpClient,
};

use super::{ConfigOptions, StreamOptions};

/// Print the content keys of a stream without downloading it
#[derive(Parser, Clone, Debug)]
#[clap(name = "keys")]
pub struct KeysCommand {
    #[clap(flatten)]
    pub config: ConfigOptions,

    #[clap(flatten)]
    pub stream: StreamOptions,

    /// Reference handed to the capture helper
    #[clap(default_value = "")]
    pub source: String,
}

impl KeysCommand {
    pub async fn execute(self) -> anyhow::Result<()> {
        let config = self.config.load()?;
        let limit = config.tools.diagnostic_limit;
        let capture = self.stream.into_capture(&config)?;

        let unit = ContentUnit::film("keys", "keys", self.source);
        let stream = capture.capture(&unit).await?;

        let client = HttpClient::new(&config.http)?;
        let manifest = fetch_manifest(&client, &stream.manifest_url, limit).await?;
        let pssh = extract_widevine_pssh(&manifest)?;
        tracing::info!("Widevine pssh: {pssh}");

        let mut cdm = RemoteCdm::new(config.cdm)?.with_diagnostic_limit(limit);
        let keys = negotiate_keys(&mut cdm, &client, &stream, &pssh, limit).await?;
        for key in keys {
            println!("{key}");
        }
        Ok(())
    }
}

#[handler(KeysCommand)]
pub async fn keys(args: KeysCommand) -> anyhow::Result<()> {
    args.execute().await
}
