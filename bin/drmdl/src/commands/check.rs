use anyhow::bail;
use clap::Parser;
use clap_handler::handler;
use drmdl::tools::check_tools;

use super::ConfigOptions;

/// Look up the external tools the pipeline runs
#[derive(Parser, Clone, Debug)]
#[clap(name = "check")]
pub struct CheckCommand {
    #[clap(flatten)]
    pub config: ConfigOptions,
}

#[handler(CheckCommand)]
pub async fn check(args: CheckCommand) -> anyhow::Result<()> {
    let config = args.config.load()?;
    let report = check_tools(&config.tools);

    for tool in report.tools.iter() {
        match &tool.path {
            Some(path) => println!("{:<12}{}", tool.name, path.display()),
            None if tool.required => println!("{:<12}missing", tool.name),
            None => println!("{:<12}missing (optional)", tool.name),
        }
    }

    if !report.is_complete() {
        let missing: Vec<_> = report.missing().map(|tool| tool.name).collect();
        bail!("missing required tools: {}", missing.join(", "));
    }
    Ok(())
}
