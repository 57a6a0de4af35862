use clap::Parser;

use meshd::config::CliOptions;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let options = CliOptions::parse();
    meshd::log_setup::setup(options.log_level)?;
    meshd::run(options).await
}
