mod cli;
mod engine;
mod error;
mod model;
mod orchestrator;
mod registry;
mod session;
mod telemetry;
#[cfg(test)]
mod test_support;
mod text_summary;
mod wizard;

use anyhow::Result;
use clap::Parser;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();
    telemetry::init_tracing(&args.log_level);
    let scripted = args.file.is_some();

    match cli::run(args).await {
        Ok(()) => Ok(()),
        Err(e) if scripted => {
            // Scripted runs print one line and exit non-zero.
            eprintln!("{e:#}");
            std::process::exit(1);
        }
        Err(e) => Err(e),
    }
}
