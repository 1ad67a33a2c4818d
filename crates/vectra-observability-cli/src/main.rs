use anyhow::Result;
use clap::Parser;

fn main() -> Result<()> {
    let cli = vectra_observability_cli::Cli::parse();
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(cli.log_level())
        .with_target(false)
        .init();
    vectra_observability_cli::run_cli(cli)
}
