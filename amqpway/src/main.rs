use amqpway_core::cli::{ConfigArgs, check};
use amqpway_core::logging::init_logging;
use amqpway_core::server;
use anyhow::Result;
use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "amqpway",
    version,
    about = "amqpway: HTTP to AMQP publishing proxy with pooled broker connections",
    args_conflicts_with_subcommands = true
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    run: ConfigArgs,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the amqpway proxy (default)
    Run(ConfigArgs),

    /// Validate configuration and exit
    Check(ConfigArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Command::Check(args)) => check::check(&args),
        Some(Command::Run(args)) => run(&args),
        None => run(&cli.run),
    }
}

fn run(args: &ConfigArgs) -> Result<()> {
    let config = args.load()?;

    init_logging(config.debug);
    tracing::debug!(pool = ?config.pool, "configuration loaded");

    server::run(config)
}
