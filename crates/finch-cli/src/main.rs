mod commands;
mod logging;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "finch",
    version,
    about = "Declarative stream pipelines over JSON values"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Log additional information. Overrides --log-level.
    #[arg(long, env = "FINCH_DEBUG", global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the streams found at a path
    Start {
        /// Definition file, directory of definition files, or glob
        #[arg(default_value = ".")]
        pathname: PathBuf,
        /// Restart streams when their files change
        #[arg(long)]
        watch: bool,
        /// Keep streams going past stage errors (`--continue=false` to force stopping)
        #[arg(long = "continue", num_args = 0..=1, default_missing_value = "true")]
        continue_on_error: Option<bool>,
        #[command(flatten)]
        engine: EngineArgs,
    },
    /// Resolve definition files without running them
    Check {
        /// Definition file, directory of definition files, or glob
        #[arg(default_value = ".")]
        pathname: PathBuf,
        #[command(flatten)]
        engine: EngineArgs,
    },
    /// List available transformations
    Transforms {
        #[command(flatten)]
        engine: EngineArgs,
    },
    /// Run a pipeline worker on stdin/stdout
    #[command(hide = true)]
    Worker,
}

#[derive(Args, Debug, Clone)]
struct EngineArgs {
    /// Milliseconds a file must stay unchanged before a change is handled
    #[arg(long, env = "FINCH_STABILITY_THRESHOLD", default_value_t = 2000)]
    stability_threshold: u64,

    /// Milliseconds between filesystem polls while watching
    #[arg(long, env = "FINCH_POLL_INTERVAL", default_value_t = 100)]
    poll_interval: u64,

    /// Extra directory of executable modules (repeatable)
    #[arg(long = "module-dir")]
    module_dirs: Vec<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let log_level = logging::effective_level(&cli.log_level, cli.debug).to_owned();

    logging::init(&log_level);

    match cli.command {
        Commands::Start {
            pathname,
            watch,
            continue_on_error,
            engine,
        } => {
            let settings = commands::engine_settings(&engine, &log_level)?;
            commands::start::execute(&pathname, watch, continue_on_error, &settings).await
        }
        Commands::Check { pathname, engine } => {
            let settings = commands::engine_settings(&engine, &log_level)?;
            commands::check::execute(&pathname, &settings).await
        }
        Commands::Transforms { engine } => {
            let settings = commands::engine_settings(&engine, &log_level)?;
            commands::transforms::execute(&settings)
        }
        Commands::Worker => {
            let code = commands::worker::execute().await;
            std::process::exit(code);
        }
    }
}
