//! vulnstack - provisions and converges the vulnerability-archive stack on GCP
//!
//! This is the main entry point for the vulnstack CLI.

mod cli;

use cli::commands::{CommandContext, Runnable};
use cli::output::OutputFormatter;
use cli::{Cli, Commands};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use vulnstack::config::{Config, LogFormat};
use vulnstack::error::Error;

#[tokio::main]
async fn main() {
    let cli = Cli::parse_args();

    let config = match Config::load(cli.config.as_ref()) {
        Ok(config) => config,
        Err(e) => {
            init_logging(cli.verbosity(), LogFormat::Text);
            let output = OutputFormatter::new(!cli.no_color, cli.is_json(), cli.verbosity());
            output.error(&format!("{:#}", e));
            std::process::exit(Error::Config(e.to_string()).exit_code());
        }
    };

    init_logging(cli.verbosity(), config.logging.format);

    if cli.verbosity() >= 2 {
        eprintln!("vulnstack v{}", vulnstack::VERSION);
        if let Some(source) = &config.source {
            eprintln!("Using config file: {}", source.display());
        }
    }

    let mut ctx = CommandContext::new(&cli, config);

    let command: &dyn Runnable = match &cli.command {
        Commands::Plan(args) => args,
        Commands::Apply(args) => args,
        Commands::Destroy(args) => args,
        Commands::Output(args) => args,
        Commands::Graph(args) => args,
        Commands::Validate(args) => args,
        Commands::Verify(args) => args,
    };

    let exit_code = match command.run(&mut ctx).await {
        Ok(code) => code,
        Err(e) => {
            ctx.output.error(&format!("{:#}", e));
            if let Some(Error::DestructiveChangeNotConfirmed(_) | Error::TruncateNotConfirmed(_)) =
                e.downcast_ref::<Error>()
            {
                ctx.output
                    .hint("run from a terminal to confirm, or pass --auto-approve");
            }
            e.downcast_ref::<Error>().map_or(1, Error::exit_code)
        }
    };

    ctx.output.flush();
    std::process::exit(exit_code);
}

/// Initialize logging based on verbosity level; `RUST_LOG` wins when set.
fn init_logging(verbosity: u8, format: LogFormat) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    let registry = tracing_subscriber::registry().with(env_filter);
    match format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init(),
        LogFormat::Text => registry
            .with(
                fmt::layer()
                    .with_target(verbosity >= 3)
                    .with_writer(std::io::stderr),
            )
            .init(),
    }
}
