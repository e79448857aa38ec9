use std::{
    fs::{self, OpenOptions},
    path::Path,
    sync::Arc,
};

use amxc_core::{CompilerService, Config, GlobalOptions};
use clap::Parser;
use color_eyre::{eyre::WrapErr, Result};
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Layer};

mod cli;
mod dispatch;
mod output;
mod style;

use cli::AmxcCli;

fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = AmxcCli::parse();
    let log_file = Config::log_file_from_env().wrap_err("failed to resolve AMXC_LOG_FILE")?;
    init_tracing(cli.trace, cli.verbose, cli.quiet, log_file.as_deref())?;

    let global = GlobalOptions {
        quiet: cli.quiet,
        verbose: cli.verbose,
        trace: cli.trace,
        json: cli.json,
    };

    let config = Config::from_env().wrap_err("failed to resolve configuration")?;
    config
        .ensure_dirs()
        .wrap_err("failed to create the uploads and output directories")?;
    let service = CompilerService::new(config);

    let outcome = dispatch::dispatch_command(&service, &cli.command)?;
    let code = output::emit_output(&global, cli.no_color, &outcome)?;

    if code == 0 {
        Ok(())
    } else {
        std::process::exit(code);
    }
}

fn init_tracing(trace: bool, verbose: u8, quiet: bool, log_file: Option<&Path>) -> Result<()> {
    let level = if trace {
        "trace"
    } else if quiet {
        "error"
    } else {
        match verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    };
    // The log file keeps at least the job history, whatever the console shows.
    let file_level = if trace || verbose >= 2 { level } else { "info" };

    let console = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_level(true)
        .with_filter(crate_filter(level));
    let file = match log_file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)
                    .wrap_err_with(|| format!("failed to create {}", parent.display()))?;
            }
            let handle = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .wrap_err_with(|| format!("failed to open log file {}", path.display()))?;
            Some(
                fmt::layer()
                    .with_writer(Arc::new(handle))
                    .with_ansi(false)
                    .with_target(false)
                    .with_filter(crate_filter(file_level)),
            )
        }
        None => None,
    };

    let subscriber = tracing_subscriber::registry().with(console).with(file);
    let _ = tracing::subscriber::set_global_default(subscriber);
    Ok(())
}

fn crate_filter(level: &str) -> EnvFilter {
    EnvFilter::new(format!(
        "amxc_cli={level},amxc_core={level},amxc_domain={level}"
    ))
}
