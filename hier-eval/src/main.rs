//! hier-eval CLI - WER/CER evaluation of hierarchical attention models

use clap::Parser;
use eyre::Result;
use hier_eval::cli::{Cli, run};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Decoding log written next to the model.
const LOG_FILE: &str = "decode.log";

fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();

    let (stderr, _stderr_guard) = tracing_appender::non_blocking(std::io::stderr());
    // missing model directories are reported by the command itself
    let (file, _file_guard) = RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix(LOG_FILE)
        .build(&cli.model_path)
        .map(tracing_appender::non_blocking)
        .ok()
        .unzip();

    // the decode log also keeps the per-utterance table
    let filter = |default: &str| EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(stderr).with_filter(filter("info")))
        .with(file.map(|file| {
            fmt::layer()
                .with_ansi(false)
                .with_writer(file)
                .with_filter(filter("info,hier_eval=debug"))
        }))
        .init();

    run(cli)
}
