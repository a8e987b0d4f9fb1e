use clap::Parser;
use std::path::Path;
use std::process::ExitCode;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod cli;
mod commands;
mod jobfile;

// Use mimalloc only on x86_64 to avoid cross-compilation issues
#[cfg(target_arch = "x86_64")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let args = cli::Corun::parse();
    let _guard = init_tracing(&args.verbosity, args.log_dir.as_deref())?;

    let succeeded = commands::handle_commands(&args.config, args.command).await?;
    Ok(if succeeded {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Console logging to stderr, plus a daily-rotated file when `log_dir` is set.
///
/// `RUST_LOG` wins over the verbosity flags.
fn init_tracing(
    verbosity: &clap_verbosity_flag::Verbosity,
    log_dir: Option<&Path>,
) -> anyhow::Result<Option<WorkerGuard>> {
    let level = verbosity.tracing_level_filter();
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::default().add_directive(level.into()));

    let console_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let (file_layer, guard) = match log_dir {
        Some(log_dir) => {
            std::fs::create_dir_all(log_dir)?;
            let file_appender = tracing_appender::rolling::RollingFileAppender::builder()
                .rotation(tracing_appender::rolling::Rotation::DAILY)
                .filename_prefix("corun")
                .filename_suffix("log")
                .max_log_files(7)
                .build(log_dir)?;
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(non_blocking);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    Ok(guard)
}
