//! `ft` - tail every text file under a directory.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use foldertail::{Config, Tailer, DEFAULT_MAX_LINE_BYTES};

#[derive(Debug, Parser)]
#[command(
    name = "ft",
    about = "Tail every text file under a directory tree",
    version,
    after_help = "Patterns are globs by default. Use --re or a re: prefix for regex.\n\
                  Examples:\n  ft ./*.log\n  ft /var/log '*.log'\n  ft --re /var/log '.*\\.log$'"
)]
struct Cli {
    /// Root directory (if it exists), followed by include patterns.
    #[arg(value_name = "ROOT | PATTERN")]
    args: Vec<String>,

    /// Number of last lines to show per file on startup (0 = start at end).
    #[arg(short = 'n', default_value_t = 10)]
    lines: usize,

    /// Read existing files from the beginning.
    #[arg(long)]
    from_start: bool,

    /// Periodic rescan interval in seconds (0 disables).
    #[arg(long, value_name = "SECS", default_value_t = 5.0)]
    scan_interval: f64,

    /// Show absolute paths.
    #[arg(long)]
    absolute: bool,

    /// Include patterns, comma separated.
    #[arg(long, value_delimiter = ',')]
    include: Vec<String>,

    /// Exclude patterns, comma separated.
    #[arg(long, value_delimiter = ',')]
    exclude: Vec<String>,

    /// Treat patterns as regular expressions.
    #[arg(long = "re", visible_alias = "regex")]
    force_regex: bool,

    /// Only tail files directly inside the root.
    #[arg(long)]
    no_recursive: bool,

    /// Maximum bytes per line before truncation.
    #[arg(long, default_value_t = DEFAULT_MAX_LINE_BYTES)]
    max_line_bytes: usize,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    fn into_config(self) -> Config {
        let mut args = self.args.into_iter().peekable();
        let root = match args.peek() {
            Some(first) if PathBuf::from(first).is_dir() => args.next().map(PathBuf::from),
            _ => None,
        }
        .unwrap_or_else(|| PathBuf::from("."));

        let mut include = self.include;
        include.extend(args);

        Config {
            root,
            lines: self.lines,
            from_start: self.from_start,
            scan_interval: Duration::try_from_secs_f64(self.scan_interval.max(0.0))
                .unwrap_or(Duration::ZERO),
            absolute: self.absolute,
            include,
            exclude: self.exclude,
            force_regex: self.force_regex,
            recursive: !self.no_recursive,
            max_line_bytes: self.max_line_bytes,
            ..Config::default()
        }
    }
}

fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let tailer = match Tailer::new(cli.into_config()) {
        Ok(tailer) => tailer,
        Err(err) => {
            eprintln!("ft: {err}");
            return ExitCode::FAILURE;
        }
    };

    let shutdown = CancellationToken::new();
    let mut handle = match tailer.start(shutdown.clone()).await {
        Ok(handle) => handle,
        Err(err) => {
            eprintln!("ft: {err}");
            return ExitCode::FAILURE;
        }
    };

    // Errors are already logged by the engine; keep the queue drained.
    if let Some(mut errors) = handle.take_errors() {
        tokio::spawn(async move { while errors.recv().await.is_some() {} });
    }

    let ctrl_c = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    let Some(mut lines) = handle.take_lines() else {
        return ExitCode::FAILURE;
    };
    // A partial line is printed only once it is complete.
    while let Some(line) = lines.recv().await {
        if !line.is_partial() {
            println!("{}: {}", line.path(), line.text());
        }
    }

    handle.stopped().await;
    tracing::info!(dropped = lines.dropped(), "stopped");
    ExitCode::SUCCESS
}
