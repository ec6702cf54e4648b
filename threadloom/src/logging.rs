// Logging setup for threadloom
//
// The pool itself only emits `tracing` events and spans; it never installs a
// subscriber. Binaries, demos and tests that want to see those events call
// one of the initializers below once at startup.
//
// # Usage Examples
//
// ```rust
// use threadloom::logging;
//
// // INFO level, human-readable console output
// logging::init_default();
//
// // Or pick the settings explicitly
// let config = logging::LogConfig {
//     level: tracing::Level::DEBUG,
//     target_filters: Some("threadloom::events=info".to_string()),
//     ..Default::default()
// };
// logging::init(config);
// ```
//
// Worker threads run inside a `worker` span carrying the pool id and the
// worker name, so thread names are usually redundant in the output; they
// are still on by default because they survive log aggregation better.

use std::fs::OpenOptions;
use std::io;
use std::path::Path;
use std::sync::Once;

use tracing::{Level, Subscriber};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Subscriber settings for [`init`] and [`init_with_file`]
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Floor for every target not named in `target_filters`
    pub level: Level,
    /// Emit one JSON object per event
    pub json_format: bool,
    /// Source file and line of each event
    pub show_file_line: bool,
    /// Thread name and id; worker names carry the pool prefix
    pub show_thread_info: bool,
    pub show_time: bool,
    /// Extra directives, e.g. `"threadloom::worker=trace,threadloom::events=warn"`
    pub target_filters: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            json_format: false,
            show_file_line: true,
            show_thread_info: true,
            show_time: true,
            target_filters: None,
        }
    }
}

static INIT: Once = Once::new();

fn env_filter(config: &LogConfig) -> EnvFilter {
    let mut filter = EnvFilter::from_default_env().add_directive(config.level.into());
    if let Some(filters) = &config.target_filters {
        for directive in filters.split(',') {
            match directive.trim().parse() {
                Ok(directive) => filter = filter.add_directive(directive),
                Err(e) => eprintln!("Ignoring invalid log filter {:?}: {}", directive, e),
            }
        }
    }
    filter
}

/// Initialize logging with the given configuration
///
/// Safe to call more than once; only the first call takes effect.
pub fn init(config: LogConfig) {
    INIT.call_once(|| {
        let registry = tracing_subscriber::registry().with(env_filter(&config));

        let fmt_layer = fmt::layer()
            .with_ansi(atty::is(atty::Stream::Stdout))
            .with_file(config.show_file_line)
            .with_line_number(config.show_file_line)
            .with_thread_names(config.show_thread_info)
            .with_thread_ids(config.show_thread_info);

        let subscriber: Box<dyn Subscriber + Send + Sync> = if config.json_format {
            Box::new(
                registry.with(
                    fmt::layer()
                        .json()
                        .flatten_event(true)
                        .with_thread_names(config.show_thread_info),
                ),
            )
        } else if config.show_time {
            Box::new(registry.with(fmt_layer))
        } else {
            Box::new(registry.with(fmt_layer.without_time()))
        };

        set_global_subscriber(subscriber);
    });
}

/// Initialize logging to both the console and an append-only file
///
/// The file is opened up front so a bad path is reported to the caller.
/// File output never carries ANSI colors.
pub fn init_with_file(config: LogConfig, log_file: impl AsRef<Path>) -> io::Result<()> {
    let log_file = log_file.as_ref().to_path_buf();
    let file = OpenOptions::new().create(true).append(true).open(&log_file)?;

    INIT.call_once(move || {
        let console_layer = fmt::layer()
            .with_ansi(atty::is(atty::Stream::Stdout))
            .with_file(config.show_file_line)
            .with_line_number(config.show_file_line)
            .with_thread_names(config.show_thread_info)
            .with_thread_ids(config.show_thread_info);

        let file_layer = fmt::layer()
            .with_ansi(false)
            .with_writer(move || -> Box<dyn io::Write + Send + Sync> {
                match file.try_clone() {
                    Ok(handle) => Box::new(handle),
                    Err(_) => Box::new(io::stderr()),
                }
            })
            .with_file(true)
            .with_line_number(true)
            .with_thread_names(true)
            .with_thread_ids(true);

        let subscriber = tracing_subscriber::registry()
            .with(env_filter(&config))
            .with(console_layer)
            .with(file_layer);

        set_global_subscriber(subscriber);
    });

    Ok(())
}

/// INFO level, human-readable console output
pub fn init_default() {
    init(LogConfig::default());
}

/// DEBUG level with TRACE for worker internals
pub fn init_development() {
    init(LogConfig {
        level: Level::DEBUG,
        target_filters: Some("threadloom=debug,threadloom::worker=trace".to_string()),
        ..Default::default()
    });
}

/// JSON output without file/line information
pub fn init_production() {
    init(LogConfig {
        level: Level::INFO,
        json_format: true,
        show_file_line: false,
        show_thread_info: true,
        show_time: true,
        target_filters: None,
    });
}

/// Warnings and errors only, compact output for test runs
pub fn init_test() {
    init(LogConfig {
        level: Level::WARN,
        json_format: false,
        show_file_line: true,
        show_thread_info: false,
        show_time: false,
        target_filters: None,
    });
}

fn set_global_subscriber<S>(subscriber: S)
where
    S: Subscriber + Send + Sync + 'static,
{
    if let Err(err) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Error setting global tracing subscriber: {}", err);
    }
}
