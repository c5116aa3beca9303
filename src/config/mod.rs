//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{
    net::SocketAddr,
    num::{NonZeroU32, NonZeroUsize},
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use uuid::Uuid;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "chartforge";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 8;
const DEFAULT_JAVA_PATH: &str = "java";
const DEFAULT_JAR_PATH: &str = "assets/jars/timescale.jar";
const DEFAULT_RENDER_TIMEOUT_SECS: u64 = 30;
const DEFAULT_FINALIZE_TIMEOUT_SECS: u64 = 30;
const DEFAULT_FINALIZE_POLL_MS: u64 = 300;
const DEFAULT_CHARTS_DIR: &str = "public/charts";
const DEFAULT_CHARTS_URL_PREFIX: &str = "/public/charts";
const DEFAULT_DATAPACKS_DIR: &str = "public/datapacks";
const DEFAULT_RETENTION_INDEX: &str = "public/file-metadata.json";
const DEFAULT_QUEUE_CONCURRENCY: u64 = 2;
const DEFAULT_QUEUE_MAX_DEPTH: u64 = 30;
const DEFAULT_QUEUE_TIMEOUT_SECS: u64 = 120;
const DEFAULT_HISTORY_DIR: &str = "uploads/history";
const DEFAULT_HISTORY_MAX_ENTRIES: u64 = 10;

/// Command-line arguments for the chartforge binary.
#[derive(Debug, Parser)]
#[command(name = "chartforge", version, about = "Chart generation service")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(
        long = "config-file",
        env = "CHARTFORGE_CONFIG_FILE",
        value_name = "PATH"
    )]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the chart HTTP service.
    Serve(Box<ServeArgs>),
    /// Generate a single chart from a request file and print the progress events.
    Render(RenderArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Clone)]
pub struct RenderArgs {
    #[command(flatten)]
    pub pipeline: PipelineOverrides,

    /// JSON chart request to generate.
    #[arg(value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub request: PathBuf,

    /// Generate on behalf of this user uuid.
    #[arg(long = "user", value_name = "UUID")]
    pub user: Option<Uuid>,
}

/// Overrides shared by every command that runs the chart pipeline.
#[derive(Debug, Args, Default, Clone)]
pub struct PipelineOverrides {
    /// Override the database connection URL.
    #[arg(long = "database-url", value_name = "URL")]
    pub database_url: Option<String>,

    /// Override the Java executable used to run the renderer.
    #[arg(long = "renderer-java-path", value_name = "PATH")]
    pub renderer_java_path: Option<PathBuf>,

    /// Override the renderer jar.
    #[arg(long = "renderer-jar-path", value_name = "PATH")]
    pub renderer_jar_path: Option<PathBuf>,

    /// Override the renderer execution timeout.
    #[arg(long = "renderer-timeout-seconds", value_name = "SECONDS")]
    pub renderer_timeout_seconds: Option<u64>,

    /// Override the chart cache directory.
    #[arg(long = "charts-directory", value_name = "PATH")]
    pub charts_directory: Option<PathBuf>,

    /// Override the datapack root directory.
    #[arg(long = "datapacks-directory", value_name = "PATH")]
    pub datapacks_directory: Option<PathBuf>,

    /// Override the render concurrency.
    #[arg(long = "queue-concurrency", value_name = "COUNT")]
    pub queue_concurrency: Option<u64>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    #[command(flatten)]
    pub pipeline: PipelineOverrides,

    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the graceful shutdown timeout.
    #[arg(long = "server-graceful-shutdown-seconds", value_name = "SECONDS")]
    pub server_graceful_shutdown_seconds: Option<u64>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Override the maximum number of running plus waiting renders.
    #[arg(long = "queue-max-depth", value_name = "COUNT")]
    pub queue_max_depth: Option<u64>,

    /// Override the queue timeout; zero disables it.
    #[arg(long = "queue-timeout-seconds", value_name = "SECONDS")]
    pub queue_timeout_seconds: Option<u64>,
}

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub database: DatabaseSettings,
    pub renderer: RendererSettings,
    pub charts: ChartsSettings,
    pub datapacks: DatapackSettings,
    pub queue: QueueSettings,
    pub history: HistorySettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub graceful_shutdown: Duration,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub url: Option<String>,
    pub max_connections: NonZeroU32,
}

#[derive(Debug, Clone)]
pub struct RendererSettings {
    pub java_path: PathBuf,
    pub jar_path: PathBuf,
    pub timeout: Duration,
    pub finalize_timeout: Duration,
    pub finalize_poll_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct ChartsSettings {
    pub directory: PathBuf,
    pub url_prefix: String,
}

#[derive(Debug, Clone)]
pub struct DatapackSettings {
    pub directory: PathBuf,
    pub retention_index: PathBuf,
}

#[derive(Debug, Clone)]
pub struct QueueSettings {
    pub concurrency: NonZeroUsize,
    pub max_depth: NonZeroUsize,
    /// `None` when the queue timeout is disabled.
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct HistorySettings {
    pub directory: PathBuf,
    pub max_entries: NonZeroUsize,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix("CHARTFORGE").separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Render(args)) => raw.apply_pipeline_overrides(&args.pipeline),
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    database: RawDatabaseSettings,
    renderer: RawRendererSettings,
    charts: RawChartsSettings,
    datapacks: RawDatapackSettings,
    queue: RawQueueSettings,
    history: RawHistorySettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(seconds) = overrides.server_graceful_shutdown_seconds {
            self.server.graceful_shutdown_seconds = Some(seconds);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(depth) = overrides.queue_max_depth {
            self.queue.max_depth = Some(depth);
        }
        if let Some(seconds) = overrides.queue_timeout_seconds {
            self.queue.timeout_seconds = Some(seconds);
        }
        self.apply_pipeline_overrides(&overrides.pipeline);
    }

    fn apply_pipeline_overrides(&mut self, overrides: &PipelineOverrides) {
        if let Some(url) = overrides.database_url.as_ref() {
            self.database.url = Some(url.clone());
        }
        if let Some(path) = overrides.renderer_java_path.as_ref() {
            self.renderer.java_path = Some(path.clone());
        }
        if let Some(path) = overrides.renderer_jar_path.as_ref() {
            self.renderer.jar_path = Some(path.clone());
        }
        if let Some(seconds) = overrides.renderer_timeout_seconds {
            self.renderer.timeout_seconds = Some(seconds);
        }
        if let Some(directory) = overrides.charts_directory.as_ref() {
            self.charts.directory = Some(directory.clone());
        }
        if let Some(directory) = overrides.datapacks_directory.as_ref() {
            self.datapacks.directory = Some(directory.clone());
        }
        if let Some(concurrency) = overrides.queue_concurrency {
            self.queue.concurrency = Some(concurrency);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            database,
            renderer,
            charts,
            datapacks,
            queue,
            history,
        } = raw;

        Ok(Self {
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
            database: build_database_settings(database)?,
            renderer: build_renderer_settings(renderer)?,
            charts: build_charts_settings(charts)?,
            datapacks: build_datapack_settings(datapacks)?,
            queue: build_queue_settings(queue)?,
            history: build_history_settings(history)?,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());
    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }
    let addr =
        parse_socket_addr(&host, port).map_err(|reason| LoadError::invalid("server.addr", reason))?;

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);
    let graceful_shutdown = non_zero_seconds(graceful_secs, "server.graceful_shutdown_seconds")?;

    Ok(ServerSettings {
        addr,
        graceful_shutdown,
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };
    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_database_settings(database: RawDatabaseSettings) -> Result<DatabaseSettings, LoadError> {
    let url = database.url.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    });
    let max_connections = database
        .max_connections
        .unwrap_or(DEFAULT_DB_MAX_CONNECTIONS);

    Ok(DatabaseSettings {
        url,
        max_connections: non_zero_u32(max_connections.into(), "database.max_connections")?,
    })
}

fn build_renderer_settings(renderer: RawRendererSettings) -> Result<RendererSettings, LoadError> {
    let java_path = non_empty_path(
        renderer.java_path,
        DEFAULT_JAVA_PATH,
        "renderer.java_path",
    )?;
    let jar_path = non_empty_path(renderer.jar_path, DEFAULT_JAR_PATH, "renderer.jar_path")?;
    let timeout = non_zero_seconds(
        renderer
            .timeout_seconds
            .unwrap_or(DEFAULT_RENDER_TIMEOUT_SECS),
        "renderer.timeout_seconds",
    )?;
    let finalize_timeout = non_zero_seconds(
        renderer
            .finalize_timeout_seconds
            .unwrap_or(DEFAULT_FINALIZE_TIMEOUT_SECS),
        "renderer.finalize_timeout_seconds",
    )?;
    let poll_ms = renderer.finalize_poll_ms.unwrap_or(DEFAULT_FINALIZE_POLL_MS);
    if poll_ms == 0 {
        return Err(LoadError::invalid(
            "renderer.finalize_poll_ms",
            "must be greater than zero",
        ));
    }

    Ok(RendererSettings {
        java_path,
        jar_path,
        timeout,
        finalize_timeout,
        finalize_poll_interval: Duration::from_millis(poll_ms),
    })
}

fn build_charts_settings(charts: RawChartsSettings) -> Result<ChartsSettings, LoadError> {
    let directory = non_empty_path(charts.directory, DEFAULT_CHARTS_DIR, "charts.directory")?;
    let url_prefix = charts
        .url_prefix
        .unwrap_or_else(|| DEFAULT_CHARTS_URL_PREFIX.to_string());
    if !url_prefix.starts_with('/') {
        return Err(LoadError::invalid(
            "charts.url_prefix",
            "must start with `/`",
        ));
    }

    Ok(ChartsSettings {
        directory,
        url_prefix,
    })
}

fn build_datapack_settings(datapacks: RawDatapackSettings) -> Result<DatapackSettings, LoadError> {
    Ok(DatapackSettings {
        directory: non_empty_path(
            datapacks.directory,
            DEFAULT_DATAPACKS_DIR,
            "datapacks.directory",
        )?,
        retention_index: non_empty_path(
            datapacks.retention_index,
            DEFAULT_RETENTION_INDEX,
            "datapacks.retention_index",
        )?,
    })
}

fn build_queue_settings(queue: RawQueueSettings) -> Result<QueueSettings, LoadError> {
    let concurrency = non_zero_usize(
        queue.concurrency.unwrap_or(DEFAULT_QUEUE_CONCURRENCY),
        "queue.concurrency",
    )?;
    let max_depth = non_zero_usize(
        queue.max_depth.unwrap_or(DEFAULT_QUEUE_MAX_DEPTH),
        "queue.max_depth",
    )?;
    let timeout = match queue.timeout_seconds.unwrap_or(DEFAULT_QUEUE_TIMEOUT_SECS) {
        0 => None,
        seconds => Some(Duration::from_secs(seconds)),
    };

    Ok(QueueSettings {
        concurrency,
        max_depth,
        timeout,
    })
}

fn build_history_settings(history: RawHistorySettings) -> Result<HistorySettings, LoadError> {
    Ok(HistorySettings {
        directory: non_empty_path(history.directory, DEFAULT_HISTORY_DIR, "history.directory")?,
        max_entries: non_zero_usize(
            history.max_entries.unwrap_or(DEFAULT_HISTORY_MAX_ENTRIES),
            "history.max_entries",
        )?,
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawDatabaseSettings {
    url: Option<String>,
    max_connections: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRendererSettings {
    java_path: Option<PathBuf>,
    jar_path: Option<PathBuf>,
    timeout_seconds: Option<u64>,
    finalize_timeout_seconds: Option<u64>,
    finalize_poll_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawChartsSettings {
    directory: Option<PathBuf>,
    url_prefix: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawDatapackSettings {
    directory: Option<PathBuf>,
    retention_index: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawQueueSettings {
    concurrency: Option<u64>,
    max_depth: Option<u64>,
    timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawHistorySettings {
    directory: Option<PathBuf>,
    max_entries: Option<u64>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn non_empty_path(
    value: Option<PathBuf>,
    default: &str,
    key: &'static str,
) -> Result<PathBuf, LoadError> {
    let path = value.unwrap_or_else(|| PathBuf::from(default));
    if path.as_os_str().is_empty() {
        return Err(LoadError::invalid(key, "path must not be empty"));
    }
    Ok(path)
}

fn non_zero_seconds(value: u64, key: &'static str) -> Result<Duration, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    Ok(Duration::from_secs(value))
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;
    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

fn non_zero_usize(value: u64, key: &'static str) -> Result<NonZeroUsize, LoadError> {
    let value_usize: usize = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for usize"))?;
    NonZeroUsize::new(value_usize)
        .ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

#[cfg(test)]
mod tests;
