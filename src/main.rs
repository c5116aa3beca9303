use std::{process, sync::Arc};

use chartforge::{
    application::{
        background::BackgroundTasks,
        chart::{
            AdmissionScheduler, ArtifactFinalizer, CacheIndex, ChartCollaborators, ChartService,
            RendererSupervisor, SchedulerConfig, spawn_chart_job,
        },
        error::AppError,
    },
    config,
    domain::{CallerIdentity, ChartRequest},
    infra::{
        datapacks::FsDatapackStore,
        db::PostgresRepositories,
        error::InfraError,
        history::FsHistoryStore,
        http::{self, HttpState},
        retention::JsonRetentionIndex,
        telemetry,
    },
};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Render(args) => run_render(settings, args).await,
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let background = BackgroundTasks::new();
    let service = build_chart_service(&settings, background.clone()).await?;

    let result = serve_http(&settings, HttpState { service }).await;

    background.drain(settings.server.graceful_shutdown).await;

    result
}

async fn run_render(settings: config::Settings, args: config::RenderArgs) -> Result<(), AppError> {
    let raw = tokio::fs::read(&args.request)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    let request: ChartRequest = serde_json::from_slice(&raw)
        .map_err(|err| AppError::validation(format!("invalid chart request: {err}")))?;

    let background = BackgroundTasks::new();
    let service = build_chart_service(&settings, background.clone()).await?;
    let identity = args.user.map(CallerIdentity::new);

    let mut events = spawn_chart_job(service, request, identity);
    let mut failure = None;
    while let Some(event) = events.recv().await {
        let message = event.to_message();
        let line = serde_json::to_string(&message)
            .map_err(|err| AppError::unexpected(format!("failed to encode progress: {err}")))?;
        println!("{line}");
        if event.is_terminal() {
            if let Some(error) = message.error {
                failure = Some(error);
            }
            break;
        }
    }

    background.drain(settings.server.graceful_shutdown).await;

    match failure {
        Some(error) => Err(AppError::unexpected(format!("chart generation failed: {error}"))),
        None => Ok(()),
    }
}

async fn init_repositories(
    settings: &config::Settings,
) -> Result<Arc<PostgresRepositories>, AppError> {
    let database_url = settings
        .database
        .url
        .as_ref()
        .ok_or_else(|| InfraError::configuration("database url is not configured"))
        .map_err(AppError::from)?;

    let pool = PostgresRepositories::connect(database_url, settings.database.max_connections.get())
        .await
        .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;

    PostgresRepositories::run_migrations(&pool)
        .await
        .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;

    Ok(Arc::new(PostgresRepositories::new(pool)))
}

async fn build_chart_service(
    settings: &config::Settings,
    background: BackgroundTasks,
) -> Result<Arc<ChartService>, AppError> {
    let repositories = init_repositories(settings).await?;

    let collaborators = ChartCollaborators {
        access: repositories,
        datapacks: Arc::new(FsDatapackStore::new(settings.datapacks.directory.clone())),
        retention: Arc::new(JsonRetentionIndex::new(
            settings.datapacks.retention_index.clone(),
        )),
        history: Arc::new(FsHistoryStore::new(
            settings.history.directory.clone(),
            settings.history.max_entries,
        )),
    };

    tokio::fs::create_dir_all(&settings.charts.directory)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    let cache = CacheIndex::new(
        settings.charts.directory.clone(),
        settings.charts.url_prefix.clone(),
    );
    let scheduler = AdmissionScheduler::new(SchedulerConfig {
        concurrency: settings.queue.concurrency.get(),
        max_depth: settings.queue.max_depth.get(),
        timeout: settings.queue.timeout,
    });
    let renderer = Arc::new(RendererSupervisor::new(
        settings.renderer.java_path.clone(),
        settings.renderer.jar_path.clone(),
        settings.renderer.timeout,
    ));
    let finalizer = ArtifactFinalizer::new(settings.renderer.finalize_poll_interval);

    Ok(Arc::new(ChartService::new(
        collaborators,
        cache,
        scheduler,
        renderer,
        finalizer,
        settings.renderer.finalize_timeout,
        background,
    )))
}

async fn serve_http(settings: &config::Settings, state: HttpState) -> Result<(), AppError> {
    let router = http::build_router(state);

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;

    info!(
        target = "chartforge::main",
        op = "main::serve",
        addr = %settings.server.addr,
        "Chart service listening"
    );

    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| AppError::unexpected(format!("server error: {err}")))?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(
                target = "chartforge::main",
                op = "main::shutdown",
                error = %err,
                "Failed to listen for Ctrl-C"
            );
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!(
                    target = "chartforge::main",
                    op = "main::shutdown",
                    error = %err,
                    "Failed to listen for SIGTERM"
                );
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!(
        target = "chartforge::main",
        op = "main::shutdown",
        "Shutdown signal received"
    );
}
