use super::*;

#[test]
fn defaults_match_deployment_layout() {
    let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");

    assert_eq!(settings.server.addr.port(), DEFAULT_PORT);
    assert_eq!(settings.server.graceful_shutdown, Duration::from_secs(30));
    assert!(settings.database.url.is_none());
    assert_eq!(settings.database.max_connections.get(), 8);
    assert_eq!(settings.renderer.java_path, PathBuf::from("java"));
    assert_eq!(
        settings.renderer.jar_path,
        PathBuf::from("assets/jars/timescale.jar")
    );
    assert_eq!(settings.renderer.timeout, Duration::from_secs(30));
    assert_eq!(
        settings.renderer.finalize_poll_interval,
        Duration::from_millis(300)
    );
    assert_eq!(settings.charts.url_prefix, "/public/charts");
    assert_eq!(settings.queue.concurrency.get(), 2);
    assert_eq!(settings.queue.max_depth.get(), 30);
    assert_eq!(settings.queue.timeout, Some(Duration::from_secs(120)));
    assert_eq!(settings.history.max_entries.get(), 10);
}

#[test]
fn cli_overrides_take_highest_precedence() {
    let mut raw = RawSettings::default();
    raw.server.port = Some(4000);
    raw.logging.level = Some("info".to_string());
    raw.queue.concurrency = Some(8);

    let overrides = ServeOverrides {
        server_port: Some(4321),
        log_level: Some("debug".to_string()),
        pipeline: PipelineOverrides {
            queue_concurrency: Some(3),
            ..Default::default()
        },
        ..Default::default()
    };

    raw.apply_serve_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(settings.server.addr.port(), 4321);
    assert_eq!(settings.logging.level, LevelFilter::DEBUG);
    assert_eq!(settings.queue.concurrency.get(), 3);
}

#[test]
fn zero_queue_timeout_disables_it() {
    let mut raw = RawSettings::default();
    raw.apply_serve_overrides(&ServeOverrides {
        queue_timeout_seconds: Some(0),
        ..Default::default()
    });

    let settings = Settings::from_raw(raw).expect("valid settings");
    assert!(settings.queue.timeout.is_none());
}

#[test]
fn zero_counts_are_rejected() {
    let mut raw = RawSettings::default();
    raw.queue.max_depth = Some(0);

    let err = Settings::from_raw(raw).expect_err("zero depth must fail");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "queue.max_depth",
            ..
        }
    ));
}

#[test]
fn empty_paths_are_rejected() {
    let mut raw = RawSettings::default();
    raw.renderer.jar_path = Some(PathBuf::new());

    let err = Settings::from_raw(raw).expect_err("empty jar path must fail");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "renderer.jar_path",
            ..
        }
    ));
}

#[test]
fn relative_url_prefix_is_rejected() {
    let mut raw = RawSettings::default();
    raw.charts.url_prefix = Some("charts".to_string());

    assert!(Settings::from_raw(raw).is_err());
}

#[test]
fn blank_database_url_counts_as_missing() {
    let mut raw = RawSettings::default();
    raw.database.url = Some("   ".to_string());

    let settings = Settings::from_raw(raw).expect("valid settings");
    assert!(settings.database.url.is_none());
}

#[test]
fn cli_json_logging_enforces_format() {
    let mut raw = RawSettings::default();
    let overrides = ServeOverrides {
        log_json: Some(true),
        ..Default::default()
    };

    raw.apply_serve_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert!(matches!(settings.logging.format, LogFormat::Json));
}

#[test]
fn default_to_serve_command() {
    let args = CliArgs::parse_from(["chartforge"]);
    let command = args
        .command
        .unwrap_or(Command::Serve(Box::<ServeArgs>::default()));
    assert!(matches!(command, Command::Serve(_)));
}

#[test]
fn parse_render_arguments() {
    let user = "2f1c8a56-0a0e-4b5e-8a59-3c1f0f4b9a11";
    let args = CliArgs::parse_from([
        "chartforge",
        "render",
        "--database-url",
        "postgres://example",
        "--user",
        user,
        "request.json",
    ]);

    match args.command.expect("render command") {
        Command::Render(render) => {
            assert_eq!(
                render.pipeline.database_url.as_deref(),
                Some("postgres://example")
            );
            assert_eq!(render.request, PathBuf::from("request.json"));
            assert_eq!(render.user.map(|u| u.to_string()).as_deref(), Some(user));
        }
        _ => panic!("wrong command parsed"),
    }
}
