use std::sync::Arc;

use conveyor::catalog::Catalog;
use conveyor::config::EngineConfig;
use conveyor::engine::Engine;
use conveyor::http;
use conveyor::observer;
use conveyor::runner::builtin::{HttpRunner, MailRunner, ShellRunner, SmtpConfig, TemplateRunner};
use conveyor::runner::RunnerRegistry;
use conveyor::store::{DocumentStore, LibSqlStore};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = EngineConfig::from_env().unwrap_or_else(|e| {
        eprintln!("Error: invalid configuration: {}", e);
        std::process::exit(1);
    });

    eprintln!("⚙ Conveyor v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Worker: {}", config.worker_id);
    eprintln!("   Jobs API: http://0.0.0.0:{}/jobs", config.http_port);
    eprintln!("   Poll interval: {}s", config.poll_interval.as_secs());

    // ── Database ─────────────────────────────────────────────────────────
    let db_path = std::path::Path::new(&config.db_path);
    let store: Arc<dyn DocumentStore> = Arc::new(
        LibSqlStore::new_local(db_path).await.unwrap_or_else(|e| {
            eprintln!("Error: Failed to open database at {}: {}", config.db_path, e);
            std::process::exit(1);
        }),
    );
    eprintln!("   Database: {}", config.db_path);

    // ── Runners ──────────────────────────────────────────────────────────
    let runners = Arc::new(RunnerRegistry::new());
    runners.register(Arc::new(ShellRunner::new())).await;
    runners.register(Arc::new(TemplateRunner::new())).await;
    runners.register(Arc::new(HttpRunner::new())).await;

    // Conditionally add mail if SMTP is configured
    if let Some(smtp) = SmtpConfig::from_env() {
        eprintln!("   Mail: enabled (SMTP: {}:{})", smtp.host, smtp.port);
        runners.register(Arc::new(MailRunner::new(smtp))).await;
    } else {
        eprintln!("   Mail: disabled (SMTP_HOST not set)");
    }

    if let Some(dir) = &config.runner_dir {
        match runners.load_dir(dir).await {
            Ok(loaded) => eprintln!("   Runner definitions: {} loaded from {}", loaded, dir.display()),
            Err(e) => eprintln!("   Warning: Could not load runner dir {}: {}", dir.display(), e),
        }
    }
    eprintln!("   Runners: {}\n", runners.list().await.join(", "));

    // ── Engine ───────────────────────────────────────────────────────────
    let catalog = Catalog::new(Arc::clone(&store));
    let engine = Arc::new(Engine::new(
        config.clone(),
        Arc::clone(&store),
        catalog,
        Arc::clone(&runners),
    ));

    // Spawn Axum server for job submission
    let app = http::router(Arc::clone(&store));
    let http_port = config.http_port;
    tokio::spawn(async move {
        let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", http_port))
            .await
            .expect("Failed to bind jobs API port");
        tracing::info!(port = http_port, "Job submission server started");
        axum::serve(listener, app).await.ok();
    });

    // Spawn the poll loop
    let _poll_handle = observer::spawn_poll_loop(
        Arc::clone(&engine),
        Arc::clone(&store),
        config.poll_interval,
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");
    Ok(())
}
