use anyhow::Context;
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use swarmcron_core::config::{LogConfig, SwarmcronConfig};
use swarmcron_docker::{DockerClient, Orchestrator};
use swarmcron_jobs::{EventListener, JobRunner, Reconciler, TriggerService};
use swarmcron_scheduler::{ScheduleRegistry, SchedulerEngine};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod app;
mod cli;
mod http;

const CRATES: [&str; 5] = [
    "swarmcron",
    "swarmcron_core",
    "swarmcron_docker",
    "swarmcron_scheduler",
    "swarmcron_jobs",
];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = cli::Cli::parse();

    // load config: --config / SWARMCRON_CONFIG > ./swarmcron.toml, then env, then flags
    let mut config = SwarmcronConfig::load(cli.config.as_deref())?;
    cli.apply(&mut config);
    config.validate()?;

    init_tracing(&config.log)?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        git_sha = env!("SWARMCRON_GIT_SHA"),
        "starting swarmcron"
    );

    let event_timeout = config.event_timeout()?;
    let poll_interval = config.poll_interval()?;
    let timezone = config.timezone()?;

    let docker = DockerClient::new(&config.docker.host, config.docker.registry_auth.clone())?;
    let engine_version = docker
        .ping()
        .await
        .with_context(|| format!("cannot reach docker at {}", docker.endpoint()))?;
    info!(host = %docker.endpoint(), version = %engine_version, "connected to docker");
    let orchestrator: Arc<dyn Orchestrator> = Arc::new(docker);

    // shutdown: watch for the loops, token for in-flight waits
    let shutdown = CancellationToken::new();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let engine = Arc::new(SchedulerEngine::with_timezone(timezone));
    let registry = Arc::new(ScheduleRegistry::new(Arc::clone(&engine)));
    let runner = Arc::new(JobRunner::new(
        Arc::clone(&orchestrator),
        poll_interval,
        event_timeout,
        shutdown.clone(),
    ));
    let reconciler = Arc::new(Reconciler::new(
        Arc::clone(&orchestrator),
        Arc::clone(&registry),
        Arc::clone(&runner),
    ));

    let scheduled = reconciler.reconcile_all().await?;
    info!(jobs = scheduled, "scheduled services loaded");

    let scheduler = tokio::spawn(engine.run(shutdown_rx.clone()));

    let addr: SocketAddr = format!("{}:{}", config.event.bind, config.event.port).parse()?;
    let trigger = Arc::new(TriggerService::new(Arc::clone(&registry), runner));
    let state = Arc::new(app::AppState::new(config, registry, trigger, shutdown.clone()));
    let router = app::build_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "event endpoint listening");
    let mut server_stop = shutdown_rx.clone();
    let server = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = server_stop.wait_for(|stop| *stop).await;
            })
            .await
    });

    let mut events = tokio::spawn(EventListener::new(orchestrator, reconciler).run(shutdown_rx));

    let fatal = tokio::select! {
        _ = shutdown_signal() => None,
        res = &mut events => Some(res),
    };

    info!("shutting down");
    let _ = shutdown_tx.send(true);
    shutdown.cancel();

    if let Err(e) = server.await? {
        error!(error = %e, "http server failed");
    }
    scheduler.await?;

    match fatal {
        Some(res) => {
            res?.context("event listener failed")?;
            Ok(())
        }
        None => {
            events.await??;
            info!("swarmcron stopped");
            Ok(())
        }
    }
}

fn init_tracing(log: &LogConfig) -> anyhow::Result<()> {
    // RUST_LOG wins; otherwise the configured level for our crates only.
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => {
            let directives: Vec<String> = CRATES
                .iter()
                .map(|c| format!("{c}={}", log.level))
                .chain(["tower_http=info".to_string()])
                .collect();
            EnvFilter::try_new(format!("warn,{}", directives.join(",")))
                .with_context(|| format!("invalid log level {:?}", log.level))?
        }
    };

    let registry = tracing_subscriber::registry().with(filter);
    if log.json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "cannot listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C"),
        _ = terminate => info!("received SIGTERM"),
    }
}
