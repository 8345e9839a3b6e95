mod config;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use herald_core::pacing::PacingConfig;
use herald_core::rate_limit::RateLimitConfig;
use herald_events::{
    AudienceResolver, ChangeFeed, DispatcherConfig, EmailChannel, EmailRenderer, EmailTransport,
    EventBus, HttpTransport, HttpTransportConfig, NotificationDispatcher, NotificationRouter,
    PgEventListener, PgStore, RenderConfig, ReminderScheduler, SmtpConfig, SmtpTransport,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use config::WorkerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = WorkerConfig::from_env()?;

    // --- Tracing ---
    init_tracing(config.json_logs);
    tracing::info!(
        event_channel = %config.event_channel,
        reminder_interval_secs = config.reminder_interval.as_secs(),
        "Loaded worker configuration"
    );

    // --- Database ---
    let pool = herald_db::create_pool(&config.database_url)
        .await
        .context("Failed to connect to database")?;
    tracing::info!("Database connection pool created");

    herald_db::health_check(&pool)
        .await
        .context("Database health check failed")?;

    herald_db::run_migrations(&pool)
        .await
        .context("Failed to run database migrations")?;
    tracing::info!("Database migrations applied");

    // --- Storage ---
    let feed = ChangeFeed::default();
    let store = Arc::new(PgStore::new(pool.clone(), feed));

    // --- Email ---
    let email = email_transport()?.map(|transport| {
        let limits = RateLimitConfig::from_env();
        tracing::info!(
            per_minute = limits.per_minute,
            per_hour = limits.per_hour,
            "Email relay enabled"
        );
        Arc::new(EmailChannel::new(
            transport,
            store.clone(),
            EmailRenderer::new(RenderConfig::from_env()),
            limits,
            PacingConfig::from_env(),
        ))
    });

    // --- Dispatcher ---
    let dispatcher = Arc::new(NotificationDispatcher::new(
        AudienceResolver::new(store.clone()),
        store.clone(),
        email,
        DispatcherConfig::from_env(),
    ));

    // --- Event bus ---
    let event_bus = Arc::new(EventBus::default());

    // Spawn notification router (platform events -> dispatches).
    let router = NotificationRouter::new(Arc::clone(&dispatcher));
    let router_handle = tokio::spawn(router.run(event_bus.subscribe()));

    let cancel = CancellationToken::new();

    // Spawn reminder scheduler.
    let scheduler = ReminderScheduler::new(store.clone(), Arc::clone(&dispatcher))
        .with_interval(config.reminder_interval);
    let scheduler_cancel = cancel.clone();
    let scheduler_handle = tokio::spawn(async move {
        scheduler.run(scheduler_cancel).await;
    });

    // Spawn LISTEN bridge (NOTIFY payloads -> event bus).
    let listener = PgEventListener::new(
        pool.clone(),
        config.event_channel.clone(),
        Arc::clone(&event_bus),
    );
    let listener_cancel = cancel.clone();
    let listener_handle = tokio::spawn(async move {
        if let Err(e) = listener.run(listener_cancel).await {
            tracing::error!(error = %e, "Event listener stopped");
        }
    });

    tracing::info!("Worker started (event listener, notification router, reminder scheduler)");

    shutdown_signal().await;

    // --- Shutdown ---
    cancel.cancel();
    join_with_timeout("event listener", listener_handle, config.shutdown_timeout).await;
    join_with_timeout("reminder scheduler", scheduler_handle, config.shutdown_timeout).await;

    // Dropping the last bus handle closes the channel and stops the router.
    drop(event_bus);
    join_with_timeout("notification router", router_handle, config.shutdown_timeout).await;

    pool.close().await;
    tracing::info!("Graceful shutdown complete");
    Ok(())
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "herald_worker=debug,herald_events=debug".into());

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// SMTP when `SMTP_HOST` is set, otherwise the HTTP API when
/// `EMAIL_API_URL` is set, otherwise no email relay.
fn email_transport() -> anyhow::Result<Option<Arc<dyn EmailTransport>>> {
    if let Some(smtp) = SmtpConfig::from_env() {
        tracing::info!(host = %smtp.smtp_host, port = smtp.smtp_port, "Using SMTP email transport");
        let transport = SmtpTransport::new(&smtp).context("Invalid SMTP configuration")?;
        return Ok(Some(Arc::new(transport)));
    }

    if let Some(http) = HttpTransportConfig::from_env() {
        tracing::info!(url = %http.api_url, "Using HTTP email transport");
        let transport = HttpTransport::new(http).context("Failed to build HTTP email client")?;
        return Ok(Some(Arc::new(transport)));
    }

    tracing::warn!("Neither SMTP_HOST nor EMAIL_API_URL is set, email relay disabled");
    Ok(None)
}

async fn join_with_timeout(name: &str, handle: JoinHandle<()>, timeout: Duration) {
    match tokio::time::timeout(timeout, handle).await {
        Ok(Ok(())) => tracing::info!(task = name, "Stopped"),
        Ok(Err(e)) => tracing::error!(task = name, error = %e, "Task panicked"),
        Err(_) => tracing::warn!(task = name, "Did not stop in time"),
    }
}

/// Wait for SIGINT or (on Unix) SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
