use std::{process, sync::Arc, time::Duration};

use fpcache::{
    application::{error::AppError, graphql::PageResolver},
    cache::{CacheConfig, CacheStore, KeyComputer, MemoryStore, Query, Resolver, VariantContext},
    config,
    infra::{app::AppContext, error::InfraError, http, memory::InMemoryPages, telemetry},
};
use serde_json::{Map, Value};
use tokio::{signal, sync::Notify, task::JoinHandle};
use tracing::{Dispatch, Level, debug, dispatcher, error, info, warn};
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

    match command {
        config::Command::Serve(_) => {
            telemetry::init(&settings.logging).map_err(AppError::from)?;
            run_serve(settings).await
        }
        config::Command::Key(args) => run_key(&settings, args),
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let cache_config = CacheConfig::from(&settings.cache);
    let app = AppContext::new(cache_config, Arc::new(InMemoryPages::seeded()));

    let sweep_handle = spawn_sweep(Arc::clone(&app.store), app.config.sweep_interval());
    let result = serve_http(&settings, &app).await;

    sweep_handle.abort();
    let _ = sweep_handle.await;

    result
}

/// Periodically drop expired entries and dangling index members.
fn spawn_sweep(store: Arc<MemoryStore>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.tick().await; // Skip the first immediate tick
        loop {
            interval.tick().await;
            match store.sweep() {
                Ok(report) if report.expired > 0 || report.pruned > 0 => {
                    info!(expired = report.expired, pruned = report.pruned, "cache sweep");
                }
                Ok(_) => debug!("cache sweep found nothing to remove"),
                Err(err) => warn!(error = %err, "cache sweep failed"),
            }
        }
    })
}

async fn serve_http(settings: &config::Settings, app: &AppContext) -> Result<(), AppError> {
    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    info!(addr = %settings.server.addr, cache_enabled = app.config.enabled, "listening");

    let shutdown = Arc::new(Notify::new());
    let server = axum::serve(listener, app.router().into_make_service()).with_graceful_shutdown({
        let shutdown = Arc::clone(&shutdown);
        async move {
            wait_for_ctrl_c().await;
            info!("shutdown requested, draining connections");
            shutdown.notify_one();
        }
    });

    let grace = settings.server.graceful_shutdown;
    tokio::select! {
        result = server.into_future() => result.map_err(|err| AppError::from(InfraError::server(err.to_string()))),
        _ = async {
            shutdown.notified().await;
            tokio::time::sleep(grace).await;
        } => {
            warn!(seconds = grace.as_secs(), "graceful shutdown timed out");
            Ok(())
        }
    }
}

async fn wait_for_ctrl_c() {
    if let Err(err) = signal::ctrl_c().await {
        error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}

fn run_key(settings: &config::Settings, args: config::KeyArgs) -> Result<(), AppError> {
    let variables = match args.variables.as_deref() {
        None => Map::new(),
        Some(raw) => serde_json::from_str::<Map<String, Value>>(raw).map_err(|err| {
            AppError::validation(format!("--variables must be a JSON object: {err}"))
        })?,
    };

    let mut context = VariantContext::new();
    for (name, value) in args.context {
        context.insert(name, value);
    }
    http::apply_store_default(&mut context, &settings.cache.variant_headers);

    let resolver = PageResolver::new(Arc::new(InMemoryPages::new()));
    let normalized = resolver.normalize(&Query::new(args.query).with_variables(variables));
    let id = KeyComputer::new().compute(&normalized, &context);

    println!("{id}");
    Ok(())
}
