use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ticketbooth_core::adapters::PgDatastore;
use ticketbooth_core::cli::{self, Cli, Commands, DbCommands, OrderCommands};
use ticketbooth_core::config::{Config, LogFormat};
use ticketbooth_core::services::run_expiry_sweeper;
use ticketbooth_core::{create_app, db, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Cli::parse();
    let config = Config::from_env()?;
    init_tracing(config.log_format);

    match args.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(config).await,
        Commands::Db(DbCommands::Migrate) => cli::handle_db_migrate(&config).await,
        Commands::Orders(OrderCommands::Expire) => cli::handle_orders_expire(&config).await,
        Commands::Config => cli::handle_config_show(&config),
    }
}

fn init_tracing(format: LogFormat) {
    let filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

async fn serve(config: Config) -> anyhow::Result<()> {
    let pool = db::create_pool(&config).await?;
    db::run_migrations(&pool).await?;

    let store = Arc::new(PgDatastore::new(pool, config.store_timeout()));
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    let sweep_interval = config.expiry_sweep_interval();
    let sweep_batch = config.expiry_batch_size;

    let state = AppState::new(store, config);
    tokio::spawn(run_expiry_sweeper(
        state.reservations.clone(),
        sweep_interval,
        sweep_batch,
    ));

    let app = create_app(state);
    tracing::info!("listening on {}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
