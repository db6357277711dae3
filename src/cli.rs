use std::sync::Arc;

use clap::{Parser, Subcommand};

use crate::adapters::PgDatastore;
use crate::config::Config;
use crate::services::{expiry, ReservationService, RetryPolicy};

#[derive(Parser)]
#[command(name = "ticketbooth")]
#[command(about = "Ticketbooth - ticket reservation and checkout service", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP server (default)
    Serve,

    /// Database management commands
    #[command(subcommand)]
    Db(DbCommands),

    /// Order maintenance commands
    #[command(subcommand)]
    Orders(OrderCommands),

    /// Print the effective configuration
    Config,
}

#[derive(Subcommand)]
pub enum DbCommands {
    /// Run database migrations
    Migrate,
}

#[derive(Subcommand)]
pub enum OrderCommands {
    /// Cancel checkouts whose payment window has passed and release their tickets
    Expire,
}

pub async fn handle_db_migrate(config: &Config) -> anyhow::Result<()> {
    let pool = crate::db::create_pool(config).await?;

    tracing::info!("Running database migrations...");
    crate::db::run_migrations(&pool).await?;
    println!("✓ Database migrations completed");

    Ok(())
}

pub async fn handle_orders_expire(config: &Config) -> anyhow::Result<()> {
    let pool = crate::db::create_pool(config).await?;
    let store = Arc::new(PgDatastore::new(pool, config.store_timeout()));
    let retry = RetryPolicy {
        max_attempts: config.store_retry_attempts,
        base_delay: std::time::Duration::from_millis(config.store_retry_base_ms),
    };
    let service = ReservationService::new(store, config.checkout_ttl(), retry);

    let cancelled = expiry::sweep(&service, config.expiry_batch_size).await?;
    println!("✓ Cancelled {} expired checkout(s)", cancelled);

    Ok(())
}

pub fn handle_config_show(config: &Config) -> anyhow::Result<()> {
    println!("Configuration:");
    println!("  Server Port: {}", config.server_port);
    println!("  Database URL: {}", mask_password(&config.database_url));
    println!("  Database Max Connections: {}", config.database_max_connections);
    println!("  Webhook Allowed IPs: {:?}", config.webhook_allowed_ips);
    println!("  Trusted Proxy Depth: {}", config.trusted_proxy_depth);
    println!("  Checkout TTL: {}s", config.checkout_ttl_secs);
    println!("  Store Timeout: {}ms", config.store_timeout_ms);
    println!(
        "  Store Retries: {} (base {}ms)",
        config.store_retry_attempts, config.store_retry_base_ms
    );
    println!(
        "  Expiry Sweep: every {}s, batch {}",
        config.expiry_sweep_interval_secs, config.expiry_batch_size
    );
    println!("  Max Line Quantity: {}", config.max_line_quantity);
    println!("  Log Format: {:?}", config.log_format);

    println!("✓ Configuration is valid");
    Ok(())
}

fn mask_password(url: &str) -> String {
    let Some(at_pos) = url.rfind('@') else {
        return url.to_string();
    };
    let Some(scheme_end) = url[..at_pos].find("://").map(|i| i + 3) else {
        return url.to_string();
    };
    match url[scheme_end..at_pos].find(':') {
        Some(colon) => format!(
            "{}:****{}",
            &url[..scheme_end + colon],
            &url[at_pos..]
        ),
        None => url.to_string(),
    }
}
