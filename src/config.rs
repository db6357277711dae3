use dotenvy::dotenv;
use ipnet::IpNet;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Source addresses allowed to call the payment webhook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllowedIps {
    Any,
    Cidrs(Vec<IpNet>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "pretty" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => anyhow::bail!("LOG_FORMAT must be 'text' or 'json', got '{}'", other),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub server_port: u16,
    pub database_url: String,
    pub database_max_connections: u32,
    pub payment_webhook_secret: String,
    pub webhook_allowed_ips: AllowedIps,
    pub trusted_proxy_depth: usize,
    pub checkout_ttl_secs: i64,
    pub store_timeout_ms: u64,
    pub store_retry_attempts: u32,
    pub store_retry_base_ms: u64,
    pub expiry_sweep_interval_secs: u64,
    pub expiry_batch_size: i64,
    pub max_line_quantity: i32,
    pub log_format: LogFormat,
    pub log_request_body: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_port: 3000,
            database_url: "postgres://localhost:5432/ticketbooth".to_string(),
            database_max_connections: 10,
            payment_webhook_secret: String::new(),
            webhook_allowed_ips: AllowedIps::Any,
            trusted_proxy_depth: 0,
            checkout_ttl_secs: 900,
            store_timeout_ms: 5_000,
            store_retry_attempts: 3,
            store_retry_base_ms: 50,
            expiry_sweep_interval_secs: 30,
            expiry_batch_size: 100,
            max_line_quantity: 20,
            log_format: LogFormat::Text,
            log_request_body: false,
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv().ok(); // Load .env file if present

        let defaults = Config::default();
        let config = Config {
            server_port: parse_or("SERVER_PORT", defaults.server_port)?,
            database_url: required("DATABASE_URL")?,
            database_max_connections: parse_or(
                "DATABASE_MAX_CONNECTIONS",
                defaults.database_max_connections,
            )?,
            payment_webhook_secret: required("PAYMENT_WEBHOOK_SECRET")?,
            webhook_allowed_ips: parse_allowed_ips(
                &env::var("WEBHOOK_ALLOWED_IPS").unwrap_or_else(|_| "*".to_string()),
            )?,
            trusted_proxy_depth: parse_or("TRUSTED_PROXY_DEPTH", defaults.trusted_proxy_depth)?,
            checkout_ttl_secs: parse_or("CHECKOUT_TTL_SECS", defaults.checkout_ttl_secs)?,
            store_timeout_ms: parse_or("STORE_TIMEOUT_MS", defaults.store_timeout_ms)?,
            store_retry_attempts: parse_or("STORE_RETRY_ATTEMPTS", defaults.store_retry_attempts)?,
            store_retry_base_ms: parse_or("STORE_RETRY_BASE_MS", defaults.store_retry_base_ms)?,
            expiry_sweep_interval_secs: parse_or(
                "EXPIRY_SWEEP_INTERVAL_SECS",
                defaults.expiry_sweep_interval_secs,
            )?,
            expiry_batch_size: parse_or("EXPIRY_BATCH_SIZE", defaults.expiry_batch_size)?,
            max_line_quantity: parse_or("MAX_LINE_QUANTITY", defaults.max_line_quantity)?,
            log_format: parse_or("LOG_FORMAT", defaults.log_format)?,
            log_request_body: parse_or("LOG_REQUEST_BODY", defaults.log_request_body)?,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.payment_webhook_secret.trim().is_empty() {
            anyhow::bail!("PAYMENT_WEBHOOK_SECRET must not be empty");
        }
        if self.checkout_ttl_secs <= 0 {
            anyhow::bail!("CHECKOUT_TTL_SECS must be positive");
        }
        if self.store_retry_attempts == 0 {
            anyhow::bail!("STORE_RETRY_ATTEMPTS must be at least 1");
        }
        if self.expiry_sweep_interval_secs == 0 {
            anyhow::bail!("EXPIRY_SWEEP_INTERVAL_SECS must be positive");
        }
        if self.expiry_batch_size <= 0 {
            anyhow::bail!("EXPIRY_BATCH_SIZE must be positive");
        }
        if self.max_line_quantity <= 0 {
            anyhow::bail!("MAX_LINE_QUANTITY must be positive");
        }
        Ok(())
    }

    pub fn checkout_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.checkout_ttl_secs)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    pub fn expiry_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.expiry_sweep_interval_secs)
    }
}

fn required(key: &str) -> anyhow::Result<String> {
    env::var(key).map_err(|_| anyhow::anyhow!("{} must be set", key))
}

fn parse_or<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid {}: {}", key, e)),
        _ => Ok(default),
    }
}

pub fn parse_allowed_ips(raw: &str) -> anyhow::Result<AllowedIps> {
    let value = raw.trim();
    if value == "*" {
        return Ok(AllowedIps::Any);
    }

    let cidrs = value
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(str::parse::<IpNet>)
        .collect::<Result<Vec<_>, _>>()?;

    if cidrs.is_empty() {
        anyhow::bail!("WEBHOOK_ALLOWED_IPS must be '*' or a comma-separated list of CIDRs");
    }

    Ok(AllowedIps::Cidrs(cidrs))
}
