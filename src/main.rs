use actix_web::middleware::Logger;
use actix_web::{App, HttpServer, web};
use clap::Parser;
use log::info;
use std::sync::Arc;
use std::time::Duration;

use querygate::backend::{ConnectionPool, PgSandbox};
use querygate::config::{Config, SandboxConfig, ServerConfig};
use querygate::executor::Executor;
use querygate::server::{AppState, configure_routes, cors, json_config};

#[derive(Debug, Parser)]
#[command(name = "querygate", version, about = "Read-only SQL gateway for a PostgreSQL sandbox")]
struct Cli {
    #[arg(long, env = "QUERYGATE_HOST", default_value = "127.0.0.1")]
    host: String,

    #[arg(long, env = "PORT", default_value_t = 5000)]
    port: u16,

    #[arg(long, env = "QUERYGATE_MAX_BODY_MB", default_value_t = 1)]
    max_body_mb: usize,

    /// Comma-separated browser origins allowed to call the API; unset allows any.
    #[arg(long = "cors-origin", env = "QUERYGATE_CORS_ORIGINS", value_delimiter = ',')]
    cors_origins: Vec<String>,

    /// Full connection URL; overrides the POSTGRES_* settings.
    #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
    database_url: Option<String>,

    #[arg(long, env = "POSTGRES_HOST", default_value = "localhost")]
    pg_host: String,

    #[arg(long, env = "POSTGRES_PORT", default_value_t = 5432)]
    pg_port: u16,

    #[arg(long, env = "POSTGRES_DB", default_value = "sandbox")]
    pg_database: String,

    #[arg(long, env = "POSTGRES_USER", default_value = "postgres")]
    pg_user: String,

    #[arg(long, env = "POSTGRES_PASSWORD", hide_env_values = true)]
    pg_password: Option<String>,

    #[arg(long, env = "QUERYGATE_MAX_CONNECTIONS", default_value_t = 20)]
    max_connections: u32,

    /// Per-query deadline.
    #[arg(long, env = "QUERYGATE_QUERY_TIMEOUT_MS", default_value_t = 10_000)]
    query_timeout_ms: u64,

    /// Wait limit for a free pooled connection; 0 waits indefinitely.
    #[arg(long, env = "QUERYGATE_ACQUIRE_TIMEOUT_MS", default_value_t = 2_000)]
    acquire_timeout_ms: u64,

    #[arg(long, env = "QUERYGATE_IDLE_TIMEOUT_MS", default_value_t = 30_000)]
    idle_timeout_ms: u64,

    /// Open sandbox sessions read-only.
    #[arg(
        long,
        env = "QUERYGATE_READ_ONLY",
        default_value_t = true,
        action = clap::ArgAction::Set
    )]
    read_only: bool,

    /// Do not seed the sample dataset at startup.
    #[arg(long)]
    skip_migrations: bool,
}

impl Cli {
    fn config(&self) -> Config {
        Config {
            server: ServerConfig {
                host: self.host.clone(),
                port: self.port,
                max_body_size_mb: self.max_body_mb,
                cors_origins: self.cors_origins.clone(),
            },
            sandbox: SandboxConfig {
                database_url: self.database_url.clone(),
                host: self.pg_host.clone(),
                port: self.pg_port,
                database: self.pg_database.clone(),
                username: self.pg_user.clone(),
                password: self.pg_password.clone(),
                max_connections: self.max_connections,
                query_timeout: Duration::from_millis(self.query_timeout_ms),
                acquire_timeout: (self.acquire_timeout_ms > 0)
                    .then(|| Duration::from_millis(self.acquire_timeout_ms)),
                idle_timeout: Duration::from_millis(self.idle_timeout_ms),
                read_only: self.read_only,
            },
        }
    }
}

#[cfg(feature = "migrations")]
async fn seed_sandbox(config: &SandboxConfig) -> Result<(), Box<dyn std::error::Error>> {
    let pool = sqlx::PgPool::connect_with(config.admin_connect_options()?).await?;

    info!("Applying sandbox migrations...");
    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Sandbox migrations completed");

    pool.close().await;
    Ok(())
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("querygate=info,actix_web=info"),
    )
    .init();

    let config = cli.config();
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let body_limit = config.server.max_body_bytes();
    let server_config = config.server.clone();

    #[cfg(feature = "migrations")]
    {
        if !cli.skip_migrations {
            seed_sandbox(&config.sandbox)
                .await
                .map_err(|e| std::io::Error::other(e.to_string()))?;
        }
    }

    let sandbox = Arc::new(
        PgSandbox::connect(&config.sandbox)
            .await
            .map_err(std::io::Error::other)?,
    );

    let executor = Executor::new(sandbox.clone(), config.sandbox.query_timeout)
        .with_acquire_timeout(config.sandbox.acquire_timeout);

    info!(
        "Starting querygate on {} (query deadline {:?})",
        bind_addr,
        executor.deadline()
    );

    let state = web::Data::new(AppState::new(executor));

    HttpServer::new(move || {
        App::new()
            .wrap(cors(&server_config))
            .wrap(Logger::default())
            .app_data(state.clone())
            .app_data(json_config(body_limit))
            .configure(configure_routes)
    })
    .bind(&bind_addr)?
    .run()
    .await?;

    sandbox.close().await;
    info!("Sandbox pool closed");

    Ok(())
}
