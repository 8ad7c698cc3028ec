use sqlx::postgres::PgConnectOptions;
use std::time::Duration;

/// Extra time the server-side `statement_timeout` gets over the gateway
/// deadline, so the gateway's own timer normally fires first.
const SERVER_TIMEOUT_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub sandbox: SandboxConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_body_size_mb: usize,
    /// Origins allowed to call the API from a browser; empty allows any.
    pub cors_origins: Vec<String>,
}

impl ServerConfig {
    pub fn max_body_bytes(&self) -> usize {
        self.max_body_size_mb * 1024 * 1024
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5000,
            max_body_size_mb: 1,
            cors_origins: Vec::new(),
        }
    }
}

/// Connection settings for the sandbox database.
///
/// `database_url` wins over the individual connection fields when set.
#[derive(Clone)]
pub struct SandboxConfig {
    pub database_url: Option<String>,
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: Option<String>,
    pub max_connections: u32,
    pub query_timeout: Duration,
    /// `None` waits for a free connection indefinitely.
    pub acquire_timeout: Option<Duration>,
    pub idle_timeout: Duration,
    /// Open sessions with `default_transaction_read_only = on`.
    pub read_only: bool,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            host: "localhost".to_string(),
            port: 5432,
            database: "sandbox".to_string(),
            username: "postgres".to_string(),
            password: None,
            max_connections: 20,
            query_timeout: Duration::from_secs(10),
            acquire_timeout: Some(Duration::from_secs(2)),
            idle_timeout: Duration::from_secs(30),
            read_only: true,
        }
    }
}

// Hand-written so credentials never reach the logs.
impl std::fmt::Debug for SandboxConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SandboxConfig")
            .field("database_url", &self.database_url.as_ref().map(|_| "<redacted>"))
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("max_connections", &self.max_connections)
            .field("query_timeout", &self.query_timeout)
            .field("acquire_timeout", &self.acquire_timeout)
            .field("idle_timeout", &self.idle_timeout)
            .field("read_only", &self.read_only)
            .finish()
    }
}

impl SandboxConfig {
    /// Options for connections that run user statements.
    pub fn connect_options(&self) -> Result<PgConnectOptions, sqlx::Error> {
        let statement_timeout = (self.query_timeout + SERVER_TIMEOUT_GRACE).as_millis();

        let mut session = vec![("statement_timeout", statement_timeout.to_string())];
        if self.read_only {
            session.push(("default_transaction_read_only", "on".to_string()));
        }

        Ok(self.base_options()?.options(session))
    }

    /// Options for the writable connection used to seed the sandbox.
    pub fn admin_connect_options(&self) -> Result<PgConnectOptions, sqlx::Error> {
        self.base_options()
    }

    fn base_options(&self) -> Result<PgConnectOptions, sqlx::Error> {
        if let Some(url) = &self.database_url {
            return url.parse();
        }

        let mut options = PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .database(&self.database)
            .username(&self.username)
            .application_name("querygate");

        if let Some(password) = &self.password {
            options = options.password(password);
        }

        Ok(options)
    }
}
