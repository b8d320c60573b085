//! Server configuration, loaded from environment variables at startup.
//!
//! Every field has a default so the server works out-of-the-box. Boolean
//! variables accept `true`, `1`, `yes` or `on` (case-insensitive) as true;
//! anything else is false. `Config::validate` collects every problem into a
//! single message instead of stopping at the first.

use std::path::PathBuf;
use std::time::Duration;

/// Port range accepted for listener configuration.
const MIN_PORT: u32 = 1;
const MAX_PORT: u32 = 65535;

/// Runtime configuration for taskflow-server.
#[derive(Debug, Clone)]
pub struct Config {
    /// Port for the task API listener, including the streaming endpoints
    /// (`GRPC_PORT`, default `"8080"`; the variable name is inherited wire
    /// contract, the listener speaks HTTP).
    pub rpc_port: String,

    /// Port for the ops/mirror listener: `/health`, `/metrics` and the JSON
    /// mirror of the unary task routes (`HTTP_PORT`, default `"8090"`).
    pub http_port: String,

    /// Verbose developer mode: pretty logs at debug level (`ENABLE_DEBUG`).
    pub enable_debug: bool,

    /// Per-request deadline in seconds for unary endpoints; streams run
    /// until one side closes (`SERVER_TIMEOUT`, default 30, range 1..=300).
    pub server_timeout: u64,

    /// Cap on concurrently served requests (`MAX_CONNECTIONS`, default 1000).
    pub max_connections: u32,

    /// `tracing` filter level: debug, info, warn or error (`LOG_LEVEL`).
    pub log_level: String,

    /// SQLite database file (`DB_PATH`, default `<home>/.taskflow/taskflow.db`).
    pub db_path: PathBuf,
    pub db_max_open_conns: u32,
    pub db_max_idle_conns: u32,
    /// Connection max lifetime in seconds (`DB_CONN_MAX_LIFETIME`).
    pub db_conn_max_lifetime: u64,

    /// Expose greeter statistics (`ENABLE_STATS`).
    pub enable_stats: bool,
    /// Recognized collaborator flag; `/metrics` is served regardless
    /// (`METRICS_ENABLED`).
    pub enable_metrics: bool,
    /// Upper bound on names per batch greeting (`MAX_GREETINGS`, default 100).
    pub max_greetings: usize,

    /// Serve Swagger UI on the API listener (`ENABLE_SWAGGER`, default on).
    pub enable_swagger: bool,

    /// When set, API requests must carry `Authorization: Bearer <token>`
    /// (`AUTH_TOKEN`).
    pub auth_token: Option<String>,

    /// Token-bucket refill rate per client (`RATE_LIMIT_RPS`, default 100).
    pub rate_limit_rps: f64,
    /// Token-bucket burst size per client (`RATE_LIMIT_BURST`, default 200).
    pub rate_limit_burst: u32,

    /// Comma-separated CORS origin allow-list (`CORS_ORIGINS`); unset means
    /// wildcard, suitable for development only.
    pub cors_allowed_origins: Option<String>,
}

impl Config {
    /// Build [`Config`] from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self {
            rpc_port: env_or("GRPC_PORT", "8080"),
            http_port: env_or("HTTP_PORT", "8090"),
            enable_debug: env_bool("ENABLE_DEBUG"),
            server_timeout: parse_env("SERVER_TIMEOUT", 30),
            max_connections: parse_env("MAX_CONNECTIONS", 1000),
            log_level: env_or("LOG_LEVEL", "info"),
            db_path: std::env::var("DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| default_db_path()),
            db_max_open_conns: parse_env("DB_MAX_OPEN_CONNS", 25),
            db_max_idle_conns: parse_env("DB_MAX_IDLE_CONNS", 5),
            db_conn_max_lifetime: parse_env("DB_CONN_MAX_LIFETIME", 300),
            enable_stats: env_bool("ENABLE_STATS"),
            enable_metrics: env_bool("METRICS_ENABLED"),
            max_greetings: parse_env("MAX_GREETINGS", 100),
            enable_swagger: std::env::var("ENABLE_SWAGGER")
                .map(|v| is_truthy(&v))
                .unwrap_or(true),
            auth_token: std::env::var("AUTH_TOKEN").ok().filter(|t| !t.is_empty()),
            rate_limit_rps: parse_env("RATE_LIMIT_RPS", 100.0),
            rate_limit_burst: parse_env("RATE_LIMIT_BURST", 200),
            cors_allowed_origins: std::env::var("CORS_ORIGINS").ok(),
        }
    }

    /// Validate the configuration, collecting every failure.
    pub fn validate(&self) -> Result<(), String> {
        let mut errs = Vec::new();

        if let Err(e) = validate_port(&self.rpc_port, "GRPC_PORT") {
            errs.push(e);
        }
        if let Err(e) = validate_port(&self.http_port, "HTTP_PORT") {
            errs.push(e);
        }
        if self.server_timeout == 0 || self.server_timeout > 300 {
            errs.push(format!(
                "SERVER_TIMEOUT must be between 1 and 300 seconds, got {}",
                self.server_timeout
            ));
        }
        if self.max_connections == 0 || self.max_connections > 10000 {
            errs.push(format!(
                "MAX_CONNECTIONS must be between 1 and 10000, got {}",
                self.max_connections
            ));
        }
        if !matches!(
            self.log_level.to_ascii_lowercase().as_str(),
            "debug" | "info" | "warn" | "error"
        ) {
            errs.push(format!(
                "LOG_LEVEL must be one of [debug, info, warn, error], got {}",
                self.log_level
            ));
        }
        if self.db_max_open_conns == 0 {
            errs.push("DB_MAX_OPEN_CONNS must be greater than 0".to_owned());
        }
        if self.db_max_idle_conns > self.db_max_open_conns {
            errs.push(format!(
                "DB_MAX_IDLE_CONNS ({}) cannot exceed DB_MAX_OPEN_CONNS ({})",
                self.db_max_idle_conns, self.db_max_open_conns
            ));
        }
        if self.max_greetings == 0 {
            errs.push("MAX_GREETINGS must be greater than 0".to_owned());
        }
        if self.rate_limit_rps <= 0.0 {
            errs.push(format!(
                "RATE_LIMIT_RPS must be greater than 0, got {}",
                self.rate_limit_rps
            ));
        }

        if errs.is_empty() {
            Ok(())
        } else {
            Err(format!(
                "configuration validation failed: {}",
                errs.join("; ")
            ))
        }
    }

    /// Bind address of the task API listener.
    pub fn rpc_addr(&self) -> String {
        format!("0.0.0.0:{}", self.rpc_port)
    }

    /// Bind address of the ops/mirror listener.
    pub fn http_addr(&self) -> String {
        format!("0.0.0.0:{}", self.http_port)
    }

    /// Per-request deadline for unary endpoints.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server_timeout)
    }

    pub fn db_conn_max_lifetime(&self) -> Duration {
        Duration::from_secs(self.db_conn_max_lifetime)
    }
}

impl Default for Config {
    fn default() -> Self {
        // Defaults without consulting the environment; used by tests.
        Self {
            rpc_port: "8080".to_owned(),
            http_port: "8090".to_owned(),
            enable_debug: false,
            server_timeout: 30,
            max_connections: 1000,
            log_level: "info".to_owned(),
            db_path: default_db_path(),
            db_max_open_conns: 25,
            db_max_idle_conns: 5,
            db_conn_max_lifetime: 300,
            enable_stats: false,
            enable_metrics: false,
            max_greetings: 100,
            enable_swagger: true,
            auth_token: None,
            rate_limit_rps: 100.0,
            rate_limit_burst: 200,
            cors_allowed_origins: None,
        }
    }
}

/// `<home>/.taskflow/taskflow.db`, falling back to the working directory
/// when no home directory can be determined.
fn default_db_path() -> PathBuf {
    let home = std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    home.join(".taskflow").join("taskflow.db")
}

// ── private helpers ──────────────────────────────────────────────────────────

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_owned())
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str) -> bool {
    std::env::var(key).map(|v| is_truthy(&v)).unwrap_or(false)
}

fn is_truthy(v: &str) -> bool {
    matches!(v.to_ascii_lowercase().as_str(), "true" | "1" | "yes" | "on")
}

fn validate_port(port: &str, name: &str) -> Result<(), String> {
    if port.is_empty() {
        return Err(format!("{name} cannot be empty"));
    }
    match port.parse::<u32>() {
        Err(_) => Err(format!("{name} must be a valid number, got {port}")),
        Ok(p) if !(MIN_PORT..=MAX_PORT).contains(&p) => Err(format!(
            "{name} must be between {MIN_PORT} and {MAX_PORT}, got {p}"
        )),
        Ok(_) => Ok(()),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn truthy_values() {
        for v in ["true", "TRUE", "1", "yes", "Yes", "on", "ON"] {
            assert!(is_truthy(v), "{v} should parse as true");
        }
        for v in ["false", "0", "no", "off", "", "2", "enabled"] {
            assert!(!is_truthy(v), "{v} should parse as false");
        }
    }

    #[test]
    fn port_validation() {
        assert!(validate_port("8080", "P").is_ok());
        assert!(validate_port("1", "P").is_ok());
        assert!(validate_port("65535", "P").is_ok());
        assert!(validate_port("0", "P").is_err());
        assert!(validate_port("65536", "P").is_err());
        assert!(validate_port("", "P").is_err());
        assert!(validate_port("abc", "P").is_err());
    }

    #[test]
    fn default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn validation_collects_all_failures() {
        let cfg = Config {
            rpc_port: "0".to_owned(),
            server_timeout: 0,
            log_level: "loud".to_owned(),
            ..Config::default()
        };
        let msg = cfg.validate().unwrap_err();
        assert!(msg.contains("GRPC_PORT"));
        assert!(msg.contains("SERVER_TIMEOUT"));
        assert!(msg.contains("LOG_LEVEL"));
    }
}
