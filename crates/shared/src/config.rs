//! Application configuration management.

use serde::Deserialize;

/// Application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Database configuration.
    pub database: DatabaseConfig,
    /// Workflow engine tuning.
    #[serde(default)]
    pub workflow: WorkflowConfig,
    /// Escalation sweep configuration.
    #[serde(default)]
    pub escalation: EscalationConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Database connection URL.
    pub url: String,
    /// Maximum number of connections in the pool.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Minimum number of connections in the pool.
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    /// Apply pending migrations on server start.
    #[serde(default = "default_true")]
    pub run_migrations: bool,
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    1
}

fn default_true() -> bool {
    true
}

/// Workflow engine configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkflowConfig {
    /// How many times a transition is recomputed after losing a version race.
    #[serde(default = "default_max_conflict_retries")]
    pub max_conflict_retries: u32,
    /// Upper bound for a single store call, in milliseconds.
    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,
    /// Upper bound for a single notification call, in milliseconds.
    #[serde(default = "default_notify_timeout_ms")]
    pub notify_timeout_ms: u64,
    /// Step re-initialization on return: `restart` or `resume`.
    #[serde(default = "default_return_policy")]
    pub return_policy: String,
    /// Roles allowed to cancel or complete any request.
    #[serde(default = "default_admin_roles")]
    pub admin_roles: Vec<String>,
    /// Append policy tiers missing from caller-supplied chains.
    #[serde(default = "default_true")]
    pub augment_supplied_chains: bool,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            max_conflict_retries: default_max_conflict_retries(),
            store_timeout_ms: default_store_timeout_ms(),
            notify_timeout_ms: default_notify_timeout_ms(),
            return_policy: default_return_policy(),
            admin_roles: default_admin_roles(),
            augment_supplied_chains: true,
        }
    }
}

fn default_max_conflict_retries() -> u32 {
    5
}

fn default_store_timeout_ms() -> u64 {
    5_000
}

fn default_notify_timeout_ms() -> u64 {
    2_000
}

fn default_return_policy() -> String {
    "restart".to_string()
}

fn default_admin_roles() -> Vec<String> {
    vec!["admin".to_string()]
}

/// Escalation sweep configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct EscalationConfig {
    /// Run the periodic sweep at all.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Seconds between sweeps.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// Role that stalled steps are reassigned to when a step names no fallback.
    #[serde(default = "default_fallback_role")]
    pub fallback_role: String,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sweep_interval_secs: default_sweep_interval_secs(),
            fallback_role: default_fallback_role(),
        }
    }
}

fn default_sweep_interval_secs() -> u64 {
    300 // 5 minutes
}

fn default_fallback_role() -> String {
    "admin".to_string()
}

impl AppConfig {
    /// Loads configuration from environment and config files.
    ///
    /// Sources, later ones winning: `config/default`, `config/{RUN_MODE}`,
    /// then `FLOWGATE__SECTION__KEY` environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration cannot be loaded.
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".to_string());

        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{run_mode}")).required(false))
            .add_source(
                config::Environment::with_prefix("FLOWGATE")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("workflow.admin_roles")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}
