use std::env;
use std::time::Duration;

use crate::orchestrator::OrchestratorSettings;

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub cors_allowed_origins: Vec<String>,
    /// Upper bound on each record store call made by an operation.
    pub mutation_timeout_ms: u64,
    /// Default page size for the operations and audit listings.
    pub recent_operations_limit: usize,
    pub registry_capacity: usize,
    pub snapshot_capacity: usize,
    pub strict_audit: bool,
}

fn parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Self {
        let database_url = env::var("DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://registrar.db?mode=rwc".to_string());

        Self {
            database_url,
            port: parsed("PORT", 8000),
            cors_allowed_origins: env::var("CORS_ALLOWED_ORIGINS")
                .ok()
                .map(|s| {
                    s.split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or_else(Vec::new),
            mutation_timeout_ms: parsed("MUTATION_TIMEOUT_MS", 5000),
            recent_operations_limit: parsed("RECENT_OPERATIONS_LIMIT", 20),
            registry_capacity: parsed("REGISTRY_CAPACITY", 500),
            snapshot_capacity: parsed("SNAPSHOT_CAPACITY", 500),
            strict_audit: parsed("STRICT_AUDIT", false),
        }
    }

    pub fn orchestrator_settings(&self) -> OrchestratorSettings {
        OrchestratorSettings {
            mutation_timeout: Duration::from_millis(self.mutation_timeout_ms),
            strict_audit: self.strict_audit,
            registry_capacity: self.registry_capacity,
            snapshot_capacity: self.snapshot_capacity,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: "sqlite::memory:".to_string(),
            port: 8000,
            cors_allowed_origins: Vec::new(),
            mutation_timeout_ms: 5000,
            recent_operations_limit: 20,
            registry_capacity: 500,
            snapshot_capacity: 500,
            strict_audit: false,
        }
    }
}
