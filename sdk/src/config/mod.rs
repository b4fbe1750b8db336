//! Configuration presets for the Weft engine
//!
//! This module provides configuration for orchestration and transactions,
//! with sensible defaults, presets for common deployments, and loading from
//! environment variables at startup.

use std::str::FromStr;

/// Environment variable naming the service (required)
pub const ENV_SERVICE_NAME: &str = "WEFT_SERVICE_NAME";
/// Environment variable overriding [`OrchestratorConfig::executor_cache_capacity`]
pub const ENV_EXECUTOR_CACHE_CAPACITY: &str = "WEFT_EXECUTOR_CACHE_CAPACITY";
/// Environment variable overriding [`OrchestratorConfig::max_concurrent_executions`]
pub const ENV_MAX_CONCURRENT_EXECUTIONS: &str = "WEFT_MAX_CONCURRENT_EXECUTIONS";
/// Environment variable overriding [`TransactionConfig::max_retries`]
pub const ENV_TRANSACTION_MAX_RETRIES: &str = "WEFT_TRANSACTION_MAX_RETRIES";

/// Configuration for the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorConfig {
    /// Maximum number of warm executors kept between batches (0 disables caching)
    pub executor_cache_capacity: usize,
    /// Maximum number of executions orchestrated concurrently within a batch
    pub max_concurrent_executions: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl OrchestratorConfig {
    /// Default configuration suitable for most use cases
    pub const DEFAULT: Self = Self {
        executor_cache_capacity: 256,
        max_concurrent_executions: 16,
    };

    /// High-throughput configuration for busy workers
    pub const HIGH_THROUGHPUT: Self = Self {
        executor_cache_capacity: 4096,
        max_concurrent_executions: 128,
    };

    /// Low-resource configuration for constrained environments
    pub const LOW_RESOURCE: Self = Self {
        executor_cache_capacity: 16,
        max_concurrent_executions: 2,
    };

    /// Create a new configuration with validation
    pub fn new(
        executor_cache_capacity: usize,
        max_concurrent_executions: usize,
    ) -> Result<Self, ConfigError> {
        if max_concurrent_executions == 0 {
            return Err(ConfigError::InvalidValue(
                "max_concurrent_executions must be positive".to_string(),
            ));
        }

        Ok(Self {
            executor_cache_capacity,
            max_concurrent_executions,
        })
    }
}

/// Configuration for locally executed transactions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionConfig {
    /// Times a transaction is re-run after a version conflict at commit
    pub max_retries: u32,
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl TransactionConfig {
    pub const DEFAULT: Self = Self { max_retries: 3 };

    /// Fail on the first conflict
    pub const NO_RETRY: Self = Self { max_retries: 0 };
}

/// Complete engine configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Name reported in logs
    pub service_name: String,
    pub orchestrator: OrchestratorConfig,
    pub transaction: TransactionConfig,
}

impl EngineConfig {
    /// Create a configuration with default settings
    pub fn new(service_name: impl Into<String>) -> Result<Self, ConfigError> {
        let service_name = service_name.into();
        if service_name.trim().is_empty() {
            return Err(ConfigError::InvalidValue(
                "service_name must not be empty".to_string(),
            ));
        }
        Ok(Self {
            service_name,
            orchestrator: OrchestratorConfig::DEFAULT,
            transaction: TransactionConfig::DEFAULT,
        })
    }

    /// Load from process environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load from an arbitrary variable source.
    ///
    /// `WEFT_SERVICE_NAME` is required; every other variable falls back to
    /// its default when absent.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let service_name =
            lookup(ENV_SERVICE_NAME).ok_or(ConfigError::Missing(ENV_SERVICE_NAME))?;
        let mut config = Self::new(service_name)?;

        let orchestrator = OrchestratorConfig::new(
            parse_or(&lookup, ENV_EXECUTOR_CACHE_CAPACITY, config.orchestrator.executor_cache_capacity)?,
            parse_or(&lookup, ENV_MAX_CONCURRENT_EXECUTIONS, config.orchestrator.max_concurrent_executions)?,
        )?;
        config.orchestrator = orchestrator;
        config.transaction.max_retries =
            parse_or(&lookup, ENV_TRANSACTION_MAX_RETRIES, config.transaction.max_retries)?;

        Ok(config)
    }

    /// Set orchestrator configuration
    pub fn with_orchestrator(mut self, config: OrchestratorConfig) -> Self {
        self.orchestrator = config;
        self
    }

    /// Set transaction configuration
    pub fn with_transaction(mut self, config: TransactionConfig) -> Self {
        self.transaction = config;
        self
    }
}

fn parse_or<F, T>(lookup: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(name) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| {
            ConfigError::InvalidValue(format!("{} must be a non-negative integer, got '{}'", name, raw))
        }),
    }
}

/// Configuration error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// A required variable is not set
    #[error("Missing required configuration: {0}")]
    Missing(&'static str),

    /// Invalid configuration value
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}
