//! Layered application configuration.
//!
//! Precedence, lowest to highest: compiled-in [`AppConfig::default`], an
//! optional config file, then `TASKENGINE_`-prefixed environment variables.
//! Mirrors the teacher's `ConfigLoader` shape: one sub-struct per component,
//! each with its own `validate()`.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub provider: String,
    pub api_url: String,
    pub api_key: String,
    pub model: String,
    pub timeout_secs: u64,
    pub retries: u32,
    pub backoff_base_ms: u64,
    pub mock: bool,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "mock".into(),
            api_url: String::new(),
            api_key: String::new(),
            model: "default".into(),
            timeout_secs: 30,
            retries: 3,
            backoff_base_ms: 200,
            mock: true,
        }
    }
}

impl LlmConfig {
    fn validate(&self) -> EngineResult<()> {
        if self.timeout_secs == 0 {
            return Err(EngineError::Validation {
                message: "llm.timeout_secs must be > 0".into(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub api_url: String,
    pub model: String,
    pub dimension: usize,
    pub batch_size: usize,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub timeout_secs: u64,
    pub mock: bool,
    pub concurrency: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            api_url: String::new(),
            model: "default".into(),
            dimension: 256,
            batch_size: 32,
            max_retries: 3,
            retry_delay_ms: 200,
            timeout_secs: 30,
            mock: true,
            concurrency: 4,
        }
    }
}

impl EmbeddingConfig {
    fn validate(&self) -> EngineResult<()> {
        if self.dimension == 0 {
            return Err(EngineError::Validation {
                message: "embedding.dimension must be > 0".into(),
            });
        }
        if self.batch_size == 0 {
            return Err(EngineError::Validation {
                message: "embedding.batch_size must be > 0".into(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingCacheConfig {
    pub size: usize,
    pub persistent: bool,
    pub ttl_secs: u64,
    pub cleanup_interval_secs: u64,
    pub max_age_days: u64,
}

impl Default for EmbeddingCacheConfig {
    fn default() -> Self {
        Self {
            size: 10_000,
            persistent: true,
            ttl_secs: 7 * 24 * 3600,
            cleanup_interval_secs: 300,
            max_age_days: 30,
        }
    }
}

impl EmbeddingCacheConfig {
    fn validate(&self) -> EngineResult<()> {
        if self.size == 0 {
            return Err(EngineError::Validation {
                message: "embedding_cache.size must be > 0".into(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    pub default_max_chars: usize,
    pub default_per_section_max: usize,
    pub default_strategy: String,
    pub semantic_default_k: usize,
    pub semantic_min_similarity: f64,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            default_max_chars: 8_000,
            default_per_section_max: 2_000,
            default_strategy: "sentence".into(),
            semantic_default_k: 5,
            semantic_min_similarity: 0.2,
        }
    }
}

impl ContextConfig {
    fn validate(&self) -> EngineResult<()> {
        if self.default_per_section_max > self.default_max_chars {
            return Err(EngineError::Validation {
                message: "context.default_per_section_max must be <= default_max_chars".into(),
            });
        }
        if !(0.0..=1.0).contains(&self.semantic_min_similarity) {
            return Err(EngineError::Validation {
                message: "context.semantic_min_similarity must be within [0,1]".into(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub parallelism: usize,
    pub default_strategy: String,
    pub queue_buffer: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            parallelism: num_cpus::get().max(1),
            default_strategy: "dag".into(),
            queue_buffer: 4,
        }
    }
}

impl SchedulerConfig {
    fn validate(&self) -> EngineResult<()> {
        if self.parallelism == 0 {
            return Err(EngineError::Validation {
                message: "scheduler.parallelism must be > 0".into(),
            });
        }
        if !["bfs", "dag", "postorder"].contains(&self.default_strategy.as_str()) {
            return Err(EngineError::Validation {
                message: format!("unknown scheduler strategy '{}'", self.default_strategy),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationConfig {
    pub quality_threshold: f64,
    pub max_iterations: u32,
    pub mode: String,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            quality_threshold: 0.8,
            max_iterations: 3,
            mode: "llm".into(),
        }
    }
}

impl EvaluationConfig {
    fn validate(&self) -> EngineResult<()> {
        if !(0.0..=1.0).contains(&self.quality_threshold) {
            return Err(EngineError::Validation {
                message: "evaluation.quality_threshold must be within [0,1]".into(),
            });
        }
        if !["llm", "multi_expert", "adversarial"].contains(&self.mode.as_str()) {
            return Err(EngineError::Validation {
                message: format!("unknown evaluation mode '{}'", self.mode),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsConfig {
    pub heartbeat_interval_secs: u64,
    pub subscriber_buffer: usize,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: 15,
            subscriber_buffer: 256,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "pretty".into(),
        }
    }
}

impl LoggingConfig {
    fn validate(&self) -> EngineResult<()> {
        if !["pretty", "json"].contains(&self.format.as_str()) {
            return Err(EngineError::Validation {
                message: format!("unknown logging format '{}'", self.format),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1".into(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub embedding_cache: EmbeddingCacheConfig,
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub evaluation: EvaluationConfig,
    #[serde(default)]
    pub jobs: JobsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database_path: String,
}

impl AppConfig {
    pub fn validate(&self) -> EngineResult<()> {
        self.llm.validate()?;
        self.embedding.validate()?;
        self.embedding_cache.validate()?;
        self.context.validate()?;
        self.scheduler.validate()?;
        self.evaluation.validate()?;
        self.logging.validate()?;
        Ok(())
    }
}

/// Loads [`AppConfig`] from compiled-in defaults, an optional file, then env
/// vars prefixed `TASKENGINE_` (double-underscore separated, e.g.
/// `TASKENGINE_EVALUATION__QUALITY_THRESHOLD`).
pub struct ConfigLoader;

impl ConfigLoader {
    pub fn load(file: Option<&Path>) -> EngineResult<AppConfig> {
        let defaults = serde_json::to_value(AppConfig::default())
            .map_err(|e| EngineError::Configuration { message: e.to_string() })?;

        let mut builder = config::Config::builder()
            .add_source(config::Config::try_from(&defaults).map_err(EngineError::from)?);

        if let Some(path) = file {
            builder = builder.add_source(config::File::from(path));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("TASKENGINE")
                .separator("__")
                .try_parsing(true),
        );

        let raw = builder.build()?;
        let cfg: AppConfig = raw.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn load_from_str(yaml: &str) -> EngineResult<AppConfig> {
        let cfg: AppConfig = serde_yaml::from_str(yaml).map_err(|e| EngineError::Configuration {
            message: e.to_string(),
        })?;
        cfg.validate()?;
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid_and_mocked() {
        let cfg = AppConfig::default();
        assert!(cfg.validate().is_ok());
        assert!(cfg.llm.mock);
        assert!(cfg.embedding.mock);
    }

    #[test]
    fn invalid_threshold_rejected() {
        let mut cfg = AppConfig::default();
        cfg.evaluation.quality_threshold = 1.4;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn invalid_strategy_rejected() {
        let mut cfg = AppConfig::default();
        cfg.scheduler.default_strategy = "bogus".into();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn load_from_str_round_trips_overrides() {
        let yaml = "evaluation:\n  quality_threshold: 0.9\n  max_iterations: 5\n  mode: llm\n";
        let cfg = ConfigLoader::load_from_str(yaml).unwrap();
        assert_eq!(cfg.evaluation.quality_threshold, 0.9);
        assert_eq!(cfg.evaluation.max_iterations, 5);
    }
}
