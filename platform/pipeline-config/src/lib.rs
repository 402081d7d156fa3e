//! # Pipeline Configuration
//!
//! Environment-driven configuration shared by every stage binary and
//! the CLI. Loading is fail-fast: *all* missing or malformed variables
//! are collected into a single error so an operator fixes them in one
//! pass instead of one restart at a time.
//!
//! Stage-specific requirements (LLM keys for the extractor, a database
//! URL for the writer) are optional at load time and asserted by the
//! stage that needs them via the `require_*` accessors.

use std::env;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variables: {0}")]
    Missing(String),

    #[error("invalid environment variables: {0}")]
    Invalid(String),
}

/// Bucket names for the four object-store areas.
#[derive(Debug, Clone)]
pub struct Buckets {
    pub landing: String,
    pub processed: String,
    pub archive: String,
    pub failed: String,
}

/// Main bus subjects. DLQ subjects derive from the stage name.
#[derive(Debug, Clone)]
pub struct Topics {
    pub uploaded: String,
    pub converted: String,
    pub classified: String,
    pub extracted: String,
}

/// Which bus implementation to run against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusKind {
    InMemory,
    Nats,
}

#[derive(Debug, Clone)]
pub struct LlmSettings {
    pub primary_model: String,
    pub fallback_model: String,
    pub gemini_api_key: Option<String>,
    pub openrouter_api_key: Option<String>,
    pub extract_timeout: Duration,
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: u64,
}

#[derive(Debug, Clone)]
pub struct ObservabilitySettings {
    pub enabled: bool,
    pub public_key: Option<String>,
    pub secret_key: Option<String>,
    pub url: String,
}

/// Per-instance concurrency for each stage consumer.
#[derive(Debug, Clone)]
pub struct StageConcurrency {
    pub converter: usize,
    pub classifier: usize,
    pub extractor: usize,
    pub writer: usize,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub project_id: String,
    pub region: String,
    pub buckets: Buckets,
    pub topics: Topics,
    pub bus_kind: BusKind,
    pub nats_url: String,
    pub database_url: Option<String>,
    pub s3_endpoint: Option<String>,
    pub llm: LlmSettings,
    pub observability: ObservabilitySettings,
    pub log_level: String,
    pub concurrency: StageConcurrency,
}

impl PipelineConfig {
    /// Load and validate the full configuration from the environment.
    ///
    /// # Errors
    ///
    /// Returns one `ConfigError` naming every missing required variable
    /// or every unparsable value. Callers exit the process on error.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut reader = EnvReader::default();

        let project_id = reader.require("PROJECT_ID");
        let region = reader.require("REGION");

        let buckets = Buckets {
            landing: reader.with_default("BUCKET_LANDING", "invoices-landing"),
            processed: reader.with_default("BUCKET_PROCESSED", "invoices-processed"),
            archive: reader.with_default("BUCKET_ARCHIVE", "invoices-archive"),
            failed: reader.with_default("BUCKET_FAILED", "invoices-failed"),
        };

        let topics = Topics {
            uploaded: reader.with_default("TOPIC_UPLOADED", "invoices.uploaded"),
            converted: reader.with_default("TOPIC_CONVERTED", "invoices.converted"),
            classified: reader.with_default("TOPIC_CLASSIFIED", "invoices.classified"),
            extracted: reader.with_default("TOPIC_EXTRACTED", "invoices.extracted"),
        };

        let bus_kind = match reader.with_default("BUS_TYPE", "inmemory").to_lowercase().as_str() {
            "inmemory" => BusKind::InMemory,
            "nats" => BusKind::Nats,
            other => {
                reader.invalid("BUS_TYPE", &format!("'{}' (expected inmemory|nats)", other));
                BusKind::InMemory
            }
        };

        let llm = LlmSettings {
            primary_model: reader.with_default("LLM_PRIMARY_MODEL", "gemini-2.0-flash"),
            fallback_model: reader.with_default("LLM_FALLBACK_MODEL", "openai/gpt-4o-mini"),
            gemini_api_key: optional("GEMINI_API_KEY"),
            openrouter_api_key: optional("OPENROUTER_API_KEY"),
            extract_timeout: Duration::from_millis(
                reader.parse_with_default("EXTRACT_TIMEOUT_MS", 30_000),
            ),
            max_attempts: reader.parse_with_default("EXTRACT_MAX_ATTEMPTS", 3u32),
            backoff_base_ms: reader.parse_with_default("BACKOFF_BASE_MS", 500),
            backoff_cap_ms: reader.parse_with_default("BACKOFF_CAP_MS", 8_000),
        };

        let observability = ObservabilitySettings {
            enabled: reader.parse_with_default("OBSERVABILITY_ENABLED", false),
            public_key: optional("OBSERVABILITY_PUBLIC_KEY"),
            secret_key: optional("OBSERVABILITY_SECRET_KEY"),
            url: reader.with_default("OBSERVABILITY_URL", "https://cloud.langfuse.com"),
        };

        if observability.enabled {
            if observability.public_key.is_none() {
                reader.missing.push("OBSERVABILITY_PUBLIC_KEY".to_string());
            }
            if observability.secret_key.is_none() {
                reader.missing.push("OBSERVABILITY_SECRET_KEY".to_string());
            }
        }

        let concurrency = StageConcurrency {
            converter: reader.parse_with_default("CONVERTER_CONCURRENCY", 1usize),
            classifier: reader.parse_with_default("CLASSIFIER_CONCURRENCY", 10usize),
            extractor: reader.parse_with_default("EXTRACTOR_CONCURRENCY", 1usize),
            writer: reader.parse_with_default("WRITER_CONCURRENCY", 50usize),
        };

        let config = Self {
            project_id,
            region,
            buckets,
            topics,
            bus_kind,
            nats_url: reader.with_default("NATS_URL", "nats://localhost:4222"),
            database_url: optional("DATABASE_URL"),
            s3_endpoint: optional("S3_ENDPOINT"),
            llm,
            observability,
            log_level: reader.with_default("LOG_LEVEL", "info"),
            concurrency,
        };

        reader.finish()?;
        Ok(config)
    }

    /// The extractor and the CLI need at least one provider key.
    pub fn require_llm_keys(&self) -> Result<(), ConfigError> {
        let mut missing = Vec::new();
        if self.llm.gemini_api_key.is_none() {
            missing.push("GEMINI_API_KEY");
        }
        if self.llm.openrouter_api_key.is_none() {
            missing.push("OPENROUTER_API_KEY");
        }
        if missing.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Missing(missing.join(", ")))
        }
    }

    /// The writer and DLQ handler persist to the warehouse.
    pub fn require_database_url(&self) -> Result<&str, ConfigError> {
        self.database_url
            .as_deref()
            .ok_or_else(|| ConfigError::Missing("DATABASE_URL".to_string()))
    }
}

fn optional(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Collects every missing/invalid variable before failing.
#[derive(Default)]
struct EnvReader {
    missing: Vec<String>,
    invalid: Vec<String>,
}

impl EnvReader {
    fn require(&mut self, name: &str) -> String {
        match optional(name) {
            Some(value) => value,
            None => {
                self.missing.push(name.to_string());
                String::new()
            }
        }
    }

    fn with_default(&mut self, name: &str, default: &str) -> String {
        optional(name).unwrap_or_else(|| default.to_string())
    }

    fn parse_with_default<T: std::str::FromStr>(&mut self, name: &str, default: T) -> T {
        match optional(name) {
            Some(raw) => match raw.parse::<T>() {
                Ok(value) => value,
                Err(_) => {
                    self.invalid(name, &format!("'{}'", raw));
                    default
                }
            },
            None => default,
        }
    }

    fn invalid(&mut self, name: &str, detail: &str) {
        self.invalid.push(format!("{}={}", name, detail));
    }

    fn finish(self) -> Result<(), ConfigError> {
        if !self.missing.is_empty() {
            return Err(ConfigError::Missing(self.missing.join(", ")));
        }
        if !self.invalid.is_empty() {
            return Err(ConfigError::Invalid(self.invalid.join(", ")));
        }
        Ok(())
    }
}
