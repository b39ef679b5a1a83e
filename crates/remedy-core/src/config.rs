//! Pipeline configuration.
//!
//! Loaded once from TOML, then optionally overridden from `REMEDY_*`
//! environment variables. Every section has defaults, so an empty file is a
//! valid configuration.
//!
//! ```toml
//! [llm]
//! endpoint = "http://redfin:8000"
//! model = "qwen2.5-coder-7b"
//!
//! [memory]
//! endpoint = "http://redfin:8090"
//! top_k = 3
//!
//! [staging]
//! dir = "/var/lib/remedy/staging"
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::catalog::TemplateCatalog;
use crate::domain::{RemedyError, Result};
use crate::generator::{GenerationLimits, KNOWN_SERVICES, PERMITTED_PATH_PREFIXES};
use crate::llm::SamplingSettings;
use crate::policy::{OperationPolicy, STANDARD_APPROVED, STANDARD_BANNED};
use crate::retrieval::MAX_TOP_K;
use crate::retry::RetryPolicy;

pub const ENV_LLM_URL: &str = "REMEDY_LLM_URL";
pub const ENV_LLM_MODEL: &str = "REMEDY_LLM_MODEL";
pub const ENV_LLM_API_KEY: &str = "REMEDY_LLM_API_KEY";
pub const ENV_MEMORY_URL: &str = "REMEDY_MEMORY_URL";
pub const ENV_STAGING_DIR: &str = "REMEDY_STAGING_DIR";
pub const ENV_AUDIT_DIR: &str = "REMEDY_AUDIT_DIR";

fn owned(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Inference endpoint and sampling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub endpoint: String,
    pub model: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
    pub max_tokens: u32,
    pub classify_temperature: f32,
    pub generate_temperature: f32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8000".to_string(),
            model: "remediation".to_string(),
            api_key: None,
            timeout_secs: 30,
            max_tokens: 512,
            classify_temperature: 0.1,
            generate_temperature: 0.2,
        }
    }
}

/// Historical-case memory store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    pub endpoint: String,
    pub top_k: usize,
    pub timeout_secs: u64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8090".to_string(),
            top_k: 3,
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_attempts: policy.max_attempts,
            backoff_base_ms: policy.backoff_base_ms,
        }
    }
}

/// Bounds and allow-lists for generated variable values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_value_len: usize,
    pub case_excerpt_chars: usize,
    pub known_services: Vec<String>,
    pub path_prefixes: Vec<String>,
    /// Managed hosts; empty accepts any valid host name.
    pub known_nodes: Vec<String>,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_value_len: 80,
            case_excerpt_chars: 400,
            known_services: owned(KNOWN_SERVICES),
            path_prefixes: owned(PERMITTED_PATH_PREFIXES),
            known_nodes: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub approved: Vec<String>,
    pub banned: Vec<String>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            approved: owned(STANDARD_APPROVED),
            banned: owned(STANDARD_BANNED),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StagingConfig {
    pub dir: PathBuf,
}

impl Default for StagingConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("staging"),
        }
    }
}

/// Run records; `dir = None` disables the audit log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    pub dir: Option<PathBuf>,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            dir: Some(PathBuf::from("audit")),
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub llm: LlmConfig,
    pub memory: MemoryConfig,
    pub retry: RetryConfig,
    pub limits: LimitsConfig,
    pub policy: PolicyConfig,
    pub staging: StagingConfig,
    pub audit: AuditConfig,
    /// External YAML template catalog; the built-in catalog when unset.
    pub catalog_path: Option<PathBuf>,
}

impl PipelineConfig {
    /// Read, parse and validate a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `REMEDY_*` overrides from the process environment.
    pub fn with_env_overrides(mut self) -> Self {
        self.apply_env_overrides(|key| std::env::var(key).ok());
        self
    }

    /// Apply overrides from `lookup`; empty values are ignored.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get(ENV_LLM_URL) {
            self.llm.endpoint = v;
        }
        if let Some(v) = get(ENV_LLM_MODEL) {
            self.llm.model = v;
        }
        if let Some(v) = get(ENV_LLM_API_KEY) {
            self.llm.api_key = Some(v);
        }
        if let Some(v) = get(ENV_MEMORY_URL) {
            self.memory.endpoint = v;
        }
        if let Some(v) = get(ENV_STAGING_DIR) {
            self.staging.dir = PathBuf::from(v);
        }
        if let Some(v) = get(ENV_AUDIT_DIR) {
            self.audit.dir = Some(PathBuf::from(v));
        }
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(RemedyError::InvalidConfig(msg));

        if !(1..=MAX_TOP_K).contains(&self.memory.top_k) {
            return invalid(format!(
                "memory.top_k must be in 1..={MAX_TOP_K}, got {}",
                self.memory.top_k
            ));
        }
        if self.llm.timeout_secs == 0 || self.memory.timeout_secs == 0 {
            return invalid("timeouts must be non-zero".to_string());
        }
        if self.retry.max_attempts == 0 {
            return invalid("retry.max_attempts must be at least 1".to_string());
        }
        if self.llm.max_tokens == 0 {
            return invalid("llm.max_tokens must be non-zero".to_string());
        }
        if self.limits.max_value_len == 0 {
            return invalid("limits.max_value_len must be non-zero".to_string());
        }
        if let Some(bad) = self.limits.path_prefixes.iter().find(|p| !p.starts_with('/')) {
            return invalid(format!("limits.path_prefixes entry {bad:?} is not absolute"));
        }
        self.operation_policy()?;
        Ok(())
    }

    pub fn llm_retry(&self) -> RetryPolicy {
        self.retry_with_timeout(self.llm.timeout_secs)
    }

    pub fn memory_retry(&self) -> RetryPolicy {
        self.retry_with_timeout(self.memory.timeout_secs)
    }

    fn retry_with_timeout(&self, timeout_secs: u64) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts,
            backoff_base_ms: self.retry.backoff_base_ms,
            timeout_ms: timeout_secs.saturating_mul(1000),
        }
    }

    pub fn classify_sampling(&self) -> SamplingSettings {
        SamplingSettings {
            max_tokens: self.llm.max_tokens,
            temperature: self.llm.classify_temperature,
        }
    }

    pub fn generate_sampling(&self) -> SamplingSettings {
        SamplingSettings {
            max_tokens: self.llm.max_tokens,
            temperature: self.llm.generate_temperature,
        }
    }

    /// Fails when the approved and banned lists overlap.
    pub fn operation_policy(&self) -> Result<OperationPolicy> {
        OperationPolicy::new(&self.policy.approved, &self.policy.banned)
    }

    pub fn generation_limits(&self) -> GenerationLimits {
        GenerationLimits {
            max_value_len: self.limits.max_value_len,
            case_excerpt_chars: self.limits.case_excerpt_chars,
            known_services: self.limits.known_services.iter().cloned().collect(),
            path_prefixes: self.limits.path_prefixes.clone(),
            known_nodes: self.limits.known_nodes.iter().cloned().collect(),
        }
    }

    /// The configured catalog file, or the built-in catalog.
    pub fn template_catalog(&self) -> Result<TemplateCatalog> {
        match &self.catalog_path {
            Some(path) => TemplateCatalog::load(path),
            None => Ok(TemplateCatalog::builtin()),
        }
    }
}
