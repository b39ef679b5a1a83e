//! Retrieval-augmented parameter generation.
//!
//! The model proposes values for a template's variables; nothing it proposes
//! is trusted. [`validate_variables`] checks the proposal against the schema
//! and the configured allow-lists, and any violation fails generation with
//! the offending variable and constraint named. Values are never coerced,
//! trimmed or truncated.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::catalog::{TemplateDescriptor, VariableKind, VariableSpec, VariableType};
use crate::domain::{Classification, RetrievedCase, UNKNOWN_TARGET};
use crate::llm::{parse_json_object, LanguageModel, SamplingSettings};
use crate::retry::{call_with_retry, RetryExhausted, RetryPolicy};

/// Systemd units remediation templates may act on.
pub const KNOWN_SERVICES: &[&str] = &[
    "docker.service",
    "grafana-server.service",
    "mariadb.service",
    "nginx.service",
    "node_exporter.service",
    "ollama.service",
    "postgresql.service",
    "prometheus.service",
    "qdrant.service",
    "redis.service",
    "sshd.service",
    "vllm.service",
];

/// Root prefixes a generated path must start with.
pub const PERMITTED_PATH_PREFIXES: &[&str] = &[
    "/etc/", "/opt/", "/srv/", "/tmp/", "/var/lib/", "/var/log/", "/var/tmp/",
];

/// Host patterns that address more than one managed node, or none.
pub const RESERVED_HOST_PATTERNS: &[&str] =
    &["all", "localhost", "ungrouped", "127.0.0.1", UNKNOWN_TARGET];

/// Substrings that would let a value smuggle template or shell syntax.
///
/// Single braces are refused so that two interpolated values can never join
/// into `{{`, `{%` or `{#`.
pub const FORBIDDEN_TOKENS: &[&str] = &["{", "}", "$(", "`", ";", "|", "&", ">", "<"];

/// A single generated value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VariableValue {
    Bool(bool),
    Text(String),
    List(Vec<String>),
}

impl VariableValue {
    pub fn text(s: impl Into<String>) -> Self {
        Self::Text(s.into())
    }

    pub fn to_json(&self) -> Value {
        match self {
            Self::Bool(b) => Value::Bool(*b),
            Self::Text(s) => Value::String(s.clone()),
            Self::List(items) => Value::Array(items.iter().cloned().map(Value::String).collect()),
        }
    }
}

/// Validated variable values keyed by name, in name order.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GeneratedVariables(BTreeMap<String, VariableValue>);

impl GeneratedVariables {
    pub fn get(&self, name: &str) -> Option<&VariableValue> {
        self.0.get(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &VariableValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl<K: Into<String>> FromIterator<(K, VariableValue)> for GeneratedVariables {
    fn from_iter<I: IntoIterator<Item = (K, VariableValue)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

/// Fixed allow-lists and bounds applied to every generated value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationLimits {
    pub max_value_len: usize,
    pub case_excerpt_chars: usize,
    pub known_services: BTreeSet<String>,
    pub path_prefixes: Vec<String>,
    /// Managed hosts a node value must name. Empty accepts any host name.
    pub known_nodes: BTreeSet<String>,
}

impl Default for GenerationLimits {
    fn default() -> Self {
        Self {
            max_value_len: 80,
            case_excerpt_chars: 400,
            known_services: KNOWN_SERVICES.iter().map(|s| s.to_string()).collect(),
            path_prefixes: PERMITTED_PATH_PREFIXES.iter().map(|s| s.to_string()).collect(),
            known_nodes: BTreeSet::new(),
        }
    }
}

/// Why generation failed. Each variant names the violated constraint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GenerationFailure {
    #[error("model unavailable: {0}")]
    Transport(RetryExhausted),

    #[error("malformed model response after repair retry: {detail}")]
    MalformedResponse { detail: String, raw: String },

    #[error("variable {name} is required but missing")]
    MissingVariable { name: String },

    #[error("variable {name} is not part of the template schema")]
    UnexpectedVariable { name: String },

    #[error("variable {name} must be {expected}, got {found}")]
    TypeMismatch {
        name: String,
        expected: VariableType,
        found: String,
    },

    #[error("variable {name} is empty")]
    EmptyValue { name: String },

    #[error("variable {name} is {len} characters long (limit {max})")]
    ValueTooLong { name: String, len: usize, max: usize },

    #[error("variable {name} contains forbidden syntax {token:?}")]
    ForbiddenSyntax { name: String, token: String },

    #[error("variable {name} names unknown service {value:?}")]
    UnknownService { name: String, value: String },

    #[error("variable {name} path {value:?} is outside the permitted roots")]
    ForbiddenPath { name: String, value: String },

    #[error("variable {name} value {value:?} is not a valid host name")]
    InvalidNode { name: String, value: String },

    #[error("variable {name} value {value:?} is a reserved host pattern")]
    ReservedNode { name: String, value: String },

    #[error("variable {name} names unmanaged host {value:?}")]
    UnknownNode { name: String, value: String },
}

impl GenerationFailure {
    /// The value was well-formed but outside a configured allow-list, which
    /// usually means the allow-list needs an entry rather than the model
    /// misbehaving.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            Self::UnknownService { .. } | Self::ForbiddenPath { .. } | Self::UnknownNode { .. }
        )
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "object",
    }
}

/// Check a model proposal against `schema` and `limits`.
pub fn validate_variables(
    schema: &[VariableSpec],
    proposed: &serde_json::Map<String, Value>,
    limits: &GenerationLimits,
) -> Result<GeneratedVariables, GenerationFailure> {
    for spec in schema {
        if !proposed.contains_key(&spec.name) {
            return Err(GenerationFailure::MissingVariable {
                name: spec.name.clone(),
            });
        }
    }
    for name in proposed.keys() {
        if !schema.iter().any(|s| &s.name == name) {
            return Err(GenerationFailure::UnexpectedVariable { name: name.clone() });
        }
    }

    let mut values = BTreeMap::new();
    for spec in schema {
        let raw = &proposed[&spec.name];
        let value = match (spec.var_type, raw) {
            (VariableType::Bool, Value::Bool(b)) => VariableValue::Bool(*b),
            (VariableType::String, Value::String(s)) => {
                check_text(spec, s, limits)?;
                VariableValue::Text(s.clone())
            }
            (VariableType::StringList, Value::Array(items)) => {
                let mut list = Vec::with_capacity(items.len());
                for item in items {
                    let Value::String(s) = item else {
                        return Err(GenerationFailure::TypeMismatch {
                            name: spec.name.clone(),
                            expected: spec.var_type,
                            found: format!("list containing {}", json_type_name(item)),
                        });
                    };
                    check_text(spec, s, limits)?;
                    list.push(s.clone());
                }
                if list.is_empty() {
                    return Err(GenerationFailure::EmptyValue {
                        name: spec.name.clone(),
                    });
                }
                VariableValue::List(list)
            }
            (expected, other) => {
                return Err(GenerationFailure::TypeMismatch {
                    name: spec.name.clone(),
                    expected,
                    found: json_type_name(other).to_string(),
                })
            }
        };
        values.insert(spec.name.clone(), value);
    }
    Ok(GeneratedVariables(values))
}

fn check_text(
    spec: &VariableSpec,
    value: &str,
    limits: &GenerationLimits,
) -> Result<(), GenerationFailure> {
    let name = || spec.name.clone();

    if value.is_empty() {
        return Err(GenerationFailure::EmptyValue { name: name() });
    }
    let len = value.chars().count();
    if len > limits.max_value_len {
        return Err(GenerationFailure::ValueTooLong {
            name: name(),
            len,
            max: limits.max_value_len,
        });
    }
    if let Some(token) = FORBIDDEN_TOKENS.iter().find(|t| value.contains(**t)) {
        return Err(GenerationFailure::ForbiddenSyntax {
            name: name(),
            token: token.to_string(),
        });
    }
    if let Some(c) = value.chars().find(|c| c.is_control()) {
        return Err(GenerationFailure::ForbiddenSyntax {
            name: name(),
            token: c.escape_default().to_string(),
        });
    }

    match spec.kind {
        VariableKind::Plain => {}
        VariableKind::Service => {
            if !limits.known_services.contains(value) {
                return Err(GenerationFailure::UnknownService {
                    name: name(),
                    value: value.to_string(),
                });
            }
        }
        VariableKind::Path => {
            let under_root = limits.path_prefixes.iter().any(|p| value.starts_with(p.as_str()));
            let escapes = value.split('/').any(|segment| segment == "..");
            if !under_root || escapes {
                return Err(GenerationFailure::ForbiddenPath {
                    name: name(),
                    value: value.to_string(),
                });
            }
        }
        VariableKind::Node => {
            if !is_host_name(value) {
                return Err(GenerationFailure::InvalidNode {
                    name: name(),
                    value: value.to_string(),
                });
            }
            if RESERVED_HOST_PATTERNS
                .iter()
                .any(|p| p.eq_ignore_ascii_case(value))
            {
                return Err(GenerationFailure::ReservedNode {
                    name: name(),
                    value: value.to_string(),
                });
            }
            if !limits.known_nodes.is_empty() && !limits.known_nodes.contains(value) {
                return Err(GenerationFailure::UnknownNode {
                    name: name(),
                    value: value.to_string(),
                });
            }
        }
    }
    Ok(())
}

fn is_host_name(value: &str) -> bool {
    value.len() <= 253
        && value.split('.').all(|label| {
            !label.is_empty()
                && label.len() <= 63
                && !label.starts_with('-')
                && !label.ends_with('-')
                && label
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        })
}

/// Fills a template's variables using the model plus retrieved cases.
pub struct ParameterGenerator {
    model: Arc<dyn LanguageModel>,
    sampling: SamplingSettings,
    retry: RetryPolicy,
    limits: Arc<GenerationLimits>,
}

impl ParameterGenerator {
    pub fn new(
        model: Arc<dyn LanguageModel>,
        sampling: SamplingSettings,
        retry: RetryPolicy,
        limits: Arc<GenerationLimits>,
    ) -> Self {
        Self {
            model,
            sampling,
            retry,
            limits,
        }
    }

    pub fn limits(&self) -> &GenerationLimits {
        &self.limits
    }

    /// Ask the model for values and validate them.
    ///
    /// An unparseable reply gets exactly one repair attempt with a stricter
    /// prompt. Constraint violations are final.
    pub async fn generate(
        &self,
        classification: &Classification,
        cases: &[RetrievedCase],
        template: &TemplateDescriptor,
    ) -> Result<GeneratedVariables, GenerationFailure> {
        let prompt = self.build_prompt(classification, cases, template);
        let raw = self.call(prompt.clone()).await?;

        let proposed = match parse_json_object(&raw) {
            Ok(map) => map,
            Err(detail) => {
                warn!(template_id = %template.template_id, error = %detail, "parameter response unparseable, retrying with strict prompt");
                let repaired = self.call(repair_prompt(&prompt, template)).await?;
                parse_json_object(&repaired).map_err(|detail| {
                    GenerationFailure::MalformedResponse {
                        detail,
                        raw: repaired.clone(),
                    }
                })?
            }
        };

        let variables = validate_variables(&template.variable_schema, &proposed, &self.limits)?;
        debug!(template_id = %template.template_id, count = variables.len(), "variables accepted");
        Ok(variables)
    }

    async fn call(&self, prompt: String) -> Result<String, GenerationFailure> {
        let request = self.sampling.request(prompt);
        call_with_retry(&self.retry, "parameter generation", || {
            self.model.complete(&request)
        })
        .await
        .map_err(GenerationFailure::Transport)
    }

    /// Second-stage prompt: classification, bounded case excerpts, exact schema.
    pub fn build_prompt(
        &self,
        classification: &Classification,
        cases: &[RetrievedCase],
        template: &TemplateDescriptor,
    ) -> String {
        let mut prompt = format!(
            "You are filling in the variables of the fixed remediation template `{}`.\n\
             You do not write the remediation itself; you only supply variable values.\n\n\
             Incident:\n\
             - category: {}\n\
             - target_node: {}\n\
             - target_service: {}\n\
             - summary: {}\n\n",
            template.template_id,
            classification.category,
            classification.target_node,
            classification.target_service,
            classification.summary,
        );

        if cases.is_empty() {
            prompt.push_str("Similar past remediations: none found.\n\n");
        } else {
            prompt.push_str("Similar past remediations:\n");
            for (i, case) in cases.iter().enumerate() {
                prompt.push_str(&format!(
                    "{}. [{} similarity={:.2}] {}\n",
                    i + 1,
                    case.case_id,
                    case.similarity_score,
                    case.excerpt(self.limits.case_excerpt_chars)
                ));
            }
            prompt.push('\n');
        }

        prompt.push_str("Variables:\n");
        for spec in &template.variable_schema {
            let constraint = match spec.kind {
                VariableKind::Plain => String::new(),
                VariableKind::Service => format!(
                    "; one of: {}",
                    self.limits
                        .known_services
                        .iter()
                        .cloned()
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
                VariableKind::Path => format!(
                    "; absolute path under one of: {}",
                    self.limits.path_prefixes.join(", ")
                ),
                VariableKind::Node if self.limits.known_nodes.is_empty() => {
                    "; a single managed host name".to_string()
                }
                VariableKind::Node => format!(
                    "; one of: {}",
                    self.limits
                        .known_nodes
                        .iter()
                        .cloned()
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
            };
            prompt.push_str(&format!(
                "- {} ({}{}): {}\n",
                spec.name, spec.var_type, constraint, spec.description
            ));
        }

        prompt.push_str(&format!(
            "\nEach string must be at most {} characters, on one line, with no template or shell syntax.\n\
             Respond with a single JSON object whose keys are exactly: {}.\n",
            self.limits.max_value_len,
            template.variable_names().collect::<Vec<_>>().join(", ")
        ));
        prompt
    }
}

fn repair_prompt(original: &str, template: &TemplateDescriptor) -> String {
    format!(
        "Your previous reply was not a valid JSON object. Reply with JSON only, no prose, \
         no code fences: one object with exactly the keys {}.\n\n{}",
        template.variable_names().collect::<Vec<_>>().join(", "),
        original
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::TemplateCatalog;
    use crate::domain::Category;
    use serde_json::json;

    fn schema(category: Category) -> Vec<VariableSpec> {
        TemplateCatalog::builtin()
            .select(category)
            .unwrap()
            .variable_schema
            .clone()
    }

    fn check(category: Category, proposed: Value) -> Result<GeneratedVariables, GenerationFailure> {
        let map = proposed.as_object().unwrap().clone();
        validate_variables(&schema(category), &map, &GenerationLimits::default())
    }

    #[test]
    fn accepts_exact_schema() {
        let vars = check(
            Category::ServiceDown,
            json!({"service_name": "vllm.service", "node": "redfin"}),
        )
        .unwrap();
        assert_eq!(vars.get("node"), Some(&VariableValue::text("redfin")));
    }

    #[test]
    fn rejects_missing_and_extra_keys() {
        assert_eq!(
            check(Category::ServiceDown, json!({"node": "redfin"})).unwrap_err(),
            GenerationFailure::MissingVariable {
                name: "service_name".into()
            }
        );
        assert_eq!(
            check(
                Category::ServiceDown,
                json!({"service_name": "vllm.service", "node": "redfin", "cmd": "x"})
            )
            .unwrap_err(),
            GenerationFailure::UnexpectedVariable { name: "cmd".into() }
        );
    }

    #[test]
    fn rejects_nested_objects_and_wrong_types() {
        let err = check(
            Category::ServiceDown,
            json!({"service_name": {"name": "vllm.service"}, "node": "redfin"}),
        )
        .unwrap_err();
        assert!(matches!(err, GenerationFailure::TypeMismatch { ref found, .. } if found == "object"));

        let err = check(
            Category::ResourceExhaustion,
            json!({"node": "redfin", "cleanup_paths": ["/var/log", {"a": 1}], "older_than": "7d", "recurse": true}),
        )
        .unwrap_err();
        assert!(matches!(err, GenerationFailure::TypeMismatch { ref found, .. } if found == "list containing object"));

        let err = check(
            Category::ResourceExhaustion,
            json!({"node": "redfin", "cleanup_paths": ["/var/log/app"], "older_than": "7d", "recurse": "yes"}),
        )
        .unwrap_err();
        assert!(matches!(err, GenerationFailure::TypeMismatch { expected: VariableType::Bool, .. }));
    }

    #[test]
    fn rejects_long_values_without_truncating() {
        let long = "a".repeat(81);
        let err = check(
            Category::DatabaseIssue,
            json!({"service_name": "postgresql.service", "node": "redfin", "port": long}),
        )
        .unwrap_err();
        assert_eq!(
            err,
            GenerationFailure::ValueTooLong {
                name: "port".into(),
                len: 81,
                max: 80
            }
        );
    }

    #[test]
    fn rejects_template_and_shell_syntax() {
        for bad in ["{{ lookup('pipe','id') }}", "5432; rm -rf /", "$(id)", "a\nb", "x | y"] {
            let err = check(
                Category::DatabaseIssue,
                json!({"service_name": "postgresql.service", "node": "redfin", "port": bad}),
            )
            .unwrap_err();
            assert!(
                matches!(err, GenerationFailure::ForbiddenSyntax { .. }),
                "{bad:?} -> {err:?}"
            );
        }
    }

    #[test]
    fn rejects_unknown_service() {
        let err = check(
            Category::ServiceDown,
            json!({"service_name": "cryptominer.service", "node": "redfin"}),
        )
        .unwrap_err();
        assert!(err.is_configuration_error());
        assert!(matches!(err, GenerationFailure::UnknownService { .. }));
    }

    #[test]
    fn rejects_paths_outside_permitted_roots() {
        for bad in ["/root/.ssh/authorized_keys", "/var/log/../../etc/shadow", "etc/nginx.conf"] {
            let err = check(
                Category::ConfigDrift,
                json!({"node": "redfin", "config_path": bad, "service_name": "nginx.service"}),
            )
            .unwrap_err();
            assert!(matches!(err, GenerationFailure::ForbiddenPath { .. }), "{bad}");
        }
    }

    #[test]
    fn rejects_invalid_node_names() {
        for bad in ["-redfin", "red fin", "redfin..lan", ""] {
            let err = check(
                Category::ServiceDown,
                json!({"service_name": "vllm.service", "node": bad}),
            )
            .unwrap_err();
            assert!(
                matches!(
                    err,
                    GenerationFailure::InvalidNode { .. } | GenerationFailure::EmptyValue { .. }
                ),
                "{bad:?} -> {err:?}"
            );
        }
    }

    #[test]
    fn rejects_reserved_host_patterns() {
        for reserved in ["all", "ALL", "localhost", "ungrouped", "127.0.0.1", "unknown"] {
            let err = check(
                Category::ServiceDown,
                json!({"service_name": "vllm.service", "node": reserved}),
            )
            .unwrap_err();
            assert!(
                matches!(err, GenerationFailure::ReservedNode { ref value, .. } if value == reserved),
                "{reserved:?} -> {err:?}"
            );
            assert!(!err.is_configuration_error());
        }
    }

    #[test]
    fn known_nodes_restrict_targets_when_configured() {
        let limits = GenerationLimits {
            known_nodes: ["redfin".to_string()].into_iter().collect(),
            ..GenerationLimits::default()
        };
        let schema = schema(Category::ServiceDown);
        let proposal = |node: &str| {
            json!({"service_name": "vllm.service", "node": node})
                .as_object()
                .unwrap()
                .clone()
        };

        assert!(validate_variables(&schema, &proposal("redfin"), &limits).is_ok());
        let err = validate_variables(&schema, &proposal("bluefin"), &limits).unwrap_err();
        assert_eq!(
            err,
            GenerationFailure::UnknownNode {
                name: "node".into(),
                value: "bluefin".into()
            }
        );
        assert!(err.is_configuration_error());
    }

    #[test]
    fn rejects_single_braces_that_could_join_into_template_syntax() {
        for half in ["x{", "{y", "5432}", "a{%"] {
            let err = check(
                Category::DatabaseIssue,
                json!({"service_name": "postgresql.service", "node": "redfin", "port": half}),
            )
            .unwrap_err();
            assert!(
                matches!(err, GenerationFailure::ForbiddenSyntax { ref name, .. } if name == "port"),
                "{half:?} -> {err:?}"
            );
        }
    }

    #[test]
    fn empty_list_is_rejected() {
        let err = check(
            Category::ResourceExhaustion,
            json!({"node": "redfin", "cleanup_paths": [], "older_than": "7d", "recurse": false}),
        )
        .unwrap_err();
        assert_eq!(
            err,
            GenerationFailure::EmptyValue {
                name: "cleanup_paths".into()
            }
        );
    }
}
