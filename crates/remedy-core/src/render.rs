//! Template rendering: fixed document bodies with typed variable slots.
//!
//! A slot is written `{{ name }}`. A string consisting of exactly one slot
//! takes the variable's typed value (so a `stringlist` slot becomes a YAML
//! list); slots embedded in longer strings are interpolated and must be
//! strings. Slots naming anything other than a schema variable belong to the
//! downstream runtime and are left as-is. Mapping keys are never substituted,
//! so variables cannot introduce operations.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::catalog::TemplateDescriptor;
use crate::generator::{GeneratedVariables, VariableValue};

/// Errors produced while rendering a template.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RenderError {
    #[error("template {template_id} requires variable {name}, which was not supplied")]
    MissingVariable { template_id: String, name: String },

    #[error("variable {name} is not a string and cannot be embedded in text")]
    EmbeddedNonString { name: String },

    #[error("variable {name} contains a brace and cannot be embedded in text")]
    EmbeddedBrace { name: String },

    #[error("rendered document is malformed: {0}")]
    Malformed(String),
}

pub type RenderResult<T> = std::result::Result<T, RenderError>;

/// One task: an ordered map of operation or meta keys to values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Task(pub Map<String, Value>);

impl Task {
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(|k| k.as_str())
    }
}

/// One play of a remediation document.
///
/// Keys outside this struct are refused at load time, so a template can never
/// lose a section between the catalog file and the staged document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Play {
    pub name: String,
    pub hosts: String,
    #[serde(rename = "become", default)]
    pub privileged: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gather_facts: Option<bool>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub vars: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pre_tasks: Vec<Task>,
    pub tasks: Vec<Task>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub post_tasks: Vec<Task>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub handlers: Vec<Task>,
}

/// A template with every slot filled. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderedArtifact {
    pub template_id: String,
    pub variables: GeneratedVariables,
    pub document: Vec<Play>,
}

impl RenderedArtifact {
    /// Serialize the document as it will be validated and staged.
    pub fn to_yaml(&self) -> RenderResult<String> {
        serde_yaml::to_string(&self.document).map_err(|e| RenderError::Malformed(e.to_string()))
    }

    pub fn task_count(&self) -> usize {
        self.document
            .iter()
            .map(|p| p.pre_tasks.len() + p.tasks.len() + p.post_tasks.len() + p.handlers.len())
            .sum()
    }
}

/// Render `template` with `variables`. Deterministic; no I/O.
pub fn render(
    template: &TemplateDescriptor,
    variables: &GeneratedVariables,
) -> RenderResult<RenderedArtifact> {
    for spec in &template.variable_schema {
        if variables.get(&spec.name).is_none() {
            return Err(RenderError::MissingVariable {
                template_id: template.template_id.clone(),
                name: spec.name.clone(),
            });
        }
    }

    let slots = SlotValues {
        template,
        variables,
    };
    let body = serde_json::to_value(&template.body)
        .map_err(|e| RenderError::Malformed(e.to_string()))?;
    let filled = slots.fill(&body)?;
    let document: Vec<Play> =
        serde_json::from_value(filled).map_err(|e| RenderError::Malformed(e.to_string()))?;

    Ok(RenderedArtifact {
        template_id: template.template_id.clone(),
        variables: variables.clone(),
        document,
    })
}

struct SlotValues<'a> {
    template: &'a TemplateDescriptor,
    variables: &'a GeneratedVariables,
}

impl SlotValues<'_> {
    fn lookup(&self, name: &str) -> Option<&VariableValue> {
        if self.template.variable_schema.iter().any(|s| s.name == name) {
            self.variables.get(name)
        } else {
            None
        }
    }

    fn fill(&self, value: &Value) -> RenderResult<Value> {
        match value {
            Value::String(s) => self.fill_str(s),
            Value::Array(items) => items
                .iter()
                .map(|item| self.fill(item))
                .collect::<RenderResult<Vec<_>>>()
                .map(Value::Array),
            Value::Object(map) => {
                let mut out = Map::new();
                for (k, v) in map {
                    out.insert(k.clone(), self.fill(v)?);
                }
                Ok(Value::Object(out))
            }
            other => Ok(other.clone()),
        }
    }

    fn fill_str(&self, s: &str) -> RenderResult<Value> {
        if let Some(name) = sole_slot(s) {
            if let Some(value) = self.lookup(name) {
                return Ok(value.to_json());
            }
        }

        let mut out = String::with_capacity(s.len());
        let mut rest = s;
        while let Some(open) = rest.find("{{") {
            let Some(close) = rest[open + 2..].find("}}") else {
                break;
            };
            let inner = &rest[open + 2..open + 2 + close];
            let name = inner.trim();
            out.push_str(&rest[..open]);
            match self.lookup(name) {
                // Adjacent slots must not be able to assemble `{{` or `{%`.
                Some(VariableValue::Text(text)) if text.contains(['{', '}']) => {
                    return Err(RenderError::EmbeddedBrace {
                        name: name.to_string(),
                    })
                }
                Some(VariableValue::Text(text)) => out.push_str(text),
                Some(_) => {
                    return Err(RenderError::EmbeddedNonString {
                        name: name.to_string(),
                    })
                }
                None => {
                    out.push_str("{{");
                    out.push_str(inner);
                    out.push_str("}}");
                }
            }
            rest = &rest[open + 2 + close + 2..];
        }
        out.push_str(rest);
        Ok(Value::String(out))
    }
}

/// `"{{ name }}"` → `Some("name")`; anything else → `None`.
fn sole_slot(s: &str) -> Option<&str> {
    let inner = s.trim().strip_prefix("{{")?.strip_suffix("}}")?;
    if inner.contains("{{") || inner.contains("}}") {
        return None;
    }
    Some(inner.trim())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::TemplateCatalog;
    use crate::domain::Category;

    fn restart_vars() -> GeneratedVariables {
        GeneratedVariables::from_iter([
            ("service_name", VariableValue::text("vllm.service")),
            ("node", VariableValue::text("redfin")),
        ])
    }

    #[test]
    fn renders_restart_service() {
        let catalog = TemplateCatalog::builtin();
        let template = catalog.select(Category::ServiceDown).unwrap();
        let artifact = render(template, &restart_vars()).unwrap();

        assert_eq!(artifact.document.len(), 1);
        let play = &artifact.document[0];
        assert_eq!(play.hosts, "redfin");
        assert_eq!(play.tasks.len(), 1);
        let task = &play.tasks[0].0;
        assert_eq!(task["ansible.builtin.systemd"]["name"], "vllm.service");
        assert_eq!(task["name"], "Restart vllm.service");
    }

    #[test]
    fn rendering_is_byte_identical() {
        let catalog = TemplateCatalog::builtin();
        let template = catalog.select(Category::ServiceDown).unwrap();
        let a = render(template, &restart_vars()).unwrap().to_yaml().unwrap();
        let b = render(template, &restart_vars()).unwrap().to_yaml().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn missing_variable_fails_without_document() {
        let catalog = TemplateCatalog::builtin();
        let template = catalog.select(Category::ServiceDown).unwrap();
        let vars = GeneratedVariables::from_iter([("node", VariableValue::text("redfin"))]);
        let err = render(template, &vars).unwrap_err();
        assert_eq!(
            err,
            RenderError::MissingVariable {
                template_id: "restart_service".into(),
                name: "service_name".into(),
            }
        );
    }

    #[test]
    fn list_slot_becomes_yaml_list_and_runtime_slots_survive() {
        let catalog = TemplateCatalog::builtin();
        let template = catalog.select(Category::ResourceExhaustion).unwrap();
        let vars = GeneratedVariables::from_iter([
            ("node", VariableValue::text("redfin")),
            (
                "cleanup_paths",
                VariableValue::List(vec!["/var/log/vllm".into(), "/tmp/cache".into()]),
            ),
            ("older_than", VariableValue::text("7d")),
            ("recurse", VariableValue::Bool(true)),
        ]);
        let artifact = render(template, &vars).unwrap();
        let tasks = &artifact.document[0].tasks;
        assert_eq!(
            tasks[0].0["ansible.builtin.find"]["paths"],
            serde_json::json!(["/var/log/vllm", "/tmp/cache"])
        );
        assert_eq!(tasks[0].0["ansible.builtin.find"]["recurse"], true);
        assert_eq!(tasks[1].0["loop"], "{{ stale_files.files }}");
    }

    fn descriptor(yaml: &str) -> TemplateDescriptor {
        let raw = format!("templates:\n  service_down:\n{}", indent(yaml));
        TemplateCatalog::from_yaml_str(&raw)
            .unwrap()
            .select(Category::ServiceDown)
            .unwrap()
            .clone()
    }

    fn indent(yaml: &str) -> String {
        yaml.lines().map(|l| format!("    {l}\n")).collect()
    }

    #[test]
    fn adjacent_slots_cannot_assemble_template_syntax() {
        let template = descriptor(
            r#"template_id: joined
variable_schema:
  - { name: a, type: string, description: left }
  - { name: b, type: string, description: right }
body:
  - name: "{{ a }}{{ b }}"
    hosts: redfin
    tasks:
      - ansible.builtin.debug: { msg: ok }
"#,
        );
        let vars = GeneratedVariables::from_iter([
            ("a", VariableValue::text("x{")),
            ("b", VariableValue::text("{y")),
        ]);
        assert_eq!(
            render(&template, &vars).unwrap_err(),
            RenderError::EmbeddedBrace { name: "a".into() }
        );
    }

    #[test]
    fn optional_play_sections_survive_rendering() {
        let template = descriptor(
            r#"template_id: guarded_restart
variable_schema:
  - { name: node, type: string, kind: node, description: host }
body:
  - name: "Guarded restart on {{ node }}"
    hosts: "{{ node }}"
    vars:
      port: 8080
    pre_tasks:
      - ansible.builtin.wait_for: { port: "{{ port }}" }
    tasks:
      - ansible.builtin.debug: { msg: "{{ node }}" }
    post_tasks:
      - ansible.builtin.debug: { msg: done }
"#,
        );
        let vars = GeneratedVariables::from_iter([("node", VariableValue::text("redfin"))]);
        let artifact = render(&template, &vars).unwrap();
        let yaml = artifact.to_yaml().unwrap();

        assert!(yaml.contains("vars:"));
        assert!(yaml.contains("port: 8080"));
        assert!(yaml.contains("pre_tasks:"));
        assert!(yaml.contains("post_tasks:"));
        assert_eq!(artifact.task_count(), 3);
        assert_eq!(artifact.document[0].tasks[0].0["ansible.builtin.debug"]["msg"], "redfin");
    }

    #[test]
    fn sole_slot_detection() {
        assert_eq!(sole_slot("{{ node }}"), Some("node"));
        assert_eq!(sole_slot(" {{node}} "), Some("node"));
        assert_eq!(sole_slot("{{ a }} {{ b }}"), None);
        assert_eq!(sole_slot("host-{{ node }}"), None);
    }
}
