//! Remediation template catalog and template selection.
//!
//! The catalog maps each remediation [`Category`] to at most one fixed
//! template. It is loaded once at startup and shared read-only across runs.
//! Selection is a plain lookup: an unmapped category yields `None` and the run
//! is routed to manual review. No default template is ever synthesized.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::domain::{Category, Classification, RemedyError, Result};
use crate::render::Play;

/// Declared value type of a template variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariableType {
    String,
    Bool,
    #[serde(rename = "stringlist")]
    StringList,
}

impl std::fmt::Display for VariableType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::String => write!(f, "string"),
            Self::Bool => write!(f, "bool"),
            Self::StringList => write!(f, "stringlist"),
        }
    }
}

/// What a string value names; drives the allow-list checks on generated values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableKind {
    #[default]
    Plain,
    /// A systemd unit; must be in the known-services table.
    Service,
    /// A filesystem path; must sit under a permitted root prefix.
    Path,
    /// A managed host name.
    Node,
}

/// One variable slot in a template's schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub var_type: VariableType,
    #[serde(default)]
    pub kind: VariableKind,
    pub description: String,
}

impl VariableSpec {
    pub fn new(
        name: &str,
        var_type: VariableType,
        kind: VariableKind,
        description: &str,
    ) -> Self {
        Self {
            name: name.to_string(),
            var_type,
            kind,
            description: description.to_string(),
        }
    }
}

/// A fixed remediation structure with named variable slots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateDescriptor {
    pub template_id: String,
    pub variable_schema: Vec<VariableSpec>,
    pub body: Vec<Play>,
}

impl TemplateDescriptor {
    pub fn variable_names(&self) -> impl Iterator<Item = &str> {
        self.variable_schema.iter().map(|s| s.name.as_str())
    }

    fn check(&self) -> Result<()> {
        if self.template_id.trim().is_empty() {
            return Err(RemedyError::InvalidCatalog("empty template_id".into()));
        }
        if self.body.is_empty() {
            return Err(RemedyError::InvalidCatalog(format!(
                "template {} has an empty body",
                self.template_id
            )));
        }
        let mut seen = std::collections::BTreeSet::new();
        for spec in &self.variable_schema {
            let valid_name = !spec.name.is_empty()
                && spec
                    .name
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
            if !valid_name {
                return Err(RemedyError::InvalidCatalog(format!(
                    "template {} has invalid variable name {:?}",
                    self.template_id, spec.name
                )));
            }
            if !seen.insert(spec.name.as_str()) {
                return Err(RemedyError::InvalidCatalog(format!(
                    "template {} declares variable {} twice",
                    self.template_id, spec.name
                )));
            }
        }
        Ok(())
    }
}

/// Immutable category → template mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateCatalog {
    templates: BTreeMap<Category, TemplateDescriptor>,
}

impl TemplateCatalog {
    /// Build a catalog, checking every descriptor.
    pub fn new(templates: BTreeMap<Category, TemplateDescriptor>) -> Result<Self> {
        if templates.contains_key(&Category::Unknown) {
            return Err(RemedyError::InvalidCatalog(
                "the unknown category cannot be mapped to a template".into(),
            ));
        }
        for template in templates.values() {
            template.check()?;
        }
        Ok(Self { templates })
    }

    /// Parse a catalog file of the form `templates: { <category>: <descriptor> }`.
    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        #[derive(Deserialize)]
        struct CatalogFile {
            templates: BTreeMap<Category, TemplateDescriptor>,
        }
        let file: CatalogFile = serde_yaml::from_str(raw)?;
        Self::new(file.templates)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&raw)
    }

    pub fn select(&self, category: Category) -> Option<&TemplateDescriptor> {
        self.templates.get(&category)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Category, &TemplateDescriptor)> {
        self.templates.iter().map(|(c, t)| (*c, t))
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// The built-in remediation templates.
    ///
    /// | Category            | Template             |
    /// |---------------------|----------------------|
    /// | service_down        | restart_service      |
    /// | config_drift        | restore_config       |
    /// | resource_exhaustion | reclaim_disk_space   |
    /// | database_issue      | restart_database     |
    /// | network_issue       | (manual review)      |
    /// | unknown             | (manual review)      |
    pub fn builtin() -> Self {
        use VariableKind as K;
        use VariableType as T;

        let node = || VariableSpec::new("node", T::String, K::Node, "Host the remediation targets");
        let service =
            || VariableSpec::new("service_name", T::String, K::Service, "Systemd unit to act on");

        let mut templates = BTreeMap::new();

        templates.insert(
            Category::ServiceDown,
            TemplateDescriptor {
                template_id: "restart_service".into(),
                variable_schema: vec![service(), node()],
                body: plays(json!([{
                    "name": "Restart {{ service_name }} on {{ node }}",
                    "hosts": "{{ node }}",
                    "become": true,
                    "gather_facts": false,
                    "tasks": [{
                        "name": "Restart {{ service_name }}",
                        "ansible.builtin.systemd": {
                            "name": "{{ service_name }}",
                            "state": "restarted"
                        }
                    }]
                }])),
            },
        );

        templates.insert(
            Category::ConfigDrift,
            TemplateDescriptor {
                template_id: "restore_config".into(),
                variable_schema: vec![
                    node(),
                    VariableSpec::new(
                        "config_path",
                        T::String,
                        K::Path,
                        "Drifted configuration file; restored from <path>.bak",
                    ),
                    service(),
                ],
                body: plays(json!([{
                    "name": "Restore {{ config_path }} on {{ node }}",
                    "hosts": "{{ node }}",
                    "become": true,
                    "gather_facts": false,
                    "tasks": [
                        {
                            "name": "Check for known-good backup",
                            "ansible.builtin.stat": { "path": "{{ config_path }}.bak" },
                            "register": "config_backup"
                        },
                        {
                            "name": "Restore {{ config_path }} from backup",
                            "ansible.builtin.copy": {
                                "src": "{{ config_path }}.bak",
                                "dest": "{{ config_path }}",
                                "remote_src": true,
                                "backup": true
                            },
                            "when": "config_backup.stat.exists",
                            "notify": "restart service"
                        }
                    ],
                    "handlers": [{
                        "name": "restart service",
                        "ansible.builtin.systemd": {
                            "name": "{{ service_name }}",
                            "state": "restarted"
                        }
                    }]
                }])),
            },
        );

        templates.insert(
            Category::ResourceExhaustion,
            TemplateDescriptor {
                template_id: "reclaim_disk_space".into(),
                variable_schema: vec![
                    node(),
                    VariableSpec::new(
                        "cleanup_paths",
                        T::StringList,
                        K::Path,
                        "Directories whose stale files may be removed",
                    ),
                    VariableSpec::new(
                        "older_than",
                        T::String,
                        K::Plain,
                        "Minimum file age to remove, e.g. 7d",
                    ),
                    VariableSpec::new("recurse", T::Bool, K::Plain, "Descend into subdirectories"),
                ],
                body: plays(json!([{
                    "name": "Reclaim disk space on {{ node }}",
                    "hosts": "{{ node }}",
                    "become": true,
                    "gather_facts": false,
                    "tasks": [
                        {
                            "name": "Find stale files",
                            "ansible.builtin.find": {
                                "paths": "{{ cleanup_paths }}",
                                "age": "{{ older_than }}",
                                "recurse": "{{ recurse }}"
                            },
                            "register": "stale_files"
                        },
                        {
                            "name": "Remove stale files",
                            "ansible.builtin.file": {
                                "path": "{{ item.path }}",
                                "state": "absent"
                            },
                            "loop": "{{ stale_files.files }}"
                        }
                    ]
                }])),
            },
        );

        templates.insert(
            Category::DatabaseIssue,
            TemplateDescriptor {
                template_id: "restart_database".into(),
                variable_schema: vec![
                    service(),
                    node(),
                    VariableSpec::new("port", T::String, K::Plain, "TCP port the database listens on"),
                ],
                body: plays(json!([{
                    "name": "Restart database {{ service_name }} on {{ node }}",
                    "hosts": "{{ node }}",
                    "become": true,
                    "gather_facts": false,
                    "tasks": [
                        {
                            "name": "Restart {{ service_name }}",
                            "ansible.builtin.systemd": {
                                "name": "{{ service_name }}",
                                "state": "restarted"
                            }
                        },
                        {
                            "name": "Wait for {{ service_name }} to accept connections",
                            "ansible.builtin.wait_for": {
                                "port": "{{ port }}",
                                "timeout": 60
                            }
                        }
                    ]
                }])),
            },
        );

        Self { templates }
    }
}

impl Default for TemplateCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

// Built-in bodies are literals above; a failure here is a bug in this file.
fn plays(body: serde_json::Value) -> Vec<Play> {
    serde_json::from_value(body).expect("built-in template body is well-formed")
}

/// Pick the template for a classification, if one is mapped.
pub fn select_template<'a>(
    catalog: &'a TemplateCatalog,
    classification: &Classification,
) -> Option<&'a TemplateDescriptor> {
    catalog.select(classification.category)
}
