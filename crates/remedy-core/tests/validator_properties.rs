//! Trust-boundary properties of the module validator.

use remedy_core::policy::{normalize_operation, STANDARD_APPROVED, STANDARD_BANNED};
use remedy_core::render::render;
use remedy_core::validator::TASK_META_KEYS;
use remedy_core::{
    validate_document, Category, GeneratedVariables, OperationPolicy, TemplateCatalog,
    VariableValue,
};

fn policy() -> OperationPolicy {
    OperationPolicy::standard()
}

#[test]
fn shell_with_huge_argument_is_banned_by_name() {
    let doc = format!(
        "- name: fix\n  hosts: redfin\n  tasks:\n    - name: run it\n      ansible.builtin.shell: \"{}\"\n",
        "a".repeat(800)
    );
    let result = validate_document(&doc, &policy());

    assert!(!result.valid);
    assert_eq!(
        result.banned_ops.iter().collect::<Vec<_>>(),
        vec!["ansible.builtin.shell"]
    );
    assert!(result.unapproved_ops.is_empty());
    assert!(result.parse_error.is_none());
}

#[test]
fn every_banned_operation_invalidates_in_short_and_long_form() {
    for op in STANDARD_BANNED {
        let short = op.rsplit('.').next().unwrap();
        for name in [*op, short] {
            let doc = format!("- hosts: all\n  tasks:\n    - {name}: {{}}\n");
            let result = validate_document(&doc, &policy());
            assert!(!result.valid, "{name} slipped through");
            if normalize_operation(name) == *op {
                assert!(result.banned_ops.contains(*op), "{name}");
            }
        }
    }
}

#[test]
fn every_approved_operation_alone_is_valid() {
    for op in STANDARD_APPROVED {
        let doc = format!("- hosts: all\n  tasks:\n    - name: step\n      {op}: {{}}\n");
        let result = validate_document(&doc, &policy());
        assert!(result.valid, "{op}: {result:?}");
        assert_eq!(result.approved_ops.len(), 1);
    }
}

#[test]
fn meta_keys_alone_never_reach_the_policy() {
    let mut task = String::new();
    for key in TASK_META_KEYS {
        if matches!(*key, "name" | "block" | "rescue" | "always") {
            continue;
        }
        task.push_str(&format!("      {key}: x\n"));
    }
    let doc = format!("- hosts: all\n  tasks:\n    - name: only meta\n{task}");
    let result = validate_document(&doc, &policy());

    assert!(result.valid, "{result:?}");
    assert!(result.approved_ops.is_empty());
    assert_eq!(result.tasks_inspected, 1);
}

#[test]
fn mixed_document_reports_both_buckets() {
    let doc = r#"
- hosts: redfin
  tasks:
    - ansible.builtin.systemd: { name: nginx.service, state: restarted }
    - community.general.make: { chdir: /opt/app }
    - raw: "reboot"
"#;
    let result = validate_document(doc, &policy());
    assert!(!result.valid);
    assert!(result.approved_ops.contains("ansible.builtin.systemd"));
    assert!(result.unapproved_ops.contains("community.general.make"));
    assert!(result.banned_ops.contains("ansible.builtin.raw"));
    assert_eq!(result.tasks_inspected, 3);
}

#[test]
fn empty_and_non_playbook_documents_are_malformed() {
    let docs = [
        "",
        "   \n",
        "just a string",
        "hosts: all\ntasks: []\n",
        "[]",
        "- 42\n",
        "- hosts: all\n  tasks: nope\n",
    ];
    for doc in docs {
        let result = validate_document(doc, &policy());
        assert!(!result.valid, "{doc:?}");
        assert!(result.parse_error.is_some(), "{doc:?}");
        assert!(result.approved_ops.is_empty());
    }
}

#[test]
fn every_builtin_template_renders_to_a_valid_document() {
    let catalog = TemplateCatalog::builtin();
    let vars = |category: Category| -> GeneratedVariables {
        match category {
            Category::ServiceDown => [
                ("service_name", VariableValue::text("nginx.service")),
                ("node", VariableValue::text("redfin")),
            ]
            .into_iter()
            .collect(),
            Category::ConfigDrift => [
                ("node", VariableValue::text("redfin")),
                ("config_path", VariableValue::text("/etc/nginx/nginx.conf")),
                ("service_name", VariableValue::text("nginx.service")),
            ]
            .into_iter()
            .collect(),
            Category::ResourceExhaustion => [
                ("node", VariableValue::text("redfin")),
                (
                    "cleanup_paths",
                    VariableValue::List(vec!["/var/log/journal".into(), "/tmp/cache".into()]),
                ),
                ("older_than", VariableValue::text("7d")),
                ("recurse", VariableValue::Bool(true)),
            ]
            .into_iter()
            .collect(),
            _ => [
                ("service_name", VariableValue::text("postgresql.service")),
                ("node", VariableValue::text("redfin")),
                ("port", VariableValue::text("5432")),
            ]
            .into_iter()
            .collect(),
        }
    };

    for (category, template) in catalog.iter() {
        let artifact = render(template, &vars(category)).unwrap();
        let yaml = artifact.to_yaml().unwrap();
        let result = validate_document(&yaml, &policy());
        assert!(result.valid, "{}: {result:?}", template.template_id);
        assert!(result.tasks_inspected >= 1);
    }
}
