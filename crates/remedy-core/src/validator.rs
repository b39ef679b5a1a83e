//! Static allow-list validation of rendered remediation documents.
//!
//! This is the trust boundary between the untrusted generator and the staging
//! area. It parses the document, walks every task, and classifies every key
//! that names an operation against an [`OperationPolicy`]. It performs no I/O
//! and never interprets or executes the document.
//!
//! Rules:
//! - A document that does not parse into plays of tasks is rejected outright.
//! - Task keys in [`TASK_META_KEYS`] are control flow or naming, never
//!   operations. Nested `block` / `rescue` / `always` lists are walked too.
//! - Play keys outside [`PLAY_KEYWORDS`] are treated as operations.
//! - Every operation is normalized and looked up; banned and unapproved
//!   operations both invalidate the document but are reported separately.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::policy::{normalize_operation, OperationPolicy, OperationVerdict};

/// Task keys that never name an operation.
pub const TASK_META_KEYS: &[&str] = &[
    "name",
    "register",
    "when",
    "loop",
    "loop_control",
    "with_items",
    "with_list",
    "with_dict",
    "with_fileglob",
    "with_sequence",
    "with_together",
    "with_nested",
    "with_subelements",
    "notify",
    "listen",
    "ignore_errors",
    "failed_when",
    "changed_when",
    "until",
    "retries",
    "delay",
    "become",
    "become_user",
    "become_method",
    "vars",
    "tags",
    "args",
    "block",
    "rescue",
    "always",
    "environment",
    "delegate_to",
    "run_once",
    "no_log",
    "check_mode",
    "diff",
    "timeout",
    "any_errors_fatal",
];

/// Task-list sections of a play.
pub const PLAY_TASK_SECTIONS: &[&str] = &["pre_tasks", "tasks", "post_tasks", "handlers"];

/// Play-level keys that are neither task lists nor operations.
pub const PLAY_KEYWORDS: &[&str] = &[
    "name",
    "hosts",
    "become",
    "become_user",
    "become_method",
    "gather_facts",
    "vars",
    "tags",
    "environment",
    "serial",
    "remote_user",
    "any_errors_fatal",
    "max_fail_percentage",
    "ignore_errors",
    "check_mode",
    "diff",
    "no_log",
    "timeout",
];

const NESTED_TASK_KEYS: &[&str] = &["block", "rescue", "always"];

/// Full audit trail of one validation pass.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ValidationResult {
    pub approved_ops: BTreeSet<String>,
    pub unapproved_ops: BTreeSet<String>,
    pub banned_ops: BTreeSet<String>,
    /// Set when the document failed to parse; no operations are reported then.
    pub parse_error: Option<String>,
    pub tasks_inspected: usize,
    pub valid: bool,
}

impl ValidationResult {
    fn malformed(reason: impl Into<String>) -> Self {
        Self {
            parse_error: Some(reason.into()),
            valid: false,
            ..Self::default()
        }
    }

    fn record(&mut self, operation: &str, policy: &OperationPolicy) {
        let op = normalize_operation(operation);
        match policy.verdict(&op) {
            OperationVerdict::Approved => {
                self.approved_ops.insert(op);
            }
            OperationVerdict::Banned => {
                self.banned_ops.insert(op);
            }
            OperationVerdict::Unapproved => {
                self.unapproved_ops.insert(op);
            }
        }
    }

    /// Human-readable itemization of what was refused.
    pub fn rejection_summary(&self) -> String {
        if let Some(err) = &self.parse_error {
            return format!("malformed document: {err}");
        }
        let mut parts = Vec::new();
        if !self.banned_ops.is_empty() {
            parts.push(format!(
                "banned: {}",
                self.banned_ops.iter().cloned().collect::<Vec<_>>().join(", ")
            ));
        }
        if !self.unapproved_ops.is_empty() {
            parts.push(format!(
                "unapproved: {}",
                self.unapproved_ops
                    .iter()
                    .cloned()
                    .collect::<Vec<_>>()
                    .join(", ")
            ));
        }
        parts.join("; ")
    }
}

/// Validate a YAML (or JSON) document against `policy`.
pub fn validate_document(document: &str, policy: &OperationPolicy) -> ValidationResult {
    match serde_yaml::from_str::<Value>(document) {
        Ok(value) => validate_value(&value, policy),
        Err(err) => ValidationResult::malformed(format!("unparseable document: {err}")),
    }
}

/// Validate an already-parsed document tree.
pub fn validate_value(document: &Value, policy: &OperationPolicy) -> ValidationResult {
    let mut result = ValidationResult::default();
    if let Err(reason) = walk_document(document, policy, &mut result) {
        return ValidationResult::malformed(reason);
    }
    result.valid = result.banned_ops.is_empty() && result.unapproved_ops.is_empty();
    result
}

fn walk_document(
    document: &Value,
    policy: &OperationPolicy,
    result: &mut ValidationResult,
) -> Result<(), String> {
    let plays = document
        .as_array()
        .ok_or_else(|| "document root must be a list of plays".to_string())?;
    if plays.is_empty() {
        return Err("document contains no plays".to_string());
    }

    for (index, play) in plays.iter().enumerate() {
        let play = play
            .as_object()
            .ok_or_else(|| format!("play {index} is not a mapping"))?;
        walk_play(index, play, policy, result)?;
    }
    Ok(())
}

fn walk_play(
    index: usize,
    play: &Map<String, Value>,
    policy: &OperationPolicy,
    result: &mut ValidationResult,
) -> Result<(), String> {
    for (key, value) in play {
        if PLAY_TASK_SECTIONS.contains(&key.as_str()) {
            let location = format!("play {index} {key}");
            walk_tasks(&location, value, policy, result)?;
        } else if !PLAY_KEYWORDS.contains(&key.as_str()) {
            result.record(key, policy);
        }
    }
    Ok(())
}

fn walk_tasks(
    location: &str,
    tasks: &Value,
    policy: &OperationPolicy,
    result: &mut ValidationResult,
) -> Result<(), String> {
    let tasks = tasks
        .as_array()
        .ok_or_else(|| format!("{location} is not a list"))?;

    for (index, task) in tasks.iter().enumerate() {
        let task = task
            .as_object()
            .ok_or_else(|| format!("{location} task {index} is not a mapping"))?;
        result.tasks_inspected += 1;

        for (key, value) in task {
            if NESTED_TASK_KEYS.contains(&key.as_str()) {
                let nested = format!("{location} task {index} {key}");
                walk_tasks(&nested, value, policy, result)?;
            } else if !TASK_META_KEYS.contains(&key.as_str()) {
                result.record(key, policy);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> OperationPolicy {
        OperationPolicy::standard()
    }

    #[test]
    fn approved_only_document_is_valid() {
        let doc = r#"
- name: restart
  hosts: redfin
  become: true
  tasks:
    - name: Restart vllm
      ansible.builtin.systemd:
        name: vllm.service
        state: restarted
    - name: Wait
      wait_for:
        port: 8000
      register: port_state
      when: true
"#;
        let result = validate_document(doc, &policy());
        assert!(result.valid, "{result:?}");
        assert!(result.banned_ops.is_empty());
        assert!(result.unapproved_ops.is_empty());
        assert_eq!(result.tasks_inspected, 2);
        assert!(result.approved_ops.contains("ansible.builtin.wait_for"));
    }

    #[test]
    fn short_banned_name_is_caught_after_normalization() {
        let doc = "- hosts: all\n  tasks:\n    - shell: rm -rf /\n";
        let result = validate_document(doc, &policy());
        assert!(!result.valid);
        assert!(result.banned_ops.contains("ansible.builtin.shell"));
    }

    #[test]
    fn unknown_operation_is_default_denied_but_reported_separately() {
        let doc = "- hosts: all\n  tasks:\n    - community.general.npm:\n        name: left-pad\n";
        let result = validate_document(doc, &policy());
        assert!(!result.valid);
        assert!(result.banned_ops.is_empty());
        assert!(result.unapproved_ops.contains("community.general.npm"));
    }

    #[test]
    fn nested_blocks_are_inspected() {
        let doc = r#"
- hosts: all
  tasks:
    - name: guarded
      block:
        - ansible.builtin.stat:
            path: /etc/hosts
      rescue:
        - raw: reboot
"#;
        let result = validate_document(doc, &policy());
        assert!(!result.valid);
        assert!(result.banned_ops.contains("ansible.builtin.raw"));
        assert!(result.approved_ops.contains("ansible.builtin.stat"));
    }

    #[test]
    fn handlers_and_play_level_operations_are_inspected() {
        let doc = r#"
- hosts: all
  roles:
    - evil
  tasks: []
  handlers:
    - name: h
      command: /bin/true
"#;
        let result = validate_document(doc, &policy());
        assert!(!result.valid);
        assert!(result.banned_ops.contains("ansible.builtin.command"));
        assert!(result.unapproved_ops.contains("ansible.builtin.roles"));
    }

    #[test]
    fn malformed_documents_are_rejected_without_partial_analysis() {
        for doc in [
            "not: a list",
            "[]",
            "- just a string",
            "- hosts: all\n  tasks: nope\n",
            "- hosts: all\n  tasks:\n    - 42\n",
            "- hosts: all\n  tasks:\n    - block: notalist\n",
            ": : :",
        ] {
            let result = validate_document(doc, &policy());
            assert!(!result.valid, "accepted {doc:?}");
            assert!(result.parse_error.is_some(), "no parse error for {doc:?}");
            assert!(result.approved_ops.is_empty());
            assert!(result.banned_ops.is_empty());
            assert!(result.unapproved_ops.is_empty());
        }
    }

    #[test]
    fn meta_keys_are_never_operations() {
        let doc = r#"
- hosts: all
  tasks:
    - name: looped
      debug:
        msg: hi
      loop: [1, 2]
      loop_control:
        label: x
      notify: restart
      tags: [a]
      vars:
        x: 1
      become: true
      become_user: root
      ignore_errors: true
      environment:
        PATH: /usr/bin
"#;
        let result = validate_document(doc, &policy());
        assert!(result.valid, "{result:?}");
        assert_eq!(
            result.approved_ops.iter().cloned().collect::<Vec<_>>(),
            vec!["ansible.builtin.debug".to_string()]
        );
    }

    #[test]
    fn rejection_summary_itemizes_operations() {
        let doc = "- hosts: all\n  tasks:\n    - shell: x\n    - apt: {name: y}\n";
        let result = validate_document(doc, &policy());
        let summary = result.rejection_summary();
        assert!(summary.contains("banned: ansible.builtin.shell"));
        assert!(summary.contains("unapproved: ansible.builtin.apt"));
    }
}
