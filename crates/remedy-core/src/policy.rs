//! Operation allow-list / deny-list for rendered remediation documents.
//!
//! The policy is loaded once and never mutated. Lookups are default-deny:
//! anything not in the approved set is refused, but the verdict keeps the
//! distinction between an explicitly banned operation and one that is merely
//! unknown, since operators triage the two differently.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::domain::{RemedyError, Result};

/// Namespace prepended to unqualified operation names.
pub const DEFAULT_NAMESPACE: &str = "ansible.builtin";

/// Operations the standard policy permits.
pub const STANDARD_APPROVED: &[&str] = &[
    "ansible.builtin.assert",
    "ansible.builtin.copy",
    "ansible.builtin.debug",
    "ansible.builtin.fail",
    "ansible.builtin.file",
    "ansible.builtin.find",
    "ansible.builtin.lineinfile",
    "ansible.builtin.service",
    "ansible.builtin.service_facts",
    "ansible.builtin.set_fact",
    "ansible.builtin.stat",
    "ansible.builtin.systemd",
    "ansible.builtin.systemd_service",
    "ansible.builtin.uri",
    "ansible.builtin.wait_for",
];

/// Operations the standard policy always refuses.
pub const STANDARD_BANNED: &[&str] = &[
    "ansible.builtin.command",
    "ansible.builtin.cron",
    "ansible.builtin.expect",
    "ansible.builtin.get_url",
    "ansible.builtin.import_playbook",
    "ansible.builtin.import_role",
    "ansible.builtin.import_tasks",
    "ansible.builtin.include_role",
    "ansible.builtin.include_tasks",
    "ansible.builtin.raw",
    "ansible.builtin.reboot",
    "ansible.builtin.script",
    "ansible.builtin.shell",
    "ansible.builtin.unarchive",
    "ansible.builtin.user",
    "ansible.posix.authorized_key",
];

/// Qualify a short operation name with [`DEFAULT_NAMESPACE`].
///
/// Names that already contain a namespace separator are returned unchanged,
/// so `normalize_operation(normalize_operation(x)) == normalize_operation(x)`.
pub fn normalize_operation(name: &str) -> String {
    let name = name.trim();
    if name.contains('.') {
        name.to_string()
    } else {
        format!("{DEFAULT_NAMESPACE}.{name}")
    }
}

/// Outcome of looking an operation up in the policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationVerdict {
    Approved,
    Banned,
    /// Neither approved nor banned. Refused all the same.
    Unapproved,
}

impl OperationVerdict {
    pub fn is_allowed(&self) -> bool {
        matches!(self, OperationVerdict::Approved)
    }
}

/// Two disjoint sets of fully-qualified operation identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationPolicy {
    approved: BTreeSet<String>,
    banned: BTreeSet<String>,
}

impl OperationPolicy {
    /// Build a policy, normalizing every entry. Fails if the sets overlap.
    pub fn new<A, B, S1, S2>(approved: A, banned: B) -> Result<Self>
    where
        A: IntoIterator<Item = S1>,
        B: IntoIterator<Item = S2>,
        S1: AsRef<str>,
        S2: AsRef<str>,
    {
        let approved: BTreeSet<String> = approved
            .into_iter()
            .map(|op| normalize_operation(op.as_ref()))
            .collect();
        let banned: BTreeSet<String> = banned
            .into_iter()
            .map(|op| normalize_operation(op.as_ref()))
            .collect();

        let overlap: Vec<&String> = approved.intersection(&banned).collect();
        if !overlap.is_empty() {
            return Err(RemedyError::InvalidPolicy(format!(
                "operations both approved and banned: {}",
                overlap
                    .iter()
                    .map(|s| s.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            )));
        }

        Ok(Self { approved, banned })
    }

    /// The standard remediation policy: service control, file inspection and
    /// restoration, health checks. No free-form command execution.
    pub fn standard() -> Self {
        Self {
            approved: STANDARD_APPROVED.iter().map(|s| s.to_string()).collect(),
            banned: STANDARD_BANNED.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Look up an operation, normalizing it first.
    pub fn verdict(&self, operation: &str) -> OperationVerdict {
        let op = normalize_operation(operation);
        if self.banned.contains(&op) {
            OperationVerdict::Banned
        } else if self.approved.contains(&op) {
            OperationVerdict::Approved
        } else {
            OperationVerdict::Unapproved
        }
    }

    pub fn approved(&self) -> &BTreeSet<String> {
        &self.approved
    }

    pub fn banned(&self) -> &BTreeSet<String> {
        &self.banned
    }
}
