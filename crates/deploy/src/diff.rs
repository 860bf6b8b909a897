//! Renders what-if change sets into a human-readable drift report.

use serde_json::Value;

use crate::template::{ChangeType, PropertyChangeType, WhatIfChange, WhatIfPropertyChange};

/// Aggregated outcome of a drift evaluation: coarse counters plus the full
/// rendered report. Derived on every query, never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffSummary {
    pub adds: usize,
    pub deletes: usize,
    pub modifies: usize,
    /// Rendered report; empty when nothing changed.
    pub report: String,
}

impl DiffSummary {
    pub fn total(&self) -> usize {
        self.adds + self.deletes + self.modifies
    }

    /// One-line description of the change counts.
    pub fn short_reason(&self) -> String {
        format!(
            "There are {} resources need to add, {} resources need to delete, {} resource need to change",
            self.adds, self.deletes, self.modifies
        )
    }
}

/// Render the change forest into a deterministic report.
///
/// Resources render in input order and are numbered per change type; modify
/// entries recurse into their property deltas. `commit` names the
/// desired-state source and is shortened to 7 characters in the header.
pub fn render_diff(changes: &[WhatIfChange], commit: &str) -> DiffSummary {
    let mut adds = 0;
    let mut deletes = 0;
    let mut modifies = 0;
    let mut body = String::new();

    for change in changes {
        let (resource_type, resource_name) = split_resource_id(&change.resource_id);
        match change.change_type {
            ChangeType::Create => {
                adds += 1;
                body.push_str(&format!(
                    "+ {adds}. Name:{resource_name} Type:{resource_type}\n\n"
                ));
            }
            ChangeType::Delete => {
                deletes += 1;
                body.push_str(&format!(
                    "- {deletes}. Name:{resource_name} Type:{resource_type}\n\n"
                ));
            }
            ChangeType::Modify => {
                modifies += 1;
                body.push_str(&format!(
                    "# {modifies}. Name:{resource_name} Type:{resource_type}\n\n"
                ));
                for delta in &change.delta {
                    render_property_change(&mut body, delta);
                }
                body.push('\n');
            }
            // Deploy, NoChange, Ignore and Unsupported entries carry no drift.
            _ => {}
        }
    }

    let report = if adds + deletes + modifies == 0 {
        String::new()
    } else {
        let mut report = format!(
            "Diff between the defined state in Git at commit {} and actual live state:\n\n",
            short_commit(commit)
        );
        report.push_str("--- Actual (LiveState)\n+++ Expected (Git)\n\n");
        report.push_str(&body);
        report
    };

    DiffSummary {
        adds,
        deletes,
        modifies,
        report,
    }
}

/// Recursive visitor over one property change.
fn render_property_change(out: &mut String, change: &WhatIfPropertyChange) {
    match change.property_change_type {
        PropertyChangeType::Create => {
            out.push_str(&format!(
                "+ path:{} value:{}\n\n",
                change.path,
                render_value(&change.after)
            ));
        }
        PropertyChangeType::Delete => {
            out.push_str(&format!(
                "- path:{} value:{}\n\n",
                change.path,
                render_value(&change.before)
            ));
        }
        PropertyChangeType::Modify => {
            out.push_str(&format!(
                "# path:{} value:{} -> {}\n\n",
                change.path,
                render_value(&change.before),
                render_value(&change.after)
            ));
        }
        // Structural marker only: the interesting values sit in the children.
        PropertyChangeType::Array => {
            out.push_str(&format!("# path:{}\n\n", change.path));
            for child in &change.children {
                render_property_change(out, child);
            }
        }
        PropertyChangeType::NoEffect => {}
    }
}

fn render_value(value: &Option<Value>) -> String {
    match value.as_ref().unwrap_or(&Value::Null) {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Short resource type and name: the last two segments of the resource id.
fn split_resource_id(resource_id: &str) -> (&str, &str) {
    let mut segments = resource_id.rsplit('/');
    let name = segments.next().unwrap_or_default();
    let resource_type = segments.next().unwrap_or_default();
    (resource_type, name)
}

fn short_commit(commit: &str) -> &str {
    if commit.len() > 7 { &commit[..7] } else { commit }
}
