//! Output formatting for CLI commands.
//!
//! This module provides formatting utilities for displaying
//! information to the user in various formats.

use colored::Colorize;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::cluster::Readiness;
use crate::planner::{ActionType, DiffType};
use crate::reconciler::{PlanPreview, ReleaseOutcome, ReleaseReport};
use crate::render::ManifestSet;
use crate::state::{ReleaseStatus, ReleaseSummary, Revision};

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// Plan action row for table display.
#[derive(Tabled)]
struct PlanActionRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Weight")]
    weight: i32,
    #[tabled(rename = "Reason")]
    reason: String,
}

/// Revision row for `history`.
#[derive(Tabled)]
struct RevisionRow {
    #[tabled(rename = "Revision")]
    revision: u32,
    #[tabled(rename = "Updated")]
    updated: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Bundle")]
    bundle: String,
    #[tabled(rename = "Description")]
    description: String,
}

/// Release row for `list`.
#[derive(Tabled)]
struct ReleaseRow {
    #[tabled(rename = "Namespace")]
    namespace: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Revision")]
    revision: u32,
    #[tabled(rename = "Updated")]
    updated: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Bundle")]
    bundle: String,
}

/// Resource row for `status`.
#[derive(Tabled)]
struct ResourceRow {
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Weight")]
    weight: i32,
    #[tabled(rename = "Ready")]
    ready: String,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Formats the result of install, upgrade, rollback or uninstall.
    #[must_use]
    pub fn format_outcome(&self, outcome: &ReleaseOutcome) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(outcome).unwrap_or_default(),
            OutputFormat::Text => Self::format_outcome_text(outcome),
        }
    }

    fn format_outcome_text(outcome: &ReleaseOutcome) -> String {
        let headline = if outcome.is_success() {
            format!(
                "{} {} of {} complete: revision {} {}",
                "✓".green(),
                outcome.operation,
                outcome.release,
                outcome.revision,
                Self::format_status(outcome.status)
            )
        } else {
            format!(
                "{} {} of {} failed: revision {} {}",
                "✗".red(),
                outcome.operation,
                outcome.release,
                outcome.revision,
                Self::format_status(outcome.status)
            )
        };

        let mut output = format!("{headline}\n\n");
        let _ = writeln!(output, "   Created: {}", outcome.created);
        let _ = writeln!(output, "   Updated: {}", outcome.updated);
        let _ = writeln!(output, "   Deleted: {}", outcome.deleted);
        let _ = writeln!(output, "   Unchanged: {}", outcome.unchanged);

        if let Some(failure) = &outcome.failure {
            let _ = write!(output, "\n{} {failure}\n", "⚠".yellow());
        }

        if let Some(rollback) = &outcome.rollback {
            let _ = write!(output, "\nAutomatic rollback:\n{}", Self::format_outcome_text(rollback));
        }

        output
    }

    /// Formats a plan preview for display.
    #[must_use]
    pub fn format_plan(&self, preview: &PlanPreview, detailed: bool) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(preview).unwrap_or_default(),
            OutputFormat::Text => Self::format_plan_text(preview, detailed),
        }
    }

    fn format_plan_text(preview: &PlanPreview, detailed: bool) -> String {
        let plan = &preview.plan;
        if plan.is_empty() {
            return format!("{} No changes required - release is up to date.\n", "✓".green());
        }

        let mut output = String::new();
        let _ = writeln!(output, "\nPlan for {}", plan.release);
        if let Some(base) = plan.base_revision {
            let _ = writeln!(output, "   Based on revision {base}");
        }
        output.push('\n');

        let rows: Vec<PlanActionRow> = plan
            .actions
            .iter()
            .filter(|a| a.action_type != ActionType::Noop)
            .enumerate()
            .map(|(i, a)| PlanActionRow {
                index: i + 1,
                action: Self::format_action_type(a.action_type),
                resource: a.id.to_string(),
                weight: a.weight,
                reason: Self::truncate(&a.reason, 40),
            })
            .collect();

        output.push_str(&Table::new(rows).to_string());
        output.push('\n');

        if detailed {
            for diff in preview.diff.diffs.iter().filter(|d| d.diff_type == DiffType::Update) {
                let _ = writeln!(output, "\n{} {}", "~".yellow(), diff.id);
                for detail in &diff.details {
                    let _ = writeln!(
                        output,
                        "     {}: {} -> {}",
                        detail.field,
                        detail.old_value.as_deref().unwrap_or("<none>").red(),
                        detail.new_value.as_deref().unwrap_or("<none>").green()
                    );
                }
            }
        }

        let _ = write!(
            output,
            "\nPlan: {} to create, {} to update, {} to delete, {} unchanged\n",
            plan.create_count().to_string().green(),
            plan.update_count().to_string().yellow(),
            plan.delete_count().to_string().red(),
            plan.noop_count()
        );

        output
    }

    /// Formats revision history, most recent first.
    #[must_use]
    pub fn format_history(&self, revisions: &[Revision]) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(revisions).unwrap_or_default(),
            OutputFormat::Text => {
                let rows: Vec<RevisionRow> = revisions
                    .iter()
                    .map(|r| RevisionRow {
                        revision: r.number,
                        updated: r.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
                        status: Self::format_status(r.status),
                        bundle: r.bundle.as_ref().map_or_else(|| String::from("-"), ToString::to_string),
                        description: Self::truncate(&r.description, 50),
                    })
                    .collect();
                format!("{}\n", Table::new(rows))
            }
        }
    }

    /// Formats a release listing.
    #[must_use]
    pub fn format_list(&self, releases: &[ReleaseSummary]) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(releases).unwrap_or_default(),
            OutputFormat::Text => {
                if releases.is_empty() {
                    return String::from("No releases found.\n");
                }
                let rows: Vec<ReleaseRow> = releases
                    .iter()
                    .map(|r| ReleaseRow {
                        namespace: r.key.namespace.clone(),
                        name: r.key.name.clone(),
                        revision: r.revision,
                        updated: r.updated_at.format("%Y-%m-%d %H:%M:%S").to_string(),
                        status: Self::format_status(r.status),
                        bundle: r.bundle.as_ref().map_or_else(|| String::from("-"), ToString::to_string),
                    })
                    .collect();
                format!("{}\n", Table::new(rows))
            }
        }
    }

    /// Formats a live status report.
    #[must_use]
    pub fn format_report(&self, report: &ReleaseReport) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(report).unwrap_or_default(),
            OutputFormat::Text => {
                let mut output = String::new();
                let _ = writeln!(output, "\nRelease: {}", report.release);
                let _ = writeln!(
                    output,
                    "   Revision: {} ({})",
                    report.revision,
                    Self::format_status(report.status)
                );
                let _ = writeln!(output, "   Last operation: {}", report.operation);
                let _ = writeln!(output, "   Description: {}\n", report.description);

                if report.resources.is_empty() {
                    output.push_str("   No resources.\n");
                    return output;
                }

                let rows: Vec<ResourceRow> = report
                    .resources
                    .iter()
                    .map(|r| ResourceRow {
                        resource: r.id.to_string(),
                        weight: r.weight,
                        ready: Self::format_readiness(&r.readiness),
                    })
                    .collect();
                output.push_str(&Table::new(rows).to_string());
                output.push('\n');

                let ready = report.resources.iter().filter(|r| r.readiness.is_ready()).count();
                let _ = writeln!(output, "\n{ready}/{} resources ready", report.resources.len());
                output
            }
        }
    }

    /// Formats rendered manifests as a YAML stream (or a JSON array).
    #[must_use]
    pub fn format_manifests(&self, manifests: &ManifestSet) -> String {
        match self.format {
            OutputFormat::Json => {
                let contents: Vec<&serde_json::Value> = manifests.iter().map(|r| &r.content).collect();
                serde_json::to_string_pretty(&contents).unwrap_or_default()
            }
            OutputFormat::Text => {
                let mut output = String::new();
                for resource in manifests {
                    let _ = writeln!(output, "---\n# {}", resource.id);
                    output.push_str(&serde_yaml::to_string(&resource.content).unwrap_or_default());
                }
                output
            }
        }
    }

    /// Formats an action type with color.
    fn format_action_type(action_type: ActionType) -> String {
        match action_type {
            ActionType::Create => "+create".green().to_string(),
            ActionType::Update => "~update".yellow().to_string(),
            ActionType::Delete => "-delete".red().to_string(),
            ActionType::Noop => "noop".dimmed().to_string(),
        }
    }

    /// Formats a release status with color.
    fn format_status(status: ReleaseStatus) -> String {
        match status {
            ReleaseStatus::Deployed => status.to_string().green().to_string(),
            ReleaseStatus::Failed => status.to_string().red().to_string(),
            ReleaseStatus::Superseded | ReleaseStatus::Uninstalled => status.to_string().dimmed().to_string(),
            _ => status.to_string().yellow().to_string(),
        }
    }

    fn format_readiness(readiness: &Readiness) -> String {
        match readiness {
            Readiness::Ready => readiness.detail().green().to_string(),
            Readiness::Pending(_) => readiness.detail().yellow().to_string(),
            Readiness::Missing => readiness.detail().red().to_string(),
        }
    }

    /// Truncates a string to a maximum number of characters.
    fn truncate(s: &str, max_len: usize) -> String {
        if s.chars().count() <= max_len {
            s.to_string()
        } else {
            let head: String = s.chars().take(max_len.saturating_sub(3)).collect();
            format!("{head}...")
        }
    }

    /// Formats a success message.
    #[must_use]
    pub fn success(&self, message: &str) -> String {
        match self.format {
            OutputFormat::Json => {
                let json = serde_json::json!({ "status": "success", "message": message });
                serde_json::to_string_pretty(&json).unwrap_or_default()
            }
            OutputFormat::Text => format!("{} {message}", "✓".green()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{Operation, ReleaseKey};

    fn outcome() -> ReleaseOutcome {
        ReleaseOutcome {
            release: ReleaseKey::new("default", "web"),
            operation: Operation::Install,
            revision: 1,
            status: ReleaseStatus::Deployed,
            base_revision: None,
            created: 2,
            updated: 0,
            deleted: 0,
            unchanged: 0,
            failure: None,
            rollback: None,
        }
    }

    #[test]
    fn test_outcome_text() {
        colored::control::set_override(false);
        let text = OutputFormatter::new(OutputFormat::Text).format_outcome(&outcome());
        assert!(text.contains("install of default/web complete: revision 1 deployed"));
        assert!(text.contains("Created: 2"));
    }

    #[test]
    fn test_outcome_json() {
        let json = OutputFormatter::new(OutputFormat::Json).format_outcome(&outcome());
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["revision"], 1);
        assert_eq!(value["status"], "deployed");
        assert_eq!(value["release"]["name"], "web");
    }

    #[test]
    fn test_empty_list() {
        let text = OutputFormatter::new(OutputFormat::Text).format_list(&[]);
        assert_eq!(text, "No releases found.\n");
    }

    #[test]
    fn test_truncate() {
        assert_eq!(OutputFormatter::truncate("short", 10), "short");
        assert_eq!(OutputFormatter::truncate("a long description", 10), "a long ...");
    }
}
