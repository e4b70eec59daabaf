//! Rendering project runs for the terminal.

use bsync_core::{OutcomeKind, ProjectStatus};
use colored::{ColoredString, Colorize};

use crate::driver::ProjectRun;
use crate::folder_sync::FolderSyncStatus;

fn paint(kind: OutcomeKind) -> ColoredString {
    let label = kind.label();
    match kind {
        OutcomeKind::UpToDate => label.dimmed(),
        OutcomeKind::Diverged => label.yellow().bold(),
        OutcomeKind::Error => label.red().bold(),
        _ => label.green(),
    }
}

/// Text block for one project, ending with a blank line.
pub fn text(run: &ProjectRun) -> String {
    let report = &run.report;
    let mut lines = Vec::new();

    let header = if report.dry_run {
        format!("{}: {}", report.project.bold(), "(dry run)".dimmed())
    } else {
        format!("{}:", report.project.bold())
    };
    lines.push(header);

    if report.status == ProjectStatus::NotARepository {
        lines.push("- Not a repo.".to_string());
        lines.push(String::new());
        return lines.join("\n");
    }

    for note in &report.notes {
        lines.push(format!("- {note}"));
    }
    if let ProjectStatus::ConfigError { detail } = &report.status {
        lines.push(format!("- {} {detail}", "error:".red().bold()));
    }

    for outcome in &report.outcomes {
        lines.push(format!(
            "\t{:10}:\t{} {}",
            outcome.branch,
            paint(outcome.kind),
            outcome.detail
        ));
        for warning in &outcome.warnings {
            lines.push(format!("\t{:10} \t{} {warning}", "", "!".yellow().bold()));
        }
    }

    match &run.folder_sync {
        FolderSyncStatus::Ran { batch } => {
            lines.push(format!("- folder sync ran with {}", batch.display()));
        }
        FolderSyncStatus::Failed { detail } => {
            lines.push(format!("- {} {detail}", "folder sync failed:".red()));
        }
        FolderSyncStatus::Skipped { .. } => {}
    }

    lines.push(format!("- {} done!", report.project));
    lines.push(String::new());
    lines.join("\n")
}

/// All runs as one JSON array.
pub fn json(runs: &[ProjectRun]) -> anyhow::Result<String> {
    Ok(serde_json::to_string_pretty(runs)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bsync_core::{BranchOutcome, ProjectReport, CLASH_NOTICE};

    fn run(report: ProjectReport) -> ProjectRun {
        ProjectRun {
            report,
            folder_sync: FolderSyncStatus::Skipped {
                reason: "disabled".into(),
            },
        }
    }

    fn synced() -> ProjectReport {
        let mut report = ProjectReport::new("proj", "/l/proj", "/r/proj", false);
        report.note("created remote work -> /r/proj");
        report.outcomes.push(BranchOutcome::new(
            "master",
            OutcomeKind::PulledToLocal,
            "[fast forward] 1111..2222",
        ));
        report.outcomes.push(
            BranchOutcome::new("feature", OutcomeKind::PushedToRemote, "[fast forward] 3333..4444")
                .with_warnings(vec![CLASH_NOTICE.to_string()]),
        );
        report
    }

    #[test]
    fn text_lists_notes_outcomes_and_warnings() {
        colored::control::set_override(false);
        let out = text(&run(synced()));
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[0], "proj:");
        assert_eq!(lines[1], "- created remote work -> /r/proj");
        assert_eq!(lines[2], "\tmaster    :\tpulled [fast forward] 1111..2222");
        assert_eq!(lines[3], "\tfeature   :\tpushed [fast forward] 3333..4444");
        assert!(lines[4].ends_with(CLASH_NOTICE));
        assert_eq!(lines[5], "- proj done!");
    }

    #[test]
    fn text_not_a_repository() {
        colored::control::set_override(false);
        let mut report = ProjectReport::new("junk", "/l/junk", "/r/junk", false);
        report.status = ProjectStatus::NotARepository;
        assert_eq!(text(&run(report)), "junk:\n- Not a repo.\n");
    }

    #[test]
    fn text_config_error_and_dry_run() {
        colored::control::set_override(false);
        let mut report = ProjectReport::new("proj", "/l/proj", "/r/proj", true);
        report.status = ProjectStatus::ConfigError {
            detail: "remote work: invalid remote name".into(),
        };
        let out = text(&run(report));
        assert!(out.starts_with("proj: (dry run)\n"));
        assert!(out.contains("- error: remote work: invalid remote name"));
    }

    #[test]
    fn text_reports_folder_sync_failure() {
        colored::control::set_override(false);
        let mut run = run(synced());
        run.folder_sync = FolderSyncStatus::Failed {
            detail: "false exited with exit status: 1".into(),
        };
        assert!(text(&run).contains("- folder sync failed: false exited"));
    }

    #[test]
    fn json_nests_folder_sync_under_its_own_key() {
        let out = json(&[run(synced())]).unwrap();
        let value: serde_json::Value = serde_json::from_str(&out).unwrap();
        let first = &value[0];
        assert_eq!(first["project"], "proj");
        assert_eq!(first["status"], "synced");
        assert_eq!(first["folder_sync"]["status"], "skipped");
        assert_eq!(first["folder_sync"]["reason"], "disabled");
        assert_eq!(first["outcomes"][1]["warnings"][0], CLASH_NOTICE);
    }

    #[test]
    fn json_keeps_both_details_apart() {
        let mut report = ProjectReport::new("proj", "/l/proj", "/r/proj", false);
        report.status = ProjectStatus::ConfigError {
            detail: "remote work: invalid remote name".into(),
        };
        let mut run = run(report);
        run.folder_sync = FolderSyncStatus::Failed {
            detail: "false exited with exit status: 1".into(),
        };

        let out = json(&[run]).unwrap();
        assert_eq!(out.matches("\"detail\"").count(), 2);
        let value: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(value[0]["status"], "config_error");
        assert_eq!(value[0]["detail"], "remote work: invalid remote name");
        assert_eq!(value[0]["folder_sync"]["status"], "failed");
        assert_eq!(value[0]["folder_sync"]["detail"], "false exited with exit status: 1");
    }
}
