//! Template rendering for CLI output using outstanding

use chrono::{DateTime, Utc};
use console::Style;
use loctraillib::{
    AnalysisReport, CommitLineSnapshot, FailedOperation, LedgerState, RetryPolicy, RetrySummary,
    TrackedRepository,
};
use outstanding::{render_auto, render_with_output, Theme};
use serde::Serialize;

/// Include templates at compile time
const REPOSITORIES_TEMPLATE: &str = include_str!("../templates/repositories.jinja");
const SNAPSHOTS_TEMPLATE: &str = include_str!("../templates/snapshots.jinja");
const FAILURES_TEMPLATE: &str = include_str!("../templates/failures.jinja");
const REPORT_TEMPLATE: &str = include_str!("../templates/report.jinja");
const RETRY_SUMMARY_TEMPLATE: &str = include_str!("../templates/retry_summary.jinja");

/// Re-export OutputMode for callers
pub use outstanding::OutputMode;

type RenderResult = Result<String, Box<dyn std::error::Error>>;

/// Pre-padded repository row
#[derive(Debug, Serialize)]
struct RepositoryRow {
    id: String,
    name: String,
    commit: String,
    analyzed: String,
}

#[derive(Debug, Serialize)]
struct RepositoriesContext {
    header: String,
    separator: String,
    rows: Vec<RepositoryRow>,
}

/// Pre-padded snapshot row
#[derive(Debug, Serialize)]
struct SnapshotRow {
    commit: String,
    date: String,
    total: String,
    added: String,
    removed: String,
    categories: String,
}

#[derive(Debug, Serialize)]
struct SnapshotsContext {
    header: String,
    separator: String,
    rows: Vec<SnapshotRow>,
    /// Growth line under the table
    summary: String,
}

/// Pre-padded ledger row
#[derive(Debug, Serialize)]
struct FailureRow {
    commit: String,
    failed_at: String,
    state: String,
    retries: String,
    error: String,
}

#[derive(Debug, Serialize)]
struct FailuresContext {
    header: String,
    separator: String,
    rows: Vec<FailureRow>,
}

#[derive(Debug, Serialize)]
struct ReportFailure {
    commit: String,
    error: String,
}

#[derive(Debug, Serialize)]
struct ReportContext {
    repository: String,
    total_commits: usize,
    processed: usize,
    skipped: usize,
    failed: usize,
    failures: Vec<ReportFailure>,
}

/// Truncate a name to fit within max_len, adding ".." prefix if needed
fn truncate_name(name: &str, max_len: usize) -> String {
    let chars: Vec<char> = name.chars().collect();
    if chars.len() > max_len {
        let tail: String = chars[chars.len() - (max_len - 2)..].iter().collect();
        format!("..{}", tail)
    } else {
        name.to_string()
    }
}

/// Create the theme with styles
fn create_theme() -> Theme {
    Theme::new()
        .add("header", Style::new().bold())
        .add("repository", Style::new().bold())
        .add("added", Style::new().green())
        .add("removed", Style::new().red())
}

fn date(at: &DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M").to_string()
}

fn state_label(state: LedgerState) -> &'static str {
    match state {
        LedgerState::Recorded => "recorded",
        LedgerState::RetryPending => "retry_pending",
        LedgerState::Exhausted => "exhausted",
    }
}

/// Categories largest first, as `key:lines`.
fn categories(snapshot: &CommitLineSnapshot) -> String {
    let mut by_size: Vec<(&String, &u64)> = snapshot.lines_by_category.iter().collect();
    by_size.sort_by(|a, b| b.1.cmp(a.1).then(a.0.cmp(b.0)));
    by_size
        .iter()
        .map(|(category, lines)| format!("{}:{}", category, lines))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Tracked repositories, one per line.
pub fn render_repositories(repos: &[TrackedRepository], output_mode: OutputMode) -> RenderResult {
    let theme = create_theme();
    if matches!(output_mode, OutputMode::Json) {
        return Ok(render_auto(REPOSITORIES_TEMPLATE, &repos, &theme, output_mode)?);
    }

    let rows = repos
        .iter()
        .map(|repo| {
            let (commit, analyzed) = match &repo.last_analyzed {
                Some(marker) => (
                    marker.commit_id.short().to_string(),
                    date(&marker.analyzed_at),
                ),
                None => ("-".to_string(), "never".to_string()),
            };
            RepositoryRow {
                id: format!("{:<36}", repo.id),
                name: format!("{:<30}", truncate_name(&repo.full_name(), 30)),
                commit: format!("{:<12}", commit),
                analyzed,
            }
        })
        .collect();

    let context = RepositoriesContext {
        header: format!(
            "{:<36}  {:<30}  {:<12}  {}",
            "Id", "Repository", "Last commit", "Analyzed"
        ),
        separator: "-".repeat(100),
        rows,
    };
    Ok(render_with_output(REPOSITORIES_TEMPLATE, &context, &theme, output_mode)?)
}

/// Snapshots oldest first, with diff stats and the category breakdown.
pub fn render_snapshots(snapshots: &[CommitLineSnapshot], output_mode: OutputMode) -> RenderResult {
    let theme = create_theme();
    if matches!(output_mode, OutputMode::Json) {
        return Ok(render_auto(SNAPSHOTS_TEMPLATE, &snapshots, &theme, output_mode)?);
    }

    let rows = snapshots
        .iter()
        .map(|snapshot| SnapshotRow {
            commit: format!("{:<10}", snapshot.commit_id.short()),
            date: format!("{:<16}", date(&snapshot.committed_at)),
            total: format!("{:>10}", snapshot.total_lines),
            added: format!("{:>8}", format!("+{}", snapshot.lines_added)),
            removed: format!("{:>8}", format!("-{}", snapshot.lines_removed)),
            categories: categories(snapshot),
        })
        .collect();

    let summary = match (snapshots.first(), snapshots.last()) {
        (Some(first), Some(last)) => {
            let growth = last.total_lines as i64 - first.total_lines as i64;
            format!(
                "{} commits, {} lines now ({:+} since {})",
                snapshots.len(),
                last.total_lines,
                growth,
                first.commit_id.short()
            )
        }
        _ => String::new(),
    };

    let context = SnapshotsContext {
        header: format!(
            "{:<10}  {:<16}  {:>10}  {:>8}  {:>8}  {}",
            "Commit", "Date", "Total", "Added", "Removed", "Categories"
        ),
        separator: "-".repeat(80),
        rows,
        summary,
    };
    Ok(render_with_output(SNAPSHOTS_TEMPLATE, &context, &theme, output_mode)?)
}

/// Ledger entries with their retry state.
pub fn render_failures(
    ops: &[FailedOperation],
    policy: &RetryPolicy,
    now: DateTime<Utc>,
    output_mode: OutputMode,
) -> RenderResult {
    let theme = create_theme();
    if matches!(output_mode, OutputMode::Json) {
        return Ok(render_auto(FAILURES_TEMPLATE, &ops, &theme, output_mode)?);
    }

    let rows = ops
        .iter()
        .map(|op| FailureRow {
            commit: format!("{:<10}", op.commit_id().short()),
            failed_at: format!("{:<16}", date(&op.failed_at)),
            state: format!("{:<14}", state_label(op.state(now, policy))),
            retries: format!("{:>7}", format!("{}/{}", op.retry_count, policy.max_retries)),
            error: op.error.clone(),
        })
        .collect();

    let context = FailuresContext {
        header: format!(
            "{:<10}  {:<16}  {:<14}  {:>7}  {}",
            "Commit", "Failed at", "State", "Retries", "Error"
        ),
        separator: "-".repeat(80),
        rows,
    };
    Ok(render_with_output(FAILURES_TEMPLATE, &context, &theme, output_mode)?)
}

/// Summary of an analysis pass, followed by the commits that failed.
pub fn render_report(
    repo: &TrackedRepository,
    report: &AnalysisReport,
    output_mode: OutputMode,
) -> RenderResult {
    let theme = create_theme();
    if matches!(output_mode, OutputMode::Json) {
        return Ok(render_auto(REPORT_TEMPLATE, report, &theme, output_mode)?);
    }

    let context = ReportContext {
        repository: repo.full_name(),
        total_commits: report.total_commits,
        processed: report.processed,
        skipped: report.skipped,
        failed: report.failed,
        failures: report
            .failures
            .iter()
            .map(|op| ReportFailure {
                commit: op.commit_id().short().to_string(),
                error: op.error.clone(),
            })
            .collect(),
    };
    Ok(render_with_output(REPORT_TEMPLATE, &context, &theme, output_mode)?)
}

pub fn render_retry_summary(summary: &RetrySummary, output_mode: OutputMode) -> RenderResult {
    let theme = create_theme();
    if matches!(output_mode, OutputMode::Json) {
        return Ok(render_auto(RETRY_SUMMARY_TEMPLATE, summary, &theme, output_mode)?);
    }
    Ok(render_with_output(RETRY_SUMMARY_TEMPLATE, summary, &theme, output_mode)?)
}
